//! Service configuration
//!
//! One TOML file configures a deployment: where the reference atlas
//! resources live and how the coordinator behaves. Every setting has a
//! default so a partial file (or none at all) still yields a usable
//! configuration.
//!
//! # Example
//!
//! ```ignore
//! use tracemap::config::ServiceConfig;
//!
//! let config = ServiceConfig::load_or_default("tracemap.toml");
//! for path in config.atlas.required_files() {
//!     println!("atlas resource: {}", path.display());
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TransformError};

/// Default capacity of the coordinator event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Reference atlas resources. Configured paths are checked for existence at
/// run admission; unset paths are treated as externally provided and not
/// checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Region ontology JSON covering both atlas versions
    pub ontology: Option<PathBuf>,

    /// Legacy (CCF v2.5) region-label volume
    pub ccfv25_volume: Option<PathBuf>,

    /// Current (CCF v3.0) region-label volume
    pub ccfv30_volume: Option<PathBuf>,
}

impl AtlasConfig {
    /// The configured resource files run admission must find on disk
    pub fn required_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.ontology
            .iter()
            .chain(self.ccfv25_volume.iter())
            .chain(self.ccfv30_volume.iter())
    }
}

/// Batch-mode settings for the offline binary. Online runs take the offset
/// from the registration record instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Offset added to every source point before displacement sampling
    pub offset: [f64; 3],
}

/// Coordinator behavior settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Capacity of the event channel handed to the caller. Events beyond a
    /// full channel are dropped rather than blocking a worker.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Whole-service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reference atlas resources
    pub atlas: AtlasConfig,

    /// Offline batch-mode settings
    pub batch: BatchConfig,

    /// Coordinator settings
    pub coordinator: CoordinatorConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransformError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            TransformError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TransformError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TransformError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            TransformError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
