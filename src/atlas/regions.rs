//! Brain-region catalogs across atlas versions
//!
//! A [`RegionCatalog`] is the precomputed mapping from integer structure id
//! (the value sampled out of a region-label volume) to a region record. It
//! is supplied once per run by the storage collaborator, or loaded from an
//! ontology JSON file for offline runs. Lookups that miss yield `None`, not
//! an error: most sampled ids correspond to background or unmapped tissue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Result, TransformError};
use crate::types::RegionId;

/// The two independently versioned atlas resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AtlasVersion {
    /// Legacy atlas (CCF v2.5)
    #[serde(rename = "ccfv2.5")]
    CcfV25,
    /// Current atlas (CCF v3.0)
    #[serde(rename = "ccfv3.0")]
    CcfV30,
}

impl AtlasVersion {
    /// Both versions, legacy first
    pub const ALL: [AtlasVersion; 2] = [AtlasVersion::CcfV25, AtlasVersion::CcfV30];
}

impl fmt::Display for AtlasVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasVersion::CcfV25 => write!(f, "ccfv2.5"),
            AtlasVersion::CcfV30 => write!(f, "ccfv3.0"),
        }
    }
}

/// One region record: stable identifier plus display metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainRegion {
    /// Stable catalog identifier, the value persisted on transformed nodes
    pub id: RegionId,
    /// Integer structure id as stored in the label volume
    pub structure_id: i64,
    /// Full anatomical name
    pub name: String,
    /// Short display acronym
    #[serde(default)]
    pub acronym: String,
}

impl BrainRegion {
    /// Create a region record
    pub fn new(id: RegionId, structure_id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            structure_id,
            name: name.into(),
            acronym: String::new(),
        }
    }

    /// Set the display acronym
    pub fn with_acronym(mut self, acronym: impl Into<String>) -> Self {
        self.acronym = acronym.into();
        self
    }
}

/// On-disk ontology shape: one region list per atlas version
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(rename = "ccfv2.5", default)]
    ccf_v25: Vec<BrainRegion>,
    #[serde(rename = "ccfv3.0", default)]
    ccf_v30: Vec<BrainRegion>,
}

/// Structure-id lookup for both atlas versions, read-only during a run
#[derive(Debug, Clone, Default)]
pub struct RegionCatalog {
    by_structure: HashMap<(AtlasVersion, i64), BrainRegion>,
}

impl RegionCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from an ontology JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            TransformError::InputMissing(format!("ontology file {}: {}", path.display(), e))
        })?;
        let file: CatalogFile = serde_json::from_str(&text).map_err(|e| {
            TransformError::Serialization(format!("ontology file {}: {}", path.display(), e))
        })?;
        let mut catalog = Self::new();
        for region in file.ccf_v25 {
            catalog.insert(AtlasVersion::CcfV25, region);
        }
        for region in file.ccf_v30 {
            catalog.insert(AtlasVersion::CcfV30, region);
        }
        tracing::debug!(
            "Loaded region catalog from {} ({} entries)",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Register a region under one atlas version, replacing any previous
    /// record for the same structure id
    pub fn insert(&mut self, version: AtlasVersion, region: BrainRegion) {
        self.by_structure
            .insert((version, region.structure_id), region);
    }

    /// Builder-style insertion for tests and fixtures
    pub fn with_region(mut self, version: AtlasVersion, region: BrainRegion) -> Self {
        self.insert(version, region);
        self
    }

    /// Resolve a sampled structure id to a region id. A miss is `None`.
    pub fn resolve(&self, structure_id: i64, version: AtlasVersion) -> Option<RegionId> {
        self.region(structure_id, version).map(|region| region.id)
    }

    /// Full region record for a structure id, when mapped
    pub fn region(&self, structure_id: i64, version: AtlasVersion) -> Option<&BrainRegion> {
        self.by_structure.get(&(version, structure_id))
    }

    /// Number of (version, structure) entries
    pub fn len(&self) -> usize {
        self.by_structure.len()
    }

    /// Whether the catalog holds no entries
    pub fn is_empty(&self) -> bool {
        self.by_structure.is_empty()
    }
}
