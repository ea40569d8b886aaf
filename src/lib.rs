//! # tracemap: neuron-tracing registration core
//!
//! Maps point-sequence neuron reconstructions (ordered 3-D node chains with
//! parent links) from their raw acquisition coordinate space into a
//! standardized brain-atlas space, and classifies every node and the tracing
//! as a whole by anatomical region under two atlas versions.
//!
//! ## Architecture
//!
//! - **volume**: self-contained decoding of the native volumetric container
//!   (text header + binary payload) and random-access voxel sampling
//! - **transform**: 4×4 affine math, displacement-field sampling, and the
//!   per-run pipeline that carries a whole tracing through the chain
//! - **atlas**: region catalogs for both atlas versions and per-region
//!   node statistics
//! - **storage**: the narrow persistence contract the core needs, plus an
//!   in-process store
//! - **coordinator**: run admission, the single-flight guarantee per
//!   tracing, isolated workers, progress relay, typed outcomes
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tracemap::config::ServiceConfig;
//! use tracemap::coordinator::{CoordinatorEvent, TransformCoordinator};
//! use tracemap::storage::MemoryStore;
//! use tracemap::transform::NrrdGridProvider;
//! use tracemap::types::TracingId;
//!
//! let config = ServiceConfig::load_or_default("tracemap.toml");
//! let provider = NrrdGridProvider::new(
//!     config.atlas.ccfv25_volume.clone().unwrap(),
//!     config.atlas.ccfv30_volume.clone().unwrap(),
//! );
//! let store = Arc::new(MemoryStore::new());
//!
//! let (coordinator, events) =
//!     TransformCoordinator::new(config, store, Arc::new(provider));
//!
//! let tracing_id = TracingId::from("b2b8a3e5");
//! let ticket = coordinator.apply_transform(&tracing_id, "src-1", "reg-1")?;
//!
//! for event in events.drain() {
//!     if let CoordinatorEvent::Progress(update) = event {
//!         println!("processed: {:?}", update.output_node_count);
//!     }
//! }
//!
//! let outcome = ticket.wait();
//! std::process::exit(outcome.exit_code());
//! ```

pub mod atlas;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod storage;
pub mod transform;
pub mod types;
pub mod volume;

// Re-export commonly used types
pub use atlas::{AtlasVersion, CompartmentRow, RegionCatalog};
pub use coordinator::{CoordinatorEvent, RunOutcome, TransformCoordinator};
pub use error::{Result, TransformError};
pub use transform::{RunSummary, TransformOutput, TransformPipeline};
pub use types::{RegistrationTransform, SourceNode, StructureClass, TracingId, TransformedNode};
pub use volume::{VolumeHeader, VoxelGridReader, VoxelSource};
