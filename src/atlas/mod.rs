//! Atlas-side concerns: region catalogs and per-region statistics
//!
//! # Main Types
//!
//! - [`RegionCatalog`] - Structure-id to region lookup for both atlas versions
//! - [`AtlasVersion`] - The two independently versioned atlas resources
//! - [`CompartmentAccumulator`] - Per-region node statistics for one run

pub mod compartments;
pub mod regions;

pub use compartments::{CompartmentAccumulator, CompartmentRow};
pub use regions::{AtlasVersion, BrainRegion, RegionCatalog};
