//! Point mapping and the per-run transform pipeline
//!
//! # Main Types
//!
//! - [`AffineMatrix`] / [`PointMapper`] - Per-point mapping math
//! - [`TransformPipeline`] - Whole-tracing orchestration
//! - [`GridProvider`] - How a run obtains its open grids

pub mod affine;
pub mod pipeline;

pub use affine::{AffineMatrix, MappedPoint, PointMapper};
pub use pipeline::{
    DisplacementField, GridProvider, GridSet, InMemoryGridProvider, NrrdGridProvider,
    NullProgress, ProgressSink, ProgressUpdate, RegionGrids, RunSummary, TransformOutput,
    TransformPipeline, PROGRESS_NODE_INTERVAL,
};
