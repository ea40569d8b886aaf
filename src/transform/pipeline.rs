//! The per-run transform pipeline
//!
//! One [`TransformPipeline::run`] call carries a whole tracing through the
//! chain: open the displacement field and both region grids, map every node
//! in input order, resolve regions under both atlas versions, accumulate
//! per-region statistics, and persist the replacement output when a tracing
//! id is given. Grid handles are opened once per run and released on every
//! exit path.
//!
//! # Main Types
//!
//! - [`TransformPipeline`] - Runs the node loop for one tracing
//! - [`GridProvider`] / [`GridSet`] - How a run obtains its open grids
//! - [`NrrdGridProvider`] - Disk-backed provider for the native container format
//! - [`ProgressSink`] / [`ProgressUpdate`] - Cadenced progress reporting
//! - [`TransformOutput`] / [`RunSummary`] - What a finished run yields
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tracemap::storage::MemoryStore;
//! use tracemap::transform::{NrrdGridProvider, NullProgress, TransformPipeline};
//!
//! let provider = NrrdGridProvider::new("ccfv25.nrrd", "ccfv30.nrrd");
//! let pipeline = TransformPipeline::new(Arc::new(provider), Arc::new(MemoryStore::new()));
//! let output = pipeline.run(None, &nodes, &registration, &catalog, &mut NullProgress)?;
//! println!("{} nodes mapped", output.summary.output_nodes);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::atlas::{AtlasVersion, CompartmentAccumulator, CompartmentRow, RegionCatalog};
use crate::error::{Result, ResultExt, TransformError};
use crate::storage::TransformStore;
use crate::transform::affine::{AffineMatrix, PointMapper};
use crate::types::{NodeCounts, RegistrationTransform, SourceNode, TracingId, TransformedNode};
use crate::volume::{ArrayVoxelSource, VoxelGridReader, VoxelSource};

/// Progress is reported once before the first node with the input total,
/// then with the running output count every this many nodes.
pub const PROGRESS_NODE_INTERVAL: usize = 100;

/// One progress report from a running transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Tracing being transformed, absent for dry runs
    pub tracing_id: Option<TracingId>,
    /// Total nodes the run will process, present only in the first report
    pub input_node_count: Option<u64>,
    /// Nodes processed so far, present in every cadence report
    pub output_node_count: Option<u64>,
}

/// Where a run's progress reports go. Implementations must never block the
/// node loop.
pub trait ProgressSink {
    /// Accept one progress report
    fn report(&mut self, update: ProgressUpdate);
}

/// Sink that discards every report
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _update: ProgressUpdate) {}
}

/// Channel-backed sink. Uses `try_send` so a slow or absent consumer drops
/// reports instead of stalling the run.
impl ProgressSink for crossbeam_channel::Sender<ProgressUpdate> {
    fn report(&mut self, update: ProgressUpdate) {
        if self.try_send(update).is_err() {
            tracing::trace!("Progress channel full or closed, dropping update");
        }
    }
}

/// An open displacement field and the world-to-index transform that
/// addresses it
pub struct DisplacementField {
    /// The 4-axis grid: displacement component × three spatial axes
    pub source: Box<dyn VoxelSource>,
    /// Projects a shifted source point onto the field's spatial axes
    pub transform: AffineMatrix,
}

/// The two open region-label grids and their shared world-to-index transform
pub struct RegionGrids {
    /// Legacy atlas (CCF v2.5) labels, indexed with the reversed triple
    pub legacy: Box<dyn VoxelSource>,
    /// Current atlas (CCF v3.0) labels, indexed in projection order
    pub alternate: Box<dyn VoxelSource>,
    /// Projects an atlas-space point onto the region grids
    pub transform: AffineMatrix,
}

/// Everything a run holds open at once
pub struct GridSet {
    /// Displacement field for this run's registration
    pub displacement: DisplacementField,
    /// Region-label grid pair
    pub regions: RegionGrids,
}

impl GridSet {
    /// Release every grid handle. Called on both the success and failure
    /// paths of a run; the sources' own `Drop` impls cover unwinds.
    pub fn release_all(&mut self) {
        self.displacement.source.release();
        self.regions.legacy.release();
        self.regions.alternate.release();
        tracing::debug!("Released all grid handles");
    }
}

/// How a run obtains its open grids. The disk-backed provider reads volumes
/// in the native container format; deployments with an external reader for
/// the alternate region volume supply their own implementation.
pub trait GridProvider: Send + Sync {
    /// Open the displacement field named by the registration plus both
    /// region grids
    fn open(&self, registration: &RegistrationTransform) -> Result<GridSet>;
}

/// Disk-backed [`GridProvider`] reading every volume from the native
/// container format. Region volume paths are fixed at construction; the
/// displacement field path comes from each run's registration transform.
pub struct NrrdGridProvider {
    legacy_volume: PathBuf,
    alternate_volume: PathBuf,
}

impl NrrdGridProvider {
    /// Provider serving the given legacy (CCF v2.5) and current (CCF v3.0)
    /// region-label volumes
    pub fn new(legacy_volume: impl Into<PathBuf>, alternate_volume: impl Into<PathBuf>) -> Self {
        Self {
            legacy_volume: legacy_volume.into(),
            alternate_volume: alternate_volume.into(),
        }
    }

    fn open_reader(path: &Path) -> Result<(VoxelGridReader, AffineMatrix)> {
        if !path.exists() {
            return Err(TransformError::InputMissing(format!(
                "volume file {}",
                path.display()
            )));
        }
        let reader = VoxelGridReader::open(path)?;
        let transform = match AffineMatrix::world_to_index(reader.header()) {
            Some(transform) => transform,
            None => {
                tracing::warn!(
                    "Volume {} has no usable spatial metadata, using identity index transform",
                    path.display()
                );
                AffineMatrix::identity()
            }
        };
        Ok((reader, transform))
    }
}

impl GridProvider for NrrdGridProvider {
    fn open(&self, registration: &RegistrationTransform) -> Result<GridSet> {
        let (displacement, displacement_transform) = Self::open_reader(&registration.location)
            .context("opening displacement field")?;
        let (legacy, region_transform) =
            Self::open_reader(&self.legacy_volume).context("opening legacy region volume")?;
        let (alternate, _) =
            Self::open_reader(&self.alternate_volume).context("opening current region volume")?;

        Ok(GridSet {
            displacement: DisplacementField {
                source: Box::new(displacement),
                transform: displacement_transform,
            },
            regions: RegionGrids {
                legacy: Box::new(legacy),
                alternate: Box::new(alternate),
                transform: region_transform,
            },
        })
    }
}

/// [`GridProvider`] serving preset in-memory grids. Suited to synthetic
/// fixtures and benchmarks; every `open` hands out a fresh copy so runs
/// cannot observe each other's release state.
#[derive(Debug, Clone)]
pub struct InMemoryGridProvider {
    displacement: ArrayVoxelSource,
    legacy: ArrayVoxelSource,
    alternate: ArrayVoxelSource,
    displacement_transform: AffineMatrix,
    region_transform: AffineMatrix,
}

impl InMemoryGridProvider {
    /// Provider over the given grids with identity index transforms
    pub fn new(
        displacement: ArrayVoxelSource,
        legacy: ArrayVoxelSource,
        alternate: ArrayVoxelSource,
    ) -> Self {
        Self {
            displacement,
            legacy,
            alternate,
            displacement_transform: AffineMatrix::identity(),
            region_transform: AffineMatrix::identity(),
        }
    }

    /// Override the displacement-field index transform
    pub fn with_displacement_transform(mut self, transform: AffineMatrix) -> Self {
        self.displacement_transform = transform;
        self
    }

    /// Override the region-grid index transform
    pub fn with_region_transform(mut self, transform: AffineMatrix) -> Self {
        self.region_transform = transform;
        self
    }
}

impl GridProvider for InMemoryGridProvider {
    fn open(&self, _registration: &RegistrationTransform) -> Result<GridSet> {
        Ok(GridSet {
            displacement: DisplacementField {
                source: Box::new(self.displacement.clone()),
                transform: self.displacement_transform,
            },
            regions: RegionGrids {
                legacy: Box::new(self.legacy.clone()),
                alternate: Box::new(self.alternate.clone()),
                transform: self.region_transform,
            },
        })
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Nodes the run received
    pub input_nodes: u64,
    /// Nodes the run produced (always equal to `input_nodes`; faulted nodes
    /// are recorded, not dropped)
    pub output_nodes: u64,
    /// Nodes recorded with NaN coordinates after a per-node fault
    pub faulted_nodes: u64,
    /// Whole-tracing classification totals
    pub counts: NodeCounts,
}

/// Full output of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOutput {
    /// Transformed nodes in input order
    pub nodes: Vec<TransformedNode>,
    /// Per-region statistics table, both atlas versions
    pub compartments: Vec<CompartmentRow>,
    /// Aggregate summary
    pub summary: RunSummary,
}

/// Runs the node loop for one tracing at a time
///
/// Holds the grid provider and the storage collaborator; the region catalog
/// and the nodes themselves are supplied per run. One pipeline value can
/// serve many sequential runs, and independent pipelines can run
/// concurrently because each run owns its own grid handles.
pub struct TransformPipeline {
    provider: Arc<dyn GridProvider>,
    store: Arc<dyn TransformStore>,
}

impl TransformPipeline {
    /// Pipeline over the given grid provider and store
    pub fn new(provider: Arc<dyn GridProvider>, store: Arc<dyn TransformStore>) -> Self {
        Self { provider, store }
    }

    /// Transform every node of one tracing.
    ///
    /// With `tracing_id` set, the persisted output for that tracing is
    /// atomically replaced on success. With `None` the results are only
    /// returned, for offline and batch conversion.
    pub fn run(
        &self,
        tracing_id: Option<&TracingId>,
        nodes: &[SourceNode],
        registration: &RegistrationTransform,
        catalog: &RegionCatalog,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransformOutput> {
        let mut grids = self.provider.open(registration)?;
        let result = self.execute(tracing_id, nodes, registration, catalog, &mut grids, progress);
        grids.release_all();
        result
    }

    fn execute(
        &self,
        tracing_id: Option<&TracingId>,
        nodes: &[SourceNode],
        registration: &RegistrationTransform,
        catalog: &RegionCatalog,
        grids: &mut GridSet,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransformOutput> {
        let label = tracing_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "dry run".to_string());
        tracing::info!(
            "Transforming {} nodes for {} with registration {}",
            nodes.len(),
            label,
            registration.id
        );
        progress.report(ProgressUpdate {
            tracing_id: tracing_id.cloned(),
            input_node_count: Some(nodes.len() as u64),
            output_node_count: None,
        });

        let displacement_transform = grids.displacement.transform;
        let region_transform = grids.regions.transform;
        let mut mapper = PointMapper::new(
            registration.offset,
            displacement_transform,
            &mut *grids.displacement.source,
            region_transform,
            &mut *grids.regions.legacy,
            &mut *grids.regions.alternate,
        );

        let mut accumulator = CompartmentAccumulator::new();
        let mut transformed = Vec::with_capacity(nodes.len());
        let mut faulted = 0u64;

        for node in nodes {
            let output = match mapper.map_point(node.position()) {
                Ok(mapped) => {
                    let region_legacy = mapped
                        .legacy_structure
                        .and_then(|s| catalog.resolve(s, AtlasVersion::CcfV25));
                    let region_current = mapped
                        .current_structure
                        .and_then(|s| catalog.resolve(s, AtlasVersion::CcfV30));
                    TransformedNode {
                        tracing_id: tracing_id.cloned(),
                        source_node_id: node.id,
                        sample_number: node.sample_number,
                        x: mapped.atlas[0],
                        y: mapped.atlas[1],
                        z: mapped.atlas[2],
                        radius: node.radius,
                        parent_number: node.parent_number,
                        structure: node.structure,
                        region_id_ccf25: region_legacy,
                        region_id_ccf30: region_current,
                        length_to_parent: None,
                    }
                }
                Err(err) => {
                    // One bad node must not discard the whole tracing.
                    tracing::warn!(
                        "Node {} of {} failed to map: {}",
                        node.sample_number,
                        label,
                        err
                    );
                    faulted += 1;
                    TransformedNode {
                        tracing_id: tracing_id.cloned(),
                        source_node_id: node.id,
                        sample_number: node.sample_number,
                        x: f64::NAN,
                        y: f64::NAN,
                        z: f64::NAN,
                        radius: node.radius,
                        parent_number: node.parent_number,
                        structure: node.structure,
                        region_id_ccf25: None,
                        region_id_ccf30: None,
                        length_to_parent: None,
                    }
                }
            };

            // Whole-tracing totals count every node; region buckets only the
            // versions that resolved.
            accumulator.record_node(node.structure);
            if let Some(region) = output.region_id_ccf25 {
                accumulator.record_region(AtlasVersion::CcfV25, region, node.structure);
            }
            if let Some(region) = output.region_id_ccf30 {
                accumulator.record_region(AtlasVersion::CcfV30, region, node.structure);
            }
            transformed.push(output);

            if transformed.len() % PROGRESS_NODE_INTERVAL == 0 {
                progress.report(ProgressUpdate {
                    tracing_id: tracing_id.cloned(),
                    input_node_count: None,
                    output_node_count: Some(transformed.len() as u64),
                });
            }
        }

        let summary = RunSummary {
            input_nodes: nodes.len() as u64,
            output_nodes: transformed.len() as u64,
            faulted_nodes: faulted,
            counts: accumulator.tracing_totals(),
        };
        let output = TransformOutput {
            compartments: accumulator.rows(tracing_id),
            nodes: transformed,
            summary,
        };

        if let Some(id) = tracing_id {
            self.store
                .replace_transform(id, &output.nodes, &output.compartments, &summary.counts)
                .context("persisting transform output")?;
        }

        tracing::info!(
            "Transform complete for {}: {} nodes, {} faulted, {} compartment rows",
            label,
            summary.output_nodes,
            summary.faulted_nodes,
            output.compartments.len()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::BrainRegion;
    use crate::storage::{MemoryStore, TracingRecord};
    use crate::types::{RegionId, StructureClass, ROOT_PARENT};

    struct RecordingSink(Vec<ProgressUpdate>);

    impl ProgressSink for RecordingSink {
        fn report(&mut self, update: ProgressUpdate) {
            self.0.push(update);
        }
    }

    fn constant_region_provider(structure_id: f64) -> InMemoryGridProvider {
        InMemoryGridProvider::new(
            ArrayVoxelSource::filled(vec![3, 8, 8, 8], 0.0),
            ArrayVoxelSource::filled(vec![8, 8, 8], structure_id),
            ArrayVoxelSource::filled(vec![8, 8, 8], structure_id),
        )
    }

    fn dual_catalog(structure_id: i64) -> RegionCatalog {
        RegionCatalog::new()
            .with_region(
                AtlasVersion::CcfV25,
                BrainRegion::new(RegionId(9), structure_id, "Region R (legacy)"),
            )
            .with_region(
                AtlasVersion::CcfV30,
                BrainRegion::new(RegionId(11), structure_id, "Region R"),
            )
    }

    fn three_node_tracing() -> Vec<SourceNode> {
        vec![
            SourceNode::new(1, ROOT_PARENT, [0.5, 0.5, 0.5], 2.0, StructureClass::Soma).with_id(10),
            SourceNode::new(2, 1, [1.5, 0.5, 0.5], 1.0, StructureClass::Axon).with_id(11),
            SourceNode::new(3, 2, [2.5, 0.5, 0.5], 1.0, StructureClass::EndPoint).with_id(12),
        ]
    }

    fn pipeline(provider: InMemoryGridProvider, store: Arc<MemoryStore>) -> TransformPipeline {
        TransformPipeline::new(Arc::new(provider), store)
    }

    #[test]
    fn test_identity_run_preserves_coordinates_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(constant_region_provider(5.0), store);
        let nodes = three_node_tracing();
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();

        assert_eq!(output.nodes.len(), 3);
        for (node, source) in output.nodes.iter().zip(nodes.iter()) {
            assert_eq!([node.x, node.y, node.z], source.position());
            assert_eq!(node.region_id_ccf25, Some(RegionId(9)));
            assert_eq!(node.region_id_ccf30, Some(RegionId(11)));
            assert_eq!(node.sample_number, source.sample_number);
            assert_eq!(node.parent_number, source.parent_number);
            assert_eq!(node.radius, source.radius);
        }

        assert_eq!(output.compartments.len(), 2);
        for row in &output.compartments {
            assert_eq!(row.counts.total, 3);
            assert_eq!(row.counts.soma, 1);
            assert_eq!(row.counts.path, 1);
            assert_eq!(row.counts.branch, 0);
            assert_eq!(row.counts.end, 1);
        }

        assert_eq!(output.summary.input_nodes, 3);
        assert_eq!(output.summary.output_nodes, 3);
        assert_eq!(output.summary.faulted_nodes, 0);
        assert!(output.summary.counts.is_consistent());
    }

    #[test]
    fn test_out_of_range_regions_produce_no_rows() {
        let store = Arc::new(MemoryStore::new());
        let provider = constant_region_provider(5.0)
            .with_region_transform(AffineMatrix::translation([100.0, 100.0, 100.0]));
        let pipeline = pipeline(provider, store);
        let nodes = three_node_tracing();
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();

        assert!(output
            .nodes
            .iter()
            .all(|n| n.region_id_ccf25.is_none() && n.region_id_ccf30.is_none()));
        assert!(output.compartments.is_empty());
        // The nodes themselves still mapped; out of range is not a fault.
        assert_eq!(output.summary.faulted_nodes, 0);
        assert_eq!(output.summary.counts.total, 3);
    }

    #[test]
    fn test_progress_cadence() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(constant_region_provider(5.0), store);
        let nodes: Vec<SourceNode> = (1..=250)
            .map(|i| SourceNode::new(i, if i == 1 { ROOT_PARENT } else { i - 1 },
                [0.5, 0.5, 0.5], 1.0, StructureClass::Axon))
            .collect();
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");
        let mut sink = RecordingSink(Vec::new());

        pipeline
            .run(None, &nodes, &registration, &RegionCatalog::new(), &mut sink)
            .unwrap();

        assert_eq!(sink.0.len(), 3);
        assert_eq!(sink.0[0].input_node_count, Some(250));
        assert_eq!(sink.0[0].output_node_count, None);
        assert_eq!(sink.0[1].output_node_count, Some(100));
        assert_eq!(sink.0[2].output_node_count, Some(200));
    }

    #[test]
    fn test_faulted_nodes_recorded_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        // A 3-axis displacement grid faults every node at sample time.
        let provider = InMemoryGridProvider::new(
            ArrayVoxelSource::filled(vec![8, 8, 8], 0.0),
            ArrayVoxelSource::filled(vec![8, 8, 8], 5.0),
            ArrayVoxelSource::filled(vec![8, 8, 8], 5.0),
        );
        let pipeline = pipeline(provider, store);
        let nodes = three_node_tracing();
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();

        assert_eq!(output.nodes.len(), 3);
        assert!(output.nodes.iter().all(|n| n.is_faulted()));
        assert!(output
            .nodes
            .iter()
            .all(|n| n.region_id_ccf25.is_none() && n.region_id_ccf30.is_none()));
        assert_eq!(output.summary.faulted_nodes, 3);
        // Classification is intrinsic to the node, so totals still count.
        assert_eq!(output.summary.counts.total, 3);
        assert!(output.compartments.is_empty());
    }

    #[test]
    fn test_extreme_coordinates_recorded_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(constant_region_provider(5.0), store);
        let nodes = vec![
            SourceNode::new(1, ROOT_PARENT, [0.5, 0.5, 0.5], 2.0, StructureClass::Soma),
            SourceNode::new(2, 1, [f64::NAN, 0.5, 0.5], 1.0, StructureClass::Axon),
            SourceNode::new(3, 2, [-1e308, 0.5, 0.5], 1.0, StructureClass::EndPoint),
        ];
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();

        assert_eq!(output.nodes.len(), 3);
        assert!(!output.nodes[0].is_faulted());
        // The unmappable coordinate faults its node alone.
        assert!(output.nodes[1].is_faulted());
        // A finite coordinate, however large, still maps; it just lands
        // outside both region grids.
        assert!(!output.nodes[2].is_faulted());
        assert_eq!(output.nodes[2].x, -1e308);
        assert_eq!(output.nodes[2].region_id_ccf25, None);
        assert_eq!(output.nodes[2].region_id_ccf30, None);
        assert_eq!(output.summary.faulted_nodes, 1);
        assert_eq!(output.summary.counts.total, 3);
    }

    #[test]
    fn test_offset_shifts_atlas_coordinates() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(constant_region_provider(5.0), store);
        let nodes = vec![SourceNode::new(
            1,
            ROOT_PARENT,
            [0.5, 0.5, 0.5],
            1.0,
            StructureClass::Soma,
        )];
        let registration =
            RegistrationTransform::new("reg-1", "unused.nrrd").with_offset([1.0, 2.0, 3.0]);

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();
        let node = &output.nodes[0];
        assert_eq!([node.x, node.y, node.z], [1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_persisted_run_replaces_store_output() {
        let store = Arc::new(MemoryStore::new());
        let id = TracingId::from("tracing-1");
        store
            .insert_tracing(TracingRecord::new("tracing-1", "src-1", "reg-1"))
            .unwrap();
        let pipeline = pipeline(constant_region_provider(5.0), store.clone());
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");
        let catalog = dual_catalog(5);

        let nodes = three_node_tracing();
        pipeline
            .run(Some(&id), &nodes, &registration, &catalog, &mut NullProgress)
            .unwrap();
        assert_eq!(store.transformed_nodes(&id).unwrap().len(), 3);
        assert_eq!(store.compartment_rows(&id).unwrap().len(), 2);

        // Re-running with fewer nodes replaces, not appends.
        pipeline
            .run(Some(&id), &nodes[..1], &registration, &catalog, &mut NullProgress)
            .unwrap();
        assert_eq!(store.transformed_nodes(&id).unwrap().len(), 1);

        let record = store.find_tracing(&id).unwrap().unwrap();
        assert!(record.transformed_at.is_some());
        assert_eq!(record.counts.unwrap().total, 1);
    }

    #[test]
    fn test_dry_run_touches_no_store_state() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(constant_region_provider(5.0), store.clone());
        let nodes = three_node_tracing();
        let registration = RegistrationTransform::new("reg-1", "unused.nrrd");

        let output = pipeline
            .run(None, &nodes, &registration, &dual_catalog(5), &mut NullProgress)
            .unwrap();
        assert!(output.nodes.iter().all(|n| n.tracing_id.is_none()));
        assert!(store
            .transformed_nodes(&TracingId::from("tracing-1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_volume_declines_run() {
        let store = Arc::new(MemoryStore::new());
        let provider = NrrdGridProvider::new("/nonexistent/ccfv25.nrrd", "/nonexistent/ccfv30.nrrd");
        let pipeline = TransformPipeline::new(Arc::new(provider), store);
        let nodes = three_node_tracing();
        let registration = RegistrationTransform::new("reg-1", "/nonexistent/field.nrrd");

        let err = pipeline
            .run(None, &nodes, &registration, &RegionCatalog::new(), &mut NullProgress)
            .unwrap_err();
        assert!(err.is_declined());
    }
}
