//! Per-region node statistics
//!
//! While the pipeline walks a tracing it classifies every node once toward
//! the whole-tracing totals, and additionally toward each (region, atlas
//! version) bucket the node resolved into. The accumulator keeps both
//! tallies and materializes the persisted per-region table at the end.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::atlas::regions::AtlasVersion;
use crate::types::{NodeCounts, RegionId, StructureClass, TracingId};

/// Persisted statistics row for one (tracing, region, atlas version) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentRow {
    /// Owning tracing, absent for dry runs
    pub tracing_id: Option<TracingId>,
    /// Region the nodes resolved into
    pub region_id: RegionId,
    /// Atlas version the region id belongs to
    pub atlas_version: AtlasVersion,
    /// Classified node counts inside this region
    pub counts: NodeCounts,
}

/// Accumulates classification counts during one pipeline pass
#[derive(Debug, Default)]
pub struct CompartmentAccumulator {
    per_region: HashMap<(AtlasVersion, RegionId), NodeCounts>,
    tracing_totals: NodeCounts,
}

impl CompartmentAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one node toward the whole-tracing totals. Called exactly once
    /// per node, whether or not any region resolved for it.
    pub fn record_node(&mut self, class: StructureClass) {
        self.tracing_totals.record(class.counter_kind());
    }

    /// Count one node toward a region bucket under one atlas version. The
    /// caller skips this for versions where the region lookup missed.
    pub fn record_region(&mut self, version: AtlasVersion, region: RegionId, class: StructureClass) {
        self.per_region
            .entry((version, region))
            .or_default()
            .record(class.counter_kind());
    }

    /// Whole-tracing totals, independent of region resolution
    pub fn tracing_totals(&self) -> NodeCounts {
        self.tracing_totals
    }

    /// Number of distinct (version, region) buckets touched
    pub fn region_count(&self) -> usize {
        self.per_region.len()
    }

    /// Counts for one bucket, if any node landed in it
    pub fn counts(&self, version: AtlasVersion, region: RegionId) -> Option<NodeCounts> {
        self.per_region.get(&(version, region)).copied()
    }

    /// Every bucket and the tracing totals satisfy
    /// `total == soma + path + branch + end`
    pub fn is_consistent(&self) -> bool {
        self.tracing_totals.is_consistent()
            && self.per_region.values().all(NodeCounts::is_consistent)
    }

    /// Materialize the persisted table, sorted by version then region id so
    /// output order is deterministic
    pub fn rows(&self, tracing_id: Option<&TracingId>) -> Vec<CompartmentRow> {
        let mut keys: Vec<_> = self.per_region.keys().copied().collect();
        keys.sort();
        keys.into_iter()
            .map(|(version, region)| CompartmentRow {
                tracing_id: tracing_id.cloned(),
                region_id: region,
                atlas_version: version,
                counts: self.per_region[&(version, region)],
            })
            .collect()
    }
}
