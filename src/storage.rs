//! Storage collaborator boundary
//!
//! The relational store that owns tracing records, source nodes and persisted
//! transform output lives outside this crate. [`TransformStore`] is the
//! narrow contract the pipeline and coordinator need from it: point lookups
//! for run admission, the region catalog, and the atomic replace that
//! persists a finished run. [`MemoryStore`] is the in-process implementation
//! backing the batch binary and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::atlas::{CompartmentRow, RegionCatalog};
use crate::error::{Result, TransformError};
use crate::types::{NodeCounts, RegistrationTransform, SourceNode, TracingId, TransformedNode};

/// One tracing record as the storage collaborator sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingRecord {
    /// Tracing id, the single-flight key
    pub id: TracingId,
    /// Source tracing whose nodes feed the transform
    pub source_tracing_id: String,
    /// Registration transform applied to this tracing
    pub registration_id: String,
    /// When the last successful transform completed
    #[serde(default)]
    pub transformed_at: Option<DateTime<Utc>>,
    /// Aggregate counts stamped by the last successful transform
    #[serde(default)]
    pub counts: Option<NodeCounts>,
}

impl TracingRecord {
    /// New, never-transformed tracing record
    pub fn new(
        id: impl Into<TracingId>,
        source_tracing_id: impl Into<String>,
        registration_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_tracing_id: source_tracing_id.into(),
            registration_id: registration_id.into(),
            transformed_at: None,
            counts: None,
        }
    }
}

/// Persistence operations the transform core relies on. Implementations are
/// shared across worker threads, so every method takes `&self`.
pub trait TransformStore: Send + Sync {
    /// Look up a tracing record by id
    fn find_tracing(&self, id: &TracingId) -> Result<Option<TracingRecord>>;

    /// Load the nodes of a source tracing in acquisition order. `None` means
    /// the source tracing record itself does not exist; an existing tracing
    /// with no nodes is `Some` of an empty vector.
    fn source_nodes(&self, source_tracing_id: &str) -> Result<Option<Vec<SourceNode>>>;

    /// Look up a registration transform by id
    fn find_registration(&self, id: &str) -> Result<Option<RegistrationTransform>>;

    /// The structure-id catalog covering both atlas versions
    fn region_catalog(&self) -> Result<RegionCatalog>;

    /// Replace a tracing's persisted transform output: delete the previous
    /// node set and compartment table, bulk-insert the new ones, and stamp
    /// the tracing record with the completion time and aggregate counts.
    /// The whole sequence executes as one transactional unit; a failure
    /// leaves the previous output in place.
    fn replace_transform(
        &self,
        tracing_id: &TracingId,
        nodes: &[TransformedNode],
        compartments: &[CompartmentRow],
        counts: &NodeCounts,
    ) -> Result<()>;

    /// Persisted transformed nodes for a tracing
    fn transformed_nodes(&self, tracing_id: &TracingId) -> Result<Vec<TransformedNode>>;

    /// Persisted compartment rows for a tracing
    fn compartment_rows(&self, tracing_id: &TracingId) -> Result<Vec<CompartmentRow>>;
}

#[derive(Debug, Default)]
struct StoreInner {
    tracings: HashMap<TracingId, TracingRecord>,
    source_nodes: HashMap<String, Vec<SourceNode>>,
    registrations: HashMap<String, RegistrationTransform>,
    catalog: RegionCatalog,
    transformed: HashMap<TracingId, Vec<TransformedNode>>,
    compartments: HashMap<TracingId, Vec<CompartmentRow>>,
}

/// In-process store. One mutex guards every table; holding the guard across
/// the delete, insert and stamp steps is what makes [`replace_transform`]
/// atomic here.
///
/// [`replace_transform`]: TransformStore::replace_transform
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tracing record
    pub fn insert_tracing(&self, record: TracingRecord) -> Result<()> {
        self.lock()?.tracings.insert(record.id.clone(), record);
        Ok(())
    }

    /// Seed the nodes of a source tracing
    pub fn insert_source_nodes(
        &self,
        source_tracing_id: impl Into<String>,
        nodes: Vec<SourceNode>,
    ) -> Result<()> {
        self.lock()?.source_nodes.insert(source_tracing_id.into(), nodes);
        Ok(())
    }

    /// Seed a registration transform
    pub fn insert_registration(&self, registration: RegistrationTransform) -> Result<()> {
        self.lock()?
            .registrations
            .insert(registration.id.clone(), registration);
        Ok(())
    }

    /// Install the region catalog served to every run
    pub fn set_region_catalog(&self, catalog: RegionCatalog) -> Result<()> {
        self.lock()?.catalog = catalog;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| TransformError::Storage("store mutex poisoned".to_string()))
    }
}

impl TransformStore for MemoryStore {
    fn find_tracing(&self, id: &TracingId) -> Result<Option<TracingRecord>> {
        Ok(self.lock()?.tracings.get(id).cloned())
    }

    fn source_nodes(&self, source_tracing_id: &str) -> Result<Option<Vec<SourceNode>>> {
        Ok(self.lock()?.source_nodes.get(source_tracing_id).cloned())
    }

    fn find_registration(&self, id: &str) -> Result<Option<RegistrationTransform>> {
        Ok(self.lock()?.registrations.get(id).cloned())
    }

    fn region_catalog(&self) -> Result<RegionCatalog> {
        Ok(self.lock()?.catalog.clone())
    }

    fn replace_transform(
        &self,
        tracing_id: &TracingId,
        nodes: &[TransformedNode],
        compartments: &[CompartmentRow],
        counts: &NodeCounts,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner.transformed.remove(tracing_id);
        inner.compartments.remove(tracing_id);
        inner.transformed.insert(tracing_id.clone(), nodes.to_vec());
        inner
            .compartments
            .insert(tracing_id.clone(), compartments.to_vec());
        if let Some(record) = inner.tracings.get_mut(tracing_id) {
            record.transformed_at = Some(Utc::now());
            record.counts = Some(*counts);
        }
        tracing::debug!(
            "Replaced transform output for {} ({} nodes, {} compartment rows)",
            tracing_id,
            nodes.len(),
            compartments.len()
        );
        Ok(())
    }

    fn transformed_nodes(&self, tracing_id: &TracingId) -> Result<Vec<TransformedNode>> {
        Ok(self
            .lock()?
            .transformed
            .get(tracing_id)
            .cloned()
            .unwrap_or_default())
    }

    fn compartment_rows(&self, tracing_id: &TracingId) -> Result<Vec<CompartmentRow>> {
        Ok(self
            .lock()?
            .compartments
            .get(tracing_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasVersion;
    use crate::types::{RegionId, StructureClass};

    fn sample_node(tracing_id: &TracingId, sample_number: i64) -> TransformedNode {
        TransformedNode {
            tracing_id: Some(tracing_id.clone()),
            source_node_id: sample_number,
            sample_number,
            x: 1.0,
            y: 2.0,
            z: 3.0,
            radius: 0.5,
            parent_number: sample_number - 1,
            structure: StructureClass::Axon,
            region_id_ccf25: Some(RegionId(7)),
            region_id_ccf30: None,
            length_to_parent: None,
        }
    }

    fn sample_row(tracing_id: &TracingId, total: u64) -> CompartmentRow {
        CompartmentRow {
            tracing_id: Some(tracing_id.clone()),
            region_id: RegionId(7),
            atlas_version: AtlasVersion::CcfV25,
            counts: NodeCounts {
                total,
                path: total,
                ..NodeCounts::default()
            },
        }
    }

    #[test]
    fn test_lookups_miss_as_none() {
        let store = MemoryStore::new();
        let id = TracingId::from("missing");
        assert!(store.find_tracing(&id).unwrap().is_none());
        assert!(store.source_nodes("missing").unwrap().is_none());
        assert!(store.find_registration("missing").unwrap().is_none());
    }

    #[test]
    fn test_empty_source_tracing_is_some() {
        let store = MemoryStore::new();
        store.insert_source_nodes("src-1", Vec::new()).unwrap();
        let nodes = store.source_nodes("src-1").unwrap();
        assert_eq!(nodes, Some(Vec::new()));
    }

    #[test]
    fn test_replace_transform_swaps_output_and_stamps() {
        let store = MemoryStore::new();
        let id = TracingId::from("tracing-1");
        store
            .insert_tracing(TracingRecord::new("tracing-1", "src-1", "reg-1"))
            .unwrap();

        let first = vec![sample_node(&id, 1), sample_node(&id, 2)];
        let counts = NodeCounts {
            total: 2,
            path: 2,
            ..NodeCounts::default()
        };
        store
            .replace_transform(&id, &first, &[sample_row(&id, 2)], &counts)
            .unwrap();
        assert_eq!(store.transformed_nodes(&id).unwrap().len(), 2);
        assert_eq!(store.compartment_rows(&id).unwrap().len(), 1);

        // A second run fully replaces the first output, not appends to it.
        let second = vec![sample_node(&id, 1)];
        let counts = NodeCounts {
            total: 1,
            path: 1,
            ..NodeCounts::default()
        };
        store
            .replace_transform(&id, &second, &[sample_row(&id, 1)], &counts)
            .unwrap();
        assert_eq!(store.transformed_nodes(&id).unwrap().len(), 1);
        assert_eq!(store.compartment_rows(&id).unwrap().len(), 1);

        let record = store.find_tracing(&id).unwrap().unwrap();
        assert!(record.transformed_at.is_some());
        assert_eq!(record.counts.unwrap().total, 1);
    }

    #[test]
    fn test_replace_is_scoped_to_one_tracing() {
        let store = MemoryStore::new();
        let a = TracingId::from("a");
        let b = TracingId::from("b");
        let counts = NodeCounts {
            total: 1,
            path: 1,
            ..NodeCounts::default()
        };
        store
            .replace_transform(&a, &[sample_node(&a, 1)], &[], &counts)
            .unwrap();
        store
            .replace_transform(&b, &[sample_node(&b, 1)], &[], &counts)
            .unwrap();

        store.replace_transform(&a, &[], &[], &NodeCounts::default()).unwrap();
        assert!(store.transformed_nodes(&a).unwrap().is_empty());
        assert_eq!(store.transformed_nodes(&b).unwrap().len(), 1);
    }
}
