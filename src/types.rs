//! Core data types for tracemap
//!
//! This module contains the fundamental data structures shared by the
//! transform pipeline, the region accumulator, and the storage boundary.
//!
//! # Main Types
//!
//! - [`StructureClass`] - Closed per-node classification tag with stable wire codes
//! - [`SourceNode`] - One reconstructed point as imported from acquisition
//! - [`TransformedNode`] - One node mapped into atlas space with region ids
//! - [`RegistrationTransform`] - Displacement-field reference plus per-run offset
//! - [`NodeCounts`] - The soma/path/branch/end counter bundle
//!
//! # Classification
//!
//! Each node carries exactly one [`StructureClass`]. For statistics the class
//! collapses onto one of four counters through [`StructureClass::counter_kind`],
//! a fixed compile-time table: soma stays soma, fork points count as branches,
//! end points count as ends, and everything else (axon, dendrites, undefined)
//! counts as path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Parent sample number marking a root (somatic) node
pub const ROOT_PARENT: i64 = -1;

/// Closed per-node structure classification with stable wire codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StructureClass {
    /// Unclassified point (code 0)
    #[default]
    Undefined,
    /// Cell body (code 1)
    Soma,
    /// Axonal point (code 2)
    Axon,
    /// Basal dendrite point (code 3)
    BasalDendrite,
    /// Apical dendrite point (code 4)
    ApicalDendrite,
    /// Bifurcation point (code 5)
    ForkPoint,
    /// Terminal point (code 6)
    EndPoint,
}

/// Which statistics counter a node contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Soma counter
    Soma,
    /// Undifferentiated path counter
    Path,
    /// Branch (fork) counter
    Branch,
    /// End-point counter
    End,
}

impl StructureClass {
    /// Returns the stable wire code for this classification
    pub fn code(&self) -> i64 {
        match self {
            StructureClass::Undefined => 0,
            StructureClass::Soma => 1,
            StructureClass::Axon => 2,
            StructureClass::BasalDendrite => 3,
            StructureClass::ApicalDendrite => 4,
            StructureClass::ForkPoint => 5,
            StructureClass::EndPoint => 6,
        }
    }

    /// Decode a wire code. Unknown codes fall back to `Undefined` with a
    /// warning so one odd node cannot invalidate a whole tracing.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => StructureClass::Undefined,
            1 => StructureClass::Soma,
            2 => StructureClass::Axon,
            3 => StructureClass::BasalDendrite,
            4 => StructureClass::ApicalDendrite,
            5 => StructureClass::ForkPoint,
            6 => StructureClass::EndPoint,
            other => {
                tracing::warn!("Unknown structure class code {}, treating as undefined", other);
                StructureClass::Undefined
            }
        }
    }

    /// The statistics counter this classification contributes to
    pub fn counter_kind(&self) -> CounterKind {
        match self {
            StructureClass::Soma => CounterKind::Soma,
            StructureClass::ForkPoint => CounterKind::Branch,
            StructureClass::EndPoint => CounterKind::End,
            StructureClass::Undefined
            | StructureClass::Axon
            | StructureClass::BasalDendrite
            | StructureClass::ApicalDendrite => CounterKind::Path,
        }
    }
}

impl fmt::Display for StructureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureClass::Undefined => write!(f, "undefined"),
            StructureClass::Soma => write!(f, "soma"),
            StructureClass::Axon => write!(f, "axon"),
            StructureClass::BasalDendrite => write!(f, "basal dendrite"),
            StructureClass::ApicalDendrite => write!(f, "apical dendrite"),
            StructureClass::ForkPoint => write!(f, "fork point"),
            StructureClass::EndPoint => write!(f, "end point"),
        }
    }
}

/// Identifier of a tracing record (UUID-shaped in production)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TracingId(pub String);

impl TracingId {
    /// Build a tracing id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        TracingId(id.into())
    }
}

impl fmt::Display for TracingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TracingId {
    fn from(id: &str) -> Self {
        TracingId(id.to_string())
    }
}

impl From<String> for TracingId {
    fn from(id: String) -> Self {
        TracingId(id)
    }
}

/// Stable identifier of a brain region record in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RegionId(pub i64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One reconstructed point as imported from acquisition. Read-only to the
/// transform core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNode {
    /// Upstream row id, carried through for provenance
    #[serde(default)]
    pub id: i64,
    /// Sample number, positive and unique within a tracing
    pub sample_number: i64,
    /// Parent sample number, [`ROOT_PARENT`] for roots
    pub parent_number: i64,
    /// X coordinate in source (acquisition) units
    pub x: f64,
    /// Y coordinate in source units
    pub y: f64,
    /// Z coordinate in source units
    pub z: f64,
    /// Node radius, carried through unchanged
    pub radius: f64,
    /// Structure classification tag
    #[serde(default)]
    pub structure: StructureClass,
}

impl SourceNode {
    /// Create a node with the given linkage, position and classification
    pub fn new(
        sample_number: i64,
        parent_number: i64,
        position: [f64; 3],
        radius: f64,
        structure: StructureClass,
    ) -> Self {
        Self {
            id: 0,
            sample_number,
            parent_number,
            x: position[0],
            y: position[1],
            z: position[2],
            radius,
            structure,
        }
    }

    /// Set the upstream row id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Position as an array for matrix math
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Whether this node is a root of the tracing
    pub fn is_root(&self) -> bool {
        self.parent_number == ROOT_PARENT
    }
}

/// One node mapped into atlas space. This is the persisted output shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedNode {
    /// Owning tracing, `None` for dry runs that persist nothing
    pub tracing_id: Option<TracingId>,
    /// Source node row id
    pub source_node_id: i64,
    /// Sample number, preserved from the source node
    pub sample_number: i64,
    /// Atlas-space X coordinate, NaN when the node faulted
    pub x: f64,
    /// Atlas-space Y coordinate
    pub y: f64,
    /// Atlas-space Z coordinate
    pub z: f64,
    /// Radius, carried through unchanged
    pub radius: f64,
    /// Parent sample number, preserved from the source node
    pub parent_number: i64,
    /// Structure classification, preserved from the source node
    pub structure: StructureClass,
    /// Region id under the legacy atlas (CCF v2.5), if resolved
    pub region_id_ccf25: Option<RegionId>,
    /// Region id under the current atlas (CCF v3.0), if resolved
    pub region_id_ccf30: Option<RegionId>,
    /// Path length to the parent node. Not yet computed anywhere; kept as an
    /// explicit unset field rather than a formula.
    pub length_to_parent: Option<f64>,
}

impl TransformedNode {
    /// Whether this node faulted during mapping (coordinates are NaN and no
    /// region was resolved)
    pub fn is_faulted(&self) -> bool {
        self.x.is_nan() && self.y.is_nan() && self.z.is_nan()
    }
}

/// Reference to the displacement-field volume used to register a tracing,
/// plus the offset applied to every node before sampling. Immutable for the
/// duration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationTransform {
    /// Registration transform id
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Path to the displacement-field volume
    pub location: PathBuf,
    /// Offset added to every source point before sampling
    #[serde(default)]
    pub offset: [f64; 3],
}

impl RegistrationTransform {
    /// Create a registration transform for the given field volume
    pub fn new(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            location: location.into(),
            offset: [0.0; 3],
        }
    }

    /// Set the per-run offset vector
    pub fn with_offset(mut self, offset: [f64; 3]) -> Self {
        self.offset = offset;
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// The five-counter bundle kept per (region, atlas version) and for the
/// whole tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCounts {
    /// Total nodes counted
    pub total: u64,
    /// Soma nodes
    pub soma: u64,
    /// Undifferentiated path nodes
    pub path: u64,
    /// Branch (fork) nodes
    pub branch: u64,
    /// End-point nodes
    pub end: u64,
}

impl NodeCounts {
    /// Count one node under the given counter kind
    pub fn record(&mut self, kind: CounterKind) {
        self.total += 1;
        match kind {
            CounterKind::Soma => self.soma += 1,
            CounterKind::Path => self.path += 1,
            CounterKind::Branch => self.branch += 1,
            CounterKind::End => self.end += 1,
        }
    }

    /// The defining invariant: total equals the sum of the four parts
    pub fn is_consistent(&self) -> bool {
        self.total == self.soma + self.path + self.branch + self.end
    }
}
