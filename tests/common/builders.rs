//! Test data builders for creating source tracings

use tracemap::types::{SourceNode, StructureClass, ROOT_PARENT};

/// Builder for chains of source nodes with sequential sample numbers, each
/// node parented to the one added before it
pub struct TracingBuilder {
    nodes: Vec<SourceNode>,
    radius: f64,
}

impl TracingBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            radius: 1.0,
        }
    }

    /// Radius applied to nodes added after this call
    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Append a soma node
    pub fn soma(self, position: [f64; 3]) -> Self {
        self.node(StructureClass::Soma, position)
    }

    /// Append an undifferentiated path node
    pub fn path(self, position: [f64; 3]) -> Self {
        self.node(StructureClass::Undefined, position)
    }

    /// Append a fork point
    pub fn branch(self, position: [f64; 3]) -> Self {
        self.node(StructureClass::ForkPoint, position)
    }

    /// Append an end point
    pub fn end(self, position: [f64; 3]) -> Self {
        self.node(StructureClass::EndPoint, position)
    }

    /// Append a node of the given class
    pub fn node(mut self, structure: StructureClass, position: [f64; 3]) -> Self {
        let sample_number = self.nodes.len() as i64 + 1;
        let parent_number = if self.nodes.is_empty() {
            ROOT_PARENT
        } else {
            sample_number - 1
        };
        self.nodes.push(
            SourceNode::new(sample_number, parent_number, position, self.radius, structure)
                .with_id(sample_number * 100),
        );
        self
    }

    pub fn build(self) -> Vec<SourceNode> {
        self.nodes
    }

    /// The three-node chain most tests start from: a soma at the origin
    /// voxel, one path node, one end point
    pub fn small_chain() -> Vec<SourceNode> {
        TracingBuilder::new()
            .soma([0.5, 0.5, 0.5])
            .path([1.5, 0.5, 0.5])
            .end([2.5, 0.5, 0.5])
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_builder_links_chain() {
        let nodes = TracingBuilder::small_chain();

        assert_eq!(nodes.len(), 3);
        assert!(nodes[0].is_root());
        assert_eq!(nodes[1].parent_number, 1);
        assert_eq!(nodes[2].parent_number, 2);
        assert_eq!(nodes[0].structure, StructureClass::Soma);
        assert_eq!(nodes[2].structure, StructureClass::EndPoint);
        assert_eq!(nodes[1].id, 200);
    }
}
