//! Trait definitions for graph abstractions.
//!
//! Dominator and traversal algorithms are written against these traits so the
//! same code serves the IR graph and the small adjacency graphs used in tests.
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - outgoing edges
//! - [`Predecessors`] - incoming edges
//! - [`RootedGraph`] - a designated entry node

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers, ascending.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
///
/// Successors are yielded in edge order. For a control-flow graph this is the
/// branch order (the taken successor of a conditional first), which block
/// linearization depends on.
pub trait Successors: GraphBase {
    /// Returns an iterator over the direct successors of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
///
/// The order of predecessors is significant for graphs carrying phi
/// instructions: the n-th phi input flows in from the n-th predecessor.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the direct predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Edge-list graph for exercising the algorithms in isolation.
    pub(crate) struct EdgeGraph {
        pub(crate) node_count: usize,
        pub(crate) edges: Vec<(usize, usize)>,
    }

    impl EdgeGraph {
        pub(crate) fn new(node_count: usize, edges: &[(usize, usize)]) -> Self {
            Self {
                node_count,
                edges: edges.to_vec(),
            }
        }
    }

    impl GraphBase for EdgeGraph {
        fn node_count(&self) -> usize {
            self.node_count
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.node_count).map(NodeId::new)
        }
    }

    impl Successors for EdgeGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.edges
                .iter()
                .filter(move |(src, _)| *src == node.index())
                .map(|&(_, dst)| NodeId::new(dst))
        }
    }

    impl Predecessors for EdgeGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.edges
                .iter()
                .filter(move |(_, dst)| *dst == node.index())
                .map(|&(src, _)| NodeId::new(src))
        }
    }

    impl RootedGraph for EdgeGraph {
        fn entry(&self) -> NodeId {
            NodeId::new(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::EdgeGraph, *};

    #[test]
    fn test_successors_keep_edge_order() {
        let graph = EdgeGraph::new(4, &[(0, 2), (0, 1), (1, 3)]);
        let succ: Vec<NodeId> = graph.successors(NodeId::new(0)).collect();
        assert_eq!(succ, vec![NodeId::new(2), NodeId::new(1)]);
    }

    #[test]
    fn test_predecessors() {
        let graph = EdgeGraph::new(3, &[(0, 2), (1, 2)]);
        let preds: Vec<NodeId> = graph.predecessors(NodeId::new(2)).collect();
        assert_eq!(preds, vec![NodeId::new(0), NodeId::new(1)]);
        assert_eq!(graph.predecessors(NodeId::new(0)).count(), 0);
        assert_eq!(graph.entry(), NodeId::new(0));
    }
}
