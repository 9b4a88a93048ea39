//! Depth-first traversals.
//!
//! All traversals are iterative so deeply nested control flow cannot overflow
//! the stack. Successors are explored in edge order, which makes the produced
//! orders deterministic for a given graph.

use crate::utils::graph::{NodeId, Successors};

/// Depth-first search iterator yielding nodes in pre-order.
pub struct DfsIterator<'g, G: Successors> {
    graph: &'g G,
    stack: Vec<NodeId>,
    visited: Vec<bool>,
}

impl<G: Successors> Iterator for DfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if self.visited[node.index()] {
                continue;
            }
            self.visited[node.index()] = true;

            let successors: Vec<NodeId> = self.graph.successors(node).collect();
            for succ in successors.into_iter().rev() {
                if !self.visited[succ.index()] {
                    self.stack.push(succ);
                }
            }
            return Some(node);
        }
        None
    }
}

/// Returns a depth-first pre-order iterator starting at `start`.
///
/// Nodes not reachable from `start` are not visited; an out-of-range start
/// yields nothing.
pub fn dfs<G: Successors>(graph: &G, start: NodeId) -> DfsIterator<'_, G> {
    let node_count = graph.node_count();
    let stack = if start.index() < node_count {
        vec![start]
    } else {
        Vec::new()
    };
    DfsIterator {
        graph,
        stack,
        visited: vec![false; node_count],
    }
}

/// Computes the post-order of the nodes reachable from `start`.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);
    // (node, successors, next successor to visit)
    let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();

    visited[start.index()] = true;
    stack.push((start, graph.successors(start).collect(), 0));

    while let Some((node, successors, cursor)) = stack.last_mut() {
        if let Some(&succ) = successors.get(*cursor) {
            *cursor += 1;
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                let next = graph.successors(succ).collect();
                stack.push((succ, next, 0));
            }
        } else {
            result.push(*node);
            stack.pop();
        }
    }

    result
}

/// Computes the reverse post-order of the nodes reachable from `start`.
///
/// In reverse post-order every node appears before its successors, except
/// along retreating edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::traits::testing::EdgeGraph;

    fn ids(raw: &[usize]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn test_dfs_preorder() {
        let graph = EdgeGraph::new(4, &[(0, 1), (0, 2), (1, 3)]);
        let order: Vec<NodeId> = dfs(&graph, NodeId::new(0)).collect();
        assert_eq!(order, ids(&[0, 1, 3, 2]));
        assert_eq!(dfs(&graph, NodeId::new(9)).count(), 0);
    }

    #[test]
    fn test_postorder_diamond() {
        let graph = EdgeGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[3, 1, 2, 0]));
        assert_eq!(reverse_postorder(&graph, NodeId::new(0)), ids(&[0, 2, 1, 3]));
    }

    #[test]
    fn test_postorder_true_dfs_with_loop() {
        // The loop body must finish before the header even though the header
        // is reachable through the back edge.
        let graph = EdgeGraph::new(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let order = postorder(&graph, NodeId::new(0));
        assert_eq!(order, ids(&[2, 3, 1, 0]));
    }

    #[test]
    fn test_postorder_skips_unreachable() {
        let graph = EdgeGraph::new(3, &[(0, 1)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[1, 0]));
    }
}
