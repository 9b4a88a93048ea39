//! Block linearization.
//!
//! Lifetime positions are assigned along a single linear order of the
//! blocks. That order must be a reverse post-order (every block after its
//! dominator) in which the blocks of each loop are contiguous, so a value
//! live around a loop is covered by one uninterrupted span of positions.
//!
//! Blocks are released once all their forward predecessors (predecessors
//! other than back edges) have been placed. Released blocks wait on a
//! worklist popped from the end; a new block is pushed below every waiting
//! block of a loop it is not part of, so loops are finished before the code
//! after them starts.

use crate::{
    analysis::loops::LoopForest,
    utils::graph::{NodeId, RootedGraph},
    Result,
};

/// Computes the linear block order of the reachable blocks of `graph`.
///
/// # Errors
///
/// Returns [`crate::Error::InvariantViolation`] if some reachable block is
/// never released, which only happens when `loops` does not describe
/// `graph`.
pub fn linearize<G>(graph: &G, loops: &LoopForest, reachable: &[bool]) -> Result<Vec<NodeId>>
where
    G: RootedGraph,
{
    let block_count = graph.node_count();
    let mut forward_predecessors = vec![0usize; block_count];
    for block in graph.node_ids() {
        if !reachable[block.index()] {
            continue;
        }
        let back_edges = loops
            .loop_for_header(block)
            .map_or(0, |id| loops.get(id).back_edges.len());
        let reachable_preds = graph
            .predecessors(block)
            .filter(|pred| reachable[pred.index()])
            .count();
        forward_predecessors[block.index()] = reachable_preds - back_edges;
    }

    let entry = graph.entry();
    let mut order = Vec::with_capacity(block_count);
    let mut worklist = vec![entry];
    while let Some(current) = worklist.pop() {
        order.push(current);
        for successor in graph.successors(current) {
            let remaining = &mut forward_predecessors[successor.index()];
            if *remaining == 1 {
                add_to_worklist(&mut worklist, successor, loops);
            }
            *remaining = remaining.saturating_sub(1);
        }
    }

    let expected = reachable.iter().filter(|&&r| r).count();
    if order.len() != expected {
        return Err(invariant_error!(
            "Linear order holds {} of {} reachable blocks",
            order.len(),
            expected
        ));
    }
    Ok(order)
}

/// Inserts `block` above the last worklist entry it may be processed before.
fn add_to_worklist(worklist: &mut Vec<NodeId>, block: NodeId, loops: &LoopForest) {
    let block_loop = loops.innermost_loop(block);
    let mut insert_at = worklist.len();
    while insert_at > 0 {
        let other_loop = loops.innermost_loop(worklist[insert_at - 1]);
        let can_go_first = match (block_loop, other_loop) {
            (_, None) => true,
            (Some(mine), Some(other)) => mine == other || loops.is_nested_in(mine, other),
            (None, Some(_)) => false,
        };
        if can_go_first {
            break;
        }
        insert_at -= 1;
    }
    worklist.insert(insert_at, block);
}
