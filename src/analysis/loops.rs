//! Natural loop detection.
//!
//! Loops are found from back edges: an edge `n -> h` where `h` dominates `n`.
//! Each header gets one [`LoopInfo`] whose body is every block that reaches a
//! back edge source without passing through the header. A retreating edge
//! whose target does not dominate its source means the loop can be entered
//! in the middle; such irreducible control flow is rejected.
//!
//! # Loop Structure
//!
//! ```text
//!     [preheader]
//!          |
//!          v
//!     [header] <------+  <- dominates all loop blocks
//!          |          |
//!          v          |
//!     [body ...]      |
//!          |          |
//!          v          |
//!     [back edge] ----+
//!          |
//!          v
//!     [exit ...]
//! ```

use std::collections::HashMap;

use crate::{
    utils::{
        graph::{algorithms::reverse_postorder, algorithms::DominatorTree, NodeId, RootedGraph},
        BitSet,
    },
    Error, Result,
};

/// Index of a loop in its [`LoopForest`].
pub type LoopId = usize;

/// A natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// The header block (single entry point, dominates all loop blocks).
    pub header: NodeId,

    /// All blocks in the loop body, header included.
    pub body: BitSet,

    /// Sources of the back edges, in discovery order.
    pub back_edges: Vec<NodeId>,

    /// Single predecessor of the header outside the loop, if there is one.
    pub preheader: Option<NodeId>,

    /// Nesting depth, 0 for outermost loops.
    pub depth: usize,

    /// The smallest enclosing loop.
    pub parent: Option<LoopId>,

    /// Loops directly nested in this one.
    pub children: Vec<LoopId>,
}

impl LoopInfo {
    /// Creates a loop containing only its header.
    #[must_use]
    pub fn new(header: NodeId, block_count: usize) -> Self {
        let mut body = BitSet::new(block_count);
        body.insert(header.index());
        Self {
            header,
            body,
            back_edges: Vec::new(),
            preheader: None,
            depth: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, block: NodeId) -> bool {
        self.body.contains(block.index())
    }

    /// Returns the number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.count()
    }

    /// Returns true if `block` is the source of a back edge of this loop.
    #[must_use]
    pub fn is_back_edge(&self, block: NodeId) -> bool {
        self.back_edges.contains(&block)
    }

    /// Returns true if the loop has no nested loops.
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }
}

/// Every loop of a graph with the innermost loop of each block.
#[derive(Debug, Clone)]
pub struct LoopForest {
    loops: Vec<LoopInfo>,
    /// Innermost loop containing each block.
    block_to_loop: Vec<Option<LoopId>>,
}

impl LoopForest {
    /// Creates an empty loop forest.
    #[must_use]
    pub fn new(block_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            block_to_loop: vec![None; block_count],
        }
    }

    /// Returns all loops, sorted by header.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Returns the loop with the given id.
    #[must_use]
    pub fn get(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id]
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Returns the innermost loop containing `block`.
    #[must_use]
    pub fn innermost_loop(&self, block: NodeId) -> Option<LoopId> {
        self.block_to_loop.get(block.index()).copied().flatten()
    }

    /// Returns the loop headed by `header`.
    #[must_use]
    pub fn loop_for_header(&self, header: NodeId) -> Option<LoopId> {
        self.innermost_loop(header)
            .filter(|&id| self.loops[id].header == header)
    }

    /// Returns true if `block` is a loop header.
    #[must_use]
    pub fn is_loop_header(&self, block: NodeId) -> bool {
        self.loop_for_header(block).is_some()
    }

    /// Returns the loop depth of a block, 0 outside any loop.
    #[must_use]
    pub fn loop_depth(&self, block: NodeId) -> usize {
        self.innermost_loop(block)
            .map_or(0, |id| self.loops[id].depth + 1)
    }

    /// Returns true if `block` is in any loop.
    #[must_use]
    pub fn is_in_loop(&self, block: NodeId) -> bool {
        self.innermost_loop(block).is_some()
    }

    /// Iterates the loops containing `block`, innermost first.
    pub fn enclosing_loops(&self, block: NodeId) -> impl Iterator<Item = LoopId> + '_ {
        let mut current = self.innermost_loop(block);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.loops[id].parent;
            Some(id)
        })
    }

    /// Returns true if loop `inner` is `outer` or nested in it.
    #[must_use]
    pub fn is_nested_in(&self, inner: LoopId, outer: LoopId) -> bool {
        self.loops[outer].contains(self.loops[inner].header)
    }

    /// Iterates over all loops.
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter()
    }
}

/// Detects the natural loops of a graph.
///
/// # Errors
///
/// Returns [`Error::IrreducibleLoop`] naming the target of the first
/// retreating edge, in reverse post-order, whose target does not dominate
/// its source.
pub fn detect_loops<G>(graph: &G, dominators: &DominatorTree) -> Result<LoopForest>
where
    G: RootedGraph,
{
    let block_count = graph.node_count();
    let order = reverse_postorder(graph, graph.entry());
    let mut rpo_number = vec![usize::MAX; block_count];
    for (number, block) in order.iter().enumerate() {
        rpo_number[block.index()] = number;
    }

    let mut loops_by_header: HashMap<NodeId, LoopInfo> = HashMap::new();
    for &node in &order {
        for succ in graph.successors(node) {
            if rpo_number[succ.index()] > rpo_number[node.index()] {
                continue;
            }
            if !dominators.dominates(succ, node) {
                return Err(Error::IrreducibleLoop(succ));
            }

            let loop_info = loops_by_header
                .entry(succ)
                .or_insert_with(|| LoopInfo::new(succ, block_count));
            loop_info.back_edges.push(node);
            expand_loop_body(graph, dominators, loop_info, node);
        }
    }

    for loop_info in loops_by_header.values_mut() {
        compute_preheader(graph, loop_info);
    }

    let mut loops: Vec<LoopInfo> = loops_by_header.into_values().collect();
    loops.sort_by_key(|l| l.header.index());
    compute_nesting(&mut loops);

    let mut forest = LoopForest::new(block_count);
    for (id, loop_info) in loops.iter().enumerate() {
        for block in loop_info.body.iter() {
            let slot = &mut forest.block_to_loop[block];
            let deeper = match *slot {
                Some(existing) => loops[existing].depth < loop_info.depth,
                None => true,
            };
            if deeper {
                *slot = Some(id);
            }
        }
    }
    forest.loops = loops;
    Ok(forest)
}

/// Adds every block reaching `back_edge` without passing through the header.
fn expand_loop_body<G>(
    graph: &G,
    dominators: &DominatorTree,
    loop_info: &mut LoopInfo,
    back_edge: NodeId,
) where
    G: RootedGraph,
{
    let mut worklist = vec![back_edge];
    while let Some(node) = worklist.pop() {
        if loop_info.body.contains(node.index()) {
            continue;
        }
        loop_info.body.insert(node.index());
        for pred in graph.predecessors(node) {
            if dominators.is_reachable(pred) && !loop_info.body.contains(pred.index()) {
                worklist.push(pred);
            }
        }
    }
}

fn compute_preheader<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: RootedGraph,
{
    let outside: Vec<NodeId> = graph
        .predecessors(loop_info.header)
        .filter(|&pred| !loop_info.contains(pred))
        .collect();
    loop_info.preheader = match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    };
}

/// Links each loop to the smallest loop containing its header.
fn compute_nesting(loops: &mut [LoopInfo]) {
    let n = loops.len();
    for i in 0..n {
        let header = loops[i].header;
        let parent = (0..n)
            .filter(|&j| j != i && loops[j].contains(header))
            .min_by_key(|&j| loops[j].size());
        loops[i].parent = parent;
    }

    for i in 0..n {
        if let Some(parent) = loops[i].parent {
            loops[parent].children.push(i);
        }
    }

    for i in 0..n {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(parent) = current {
            depth += 1;
            current = loops[parent].parent;
        }
        loops[i].depth = depth;
    }
}
