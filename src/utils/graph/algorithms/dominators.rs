//! Dominator tree construction.
//!
//! A node `a` dominates `b` if every path from the entry to `b` passes through
//! `a`. The allocator needs dominance in three places: telling back edges from
//! ordinary edges, rejecting irreducible control flow, and choosing split
//! positions at the start of dominated blocks.
//!
//! The tree is built with the Lengauer-Tarjan algorithm (simple `eval`/`link`
//! with path compression).

use crate::utils::graph::{NodeId, Predecessors, RootedGraph, Successors};

const UNDEFINED: usize = usize::MAX;

/// Immediate dominator relation for the nodes reachable from an entry.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    /// Immediate dominator of each node; the entry and unreachable nodes map
    /// to themselves.
    idom: Vec<NodeId>,
    /// Depth of each node in the tree, `usize::MAX` when unreachable.
    depth: Vec<usize>,
}

impl DominatorTree {
    /// Returns the entry node.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of `node`, `None` for the entry and for
    /// unreachable nodes.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        let idom = *self.idom.get(node.index())?;
        (idom != node).then_some(idom)
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.depth.get(node.index()).is_some_and(|&d| d != UNDEFINED)
    }

    /// Returns `true` if `a` dominates `b`. Every node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return a == b;
        }
        let mut current = b;
        while self.depth[current.index()] > self.depth[a.index()] {
            current = self.idom[current.index()];
        }
        current == a
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the depth of `node` in the tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.depth[node.index()]
    }

    /// Iterates the nodes whose immediate dominator is `node`, ascending.
    pub fn dominated(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.idom
            .iter()
            .enumerate()
            .filter(move |&(index, &idom)| idom == node && index != node.index())
            .map(|(index, _)| NodeId::new(index))
    }

    /// Iterates from `node` up to the entry, `node` included.
    pub fn dominators(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut current = self.is_reachable(node).then_some(node);
        std::iter::from_fn(move || {
            let node = current?;
            current = self.immediate_dominator(node);
            Some(node)
        })
    }
}

/// Computes the dominator tree of the nodes reachable from `entry`.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let n = graph.node_count();
    let mut lt = LengauerTarjan::new(n);
    lt.compute(graph, entry);

    let mut idom: Vec<NodeId> = (0..n).map(NodeId::new).collect();
    let mut depth = vec![UNDEFINED; n];
    if entry.index() < n {
        depth[entry.index()] = 0;
    }
    // Vertices in DFS preorder: an idom is always numbered before its children.
    for &w in lt.vertex.iter().skip(1) {
        let d = lt.idom[w];
        idom[w] = NodeId::new(d);
        depth[w] = depth[d] + 1;
    }

    DominatorTree { entry, idom, depth }
}

/// Computes the dominator tree of a rooted graph.
pub fn compute_dominators_rooted<G: RootedGraph>(graph: &G) -> DominatorTree {
    compute_dominators(graph, graph.entry())
}

struct LengauerTarjan {
    /// DFS preorder number + 1, 0 when unvisited.
    dfnum: Vec<usize>,
    /// Nodes by preorder number.
    vertex: Vec<usize>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<usize>,
    best: Vec<usize>,
    bucket: Vec<Vec<usize>>,
}

impl LengauerTarjan {
    fn new(n: usize) -> Self {
        Self {
            dfnum: vec![0; n],
            vertex: Vec::with_capacity(n),
            parent: vec![UNDEFINED; n],
            semi: (0..n).collect(),
            idom: vec![UNDEFINED; n],
            ancestor: vec![UNDEFINED; n],
            best: (0..n).collect(),
            bucket: vec![Vec::new(); n],
        }
    }

    fn compute<G>(&mut self, graph: &G, entry: NodeId)
    where
        G: Successors + Predecessors,
    {
        if entry.index() >= self.dfnum.len() {
            return;
        }
        self.number(graph, entry.index());

        for i in (1..self.vertex.len()).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w];

            for v in graph.predecessors(NodeId::new(w)) {
                let v = v.index();
                if self.dfnum[v] == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u]] < self.dfnum[self.semi[w]] {
                    self.semi[w] = self.semi[u];
                }
            }

            self.bucket[self.semi[w]].push(w);
            self.ancestor[w] = parent_w;

            for v in std::mem::take(&mut self.bucket[parent_w]) {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] == self.semi[v] {
                    parent_w
                } else {
                    u
                };
            }
        }

        for i in 1..self.vertex.len() {
            let w = self.vertex[i];
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }
        self.idom[entry.index()] = entry.index();
    }

    fn number<G: Successors>(&mut self, graph: &G, start: usize) {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if self.dfnum[node] != 0 {
                continue;
            }
            self.vertex.push(node);
            self.dfnum[node] = self.vertex.len();

            let successors: Vec<usize> = graph.successors(NodeId::new(node)).map(NodeId::index).collect();
            for succ in successors.into_iter().rev() {
                if self.dfnum[succ] == 0 {
                    self.parent[succ] = node;
                    stack.push(succ);
                }
            }
        }
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == UNDEFINED {
            return v;
        }
        self.compress(v);
        self.best[v]
    }

    fn compress(&mut self, v: usize) {
        let mut chain = Vec::new();
        let mut current = v;
        while self.ancestor[self.ancestor[current]] != UNDEFINED {
            chain.push(current);
            current = self.ancestor[current];
        }
        while let Some(node) = chain.pop() {
            let a = self.ancestor[node];
            if self.dfnum[self.semi[self.best[a]]] < self.dfnum[self.semi[self.best[node]]] {
                self.best[node] = self.best[a];
            }
            self.ancestor[node] = self.ancestor[a];
        }
    }
}
