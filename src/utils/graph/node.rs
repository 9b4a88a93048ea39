//! Strongly-typed node identifiers.
//!
//! Blocks of the control-flow graph are addressed by [`NodeId`]; the IR exposes
//! it under the alias `BlockId`. Identifiers are dense, starting at 0, so
//! per-block analysis results are stored in plain vectors indexed by
//! [`NodeId::index`].

use std::fmt;

/// A strongly-typed identifier for a node within a directed graph.
///
/// `NodeId` wraps a `usize` index so node indices cannot be confused with
/// instruction ids, SSA indices or lifetime positions.
///
/// # Examples
///
/// ```rust
/// use linscan::utils::graph::NodeId;
///
/// let data = vec!["entry", "loop", "exit"];
/// let node = NodeId::new(1);
/// assert_eq!(data[node.index()], "loop");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}
