//! Graph infrastructure for control-flow analysis.
//!
//! The IR graph implements the traits in [`traits`]; the algorithms in
//! [`algorithms`] only rely on those traits.

pub mod algorithms;
mod node;
mod traits;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};

#[cfg(test)]
pub(crate) use traits::testing;
