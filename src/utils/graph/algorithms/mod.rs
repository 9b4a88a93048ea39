//! Graph algorithms used by loop detection and block linearization.
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | [`postorder`] / [`reverse_postorder`] | O(V + E) | Loop discovery, retreating edges |
//! | [`compute_dominators`] | O(V α(V)) | Back edges, irreducibility, split heuristics |

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorTree};
pub use traversal::{dfs, postorder, reverse_postorder, DfsIterator};
