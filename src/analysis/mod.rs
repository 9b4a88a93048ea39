//! Control-flow and liveness analyses feeding the register allocator.
//!
//! - [`loops`] finds natural loops and rejects irreducible control flow
//! - [`order`] computes the linear block order lifetime positions follow
//! - [`liveness`] numbers instructions and builds the live intervals
//!
//! [`liveness::SsaLivenessAnalysis::analyze`] runs the three in sequence.

pub mod liveness;
pub mod loops;
pub mod order;

pub use liveness::{
    BlockLiveness, IntervalArena, IntervalFlags, IntervalId, LiveInterval, LiveRange,
    SafepointPosition, SsaLivenessAnalysis, UseKind, UsePosition,
};
pub use loops::{detect_loops, LoopForest, LoopId, LoopInfo};
pub use order::linearize;
