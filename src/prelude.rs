//! # linscan Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! and traits from the linscan library. Import this module to get quick access
//! to everything needed to build a graph and allocate it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all linscan operations
pub use crate::Error;

/// The result type used throughout linscan
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Per-unit and parallel allocation drivers
pub use crate::pipeline::{
    allocate_registers, allocate_units, run_passes, Allocation, CriticalEdgeSplittingPass, Pass,
};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Graph, instructions and operand locations
pub use crate::ir::{
    Block, BlockId, CallKind, Environment, Graph, InstrId, Instruction, InstructionKind, Location,
    LocationSummary, ParallelMove, Policy, RegisterClass, ValueType,
};

// ================================================================================================
// Analysis
// ================================================================================================

/// Liveness and live intervals
pub use crate::analysis::{IntervalId, LiveInterval, LiveRange, SsaLivenessAnalysis, UsePosition};

// ================================================================================================
// Register Allocation
// ================================================================================================

/// Allocator, configuration and move sequentialization
pub use crate::regalloc::{
    resolve_parallel_move, AllocatorConfig, FrameLayout, MoveOp, RegisterAllocator, TargetConfig,
};

// ================================================================================================
// Events
// ================================================================================================

/// Pipeline event log
pub use crate::events::{DerivedStats, Event, EventKind, EventLog};
