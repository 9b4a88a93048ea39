//! The intermediate representation the allocator consumes.
//!
//! A [`Graph`] of basic blocks holding typed SSA [`Instruction`]s. Each
//! instruction carries the [`LocationSummary`] produced by instruction
//! selection; the allocator rewrites those summaries with final locations,
//! fills in [`Environment`] locations and splices [`ParallelMove`]
//! instructions into the blocks.
//!
//! # Key Types
//!
//! - [`Graph`] / [`Block`] - blocks, edges and the instruction arena
//! - [`Instruction`] / [`InstructionKind`] - SSA instructions
//! - [`Location`] / [`Policy`] - where a value is or must be
//! - [`LocationSummary`] - operand constraints and stack maps
//! - [`ParallelMove`] - simultaneous moves inserted by the allocator

mod graph;
mod instruction;
mod location;
mod parallel_move;
mod types;

pub use graph::{Block, BlockId, Graph};
pub use instruction::{Environment, InstrId, Instruction, InstructionKind};
pub use location::{CallKind, Location, LocationSummary, Policy, RegisterSet};
pub use parallel_move::{MoveOperands, ParallelMove};
pub use types::{RegisterClass, ValueType};
