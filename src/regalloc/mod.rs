//! Linear-scan register allocation.
//!
//! This module turns the live intervals computed by
//! [`crate::analysis::SsaLivenessAnalysis`] into concrete locations. It is
//! split along the phases of the allocator:
//!
//! - [`config`] - the machine description and per-run switches
//! - `allocator` - interval construction and the linear scan proper
//! - [`spill`] - typed spill-slot pools and the final frame layout
//! - `resolver` - rewriting the graph with final locations, inserting moves
//!   between split siblings and for phis, and recording stack maps
//! - [`moves`] - ordering the moves of a parallel move for emission
//! - `validator` - an independent check that no two intervals share a
//!   location while both are live
//!
//! # Usage
//!
//! ```rust,no_run
//! use linscan::analysis::SsaLivenessAnalysis;
//! use linscan::events::EventLog;
//! use linscan::ir::Graph;
//! use linscan::regalloc::{RegisterAllocator, TargetConfig};
//!
//! # fn build() -> Graph { Graph::new() }
//! let mut graph = build();
//! let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
//! let target = TargetConfig::x86_64();
//! let events = EventLog::new();
//!
//! let mut allocator = RegisterAllocator::new(&mut graph, &mut liveness, &target, &events)?;
//! allocator.allocate_registers()?;
//! allocator.validate()?;
//! # Ok::<(), linscan::Error>(())
//! ```
//!
//! Most callers go through [`crate::pipeline::allocate_registers`], which
//! also splits critical edges and runs the validator on request.

mod allocator;
pub mod config;
pub mod moves;
mod resolver;
pub mod spill;
mod validator;

pub use allocator::RegisterAllocator;
pub use config::{AllocatorConfig, TargetConfig, MAX_REGISTERS};
pub use moves::{resolve_parallel_move, MoveOp};
pub use spill::{FrameLayout, SpillSlots};
pub use validator::validate_intervals;
