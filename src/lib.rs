// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # linscan
//!
//! A linear-scan register allocator for SSA-form compiler IR.
//!
//! `linscan` takes a control-flow graph of typed SSA instructions, each
//! annotated by instruction selection with the locations its operands may
//! live in, and assigns every value a physical register or a stack slot.
//! Values are split where the register file runs out, moves are inserted
//! between the pieces, and per-safepoint stack maps are produced for the
//! garbage collector.
//!
//! ## Features
//!
//! - **SSA liveness** - Lifetime positions, live-in/live-out sets and live
//!   intervals with holes, use positions and safepoints
//! - **Linear scan** - Register hints, fixed-register constraints, register
//!   pairs for wide values and call clobbers
//! - **Split placement** - Splits moved to block boundaries, out of loops
//! - **Typed spill slots** - Separate int, long, float and double pools with
//!   slot reuse
//! - **Resolution** - Parallel moves between split siblings, across edges
//!   and for phis, sequentialized with swaps
//! - **Validation** - An independent conflict check of the final allocation
//! - **Parallel driver** - Many compilation units allocated concurrently
//!
//! ## Quick Start
//!
//! ```rust
//! use linscan::prelude::*;
//!
//! let mut graph = Graph::new();
//! let entry = graph.add_block();
//! let exit = graph.add_block();
//! graph.add_edge(entry, exit);
//!
//! let a = graph.append(
//!     entry,
//!     InstructionKind::Op("load"),
//!     ValueType::Int,
//!     &[],
//!     LocationSummary::none().with_output(Location::requires_register()),
//! );
//! let b = graph.append(
//!     entry,
//!     InstructionKind::Op("add"),
//!     ValueType::Int,
//!     &[a, a],
//!     LocationSummary::none()
//!         .with_input(Location::requires_register())
//!         .with_input(Location::any())
//!         .with_output(Location::same_as_first_input()),
//! );
//! graph.append(
//!     entry,
//!     InstructionKind::Return,
//!     ValueType::Void,
//!     &[b],
//!     LocationSummary::none().with_input(Location::Register(0)),
//! );
//! graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
//!
//! let allocation = allocate_registers(&mut graph, &TargetConfig::x86_64(), &AllocatorConfig::new())?;
//! println!("{}", allocation.frame);
//! # Ok::<(), linscan::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - The graph the allocator consumes and rewrites
//! - [`analysis`] - Loops, block order and liveness
//! - [`regalloc`] - The allocator, spill slots, resolver, moves and validator
//! - [`pipeline`] - Passes and the per-unit and parallel drivers
//! - [`events`] - What the pipeline did, for tests and tooling
//! - [`utils`] - Bit sets and generic graph algorithms
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Every error is fatal
//! for the unit that raised it:
//!
//! ```rust,no_run
//! use linscan::{Error, ir::Graph, pipeline::allocate_registers, regalloc::{AllocatorConfig, TargetConfig}};
//!
//! let mut graph = Graph::new();
//! match allocate_registers(&mut graph, &TargetConfig::arm(), &AllocatorConfig::new()) {
//!     Ok(allocation) => println!("{}", allocation.frame),
//!     Err(Error::InvalidGraph(reason)) => println!("Bad input: {reason}"),
//!     Err(Error::ValidationFailed { conflicts, .. }) => println!("{}", conflicts.join("\n")),
//!     Err(e) => println!("Other error: {e}"),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ### Fuzzing
//!
//! ```bash
//! # Run fuzzer
//! cargo +nightly fuzz run parallel_move --release
//!
//! # Multi-core fuzzing
//! cargo +nightly fuzz run parallel_move --release -- -jobs=4 -fork=1
//! ```
//!
//! ### Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use linscan::prelude::*;
///
/// let target = TargetConfig::arm();
/// let config = AllocatorConfig::debuggable();
/// assert!(config.debuggable);
/// # let _ = target;
/// ```
pub mod prelude;

/// Control-flow analyses: loop detection, block linearization and SSA
/// liveness with live intervals.
pub mod analysis;

/// Event logging for the allocation pipeline.
pub mod events;

/// The intermediate representation consumed by the allocator.
///
/// # Key Types
///
/// - [`ir::Graph`] - Blocks, edges and instructions
/// - [`ir::Location`] - Registers, pairs, stack slots, constants and
///   unallocated policies
/// - [`ir::LocationSummary`] - Operand constraints per instruction
pub mod ir;

/// Per-unit and parallel allocation drivers.
pub mod pipeline;

/// Linear-scan register allocation.
pub mod regalloc;

/// Bit sets and generic graph algorithms.
pub mod utils;

/// `linscan` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust
/// use linscan::{ir::Graph, Result};
///
/// fn check(graph: &Graph) -> Result<()> {
///     graph.verify()
/// }
/// assert!(check(&Graph::new()).is_err());
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `linscan` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for
/// the categories.
pub use error::Error;
