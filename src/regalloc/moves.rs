//! Sequentialization of parallel moves.
//!
//! A [`ParallelMove`] reads all of its sources before writing any
//! destination. Code generators emit one instruction at a time, so the moves
//! have to be ordered such that no source is overwritten before it is read.
//! Cycles (`r0 -> r1`, `r1 -> r0`) cannot be ordered and are broken with
//! swaps instead of a scratch register.
//!
//! # Algorithm
//!
//! Moves are performed depth first: before performing a move, every move
//! reading its destination is performed. A move found on the current
//! recursion path closes a cycle and is resolved with a swap, after which the
//! sources of the remaining moves are renamed to reflect the exchange.
//!
//! 1. Stack-to-stack moves go first, so a constrained target still has
//!    registers free to route them through.
//! 2. All other moves with non-constant sources follow.
//! 3. Constant loads go last: they block nothing and keep their destination
//!    registers free for the rest of the sequence.
//!
//! Within a cycle mixing wide and narrow moves, wide moves are swapped
//! first, so a pair is never exchanged half by half.
//!
//! # Example
//!
//! ```rust
//! use linscan::ir::{Location, ParallelMove, ValueType};
//! use linscan::regalloc::{resolve_parallel_move, MoveOp};
//!
//! let mut moves = ParallelMove::new(4);
//! moves.add_move(Location::Register(0), Location::Register(1), ValueType::Int, None)?;
//! moves.add_move(Location::Register(1), Location::Register(0), ValueType::Int, None)?;
//!
//! let ops = resolve_parallel_move(&moves)?;
//! assert_eq!(ops.len(), 1);
//! assert!(matches!(ops[0], MoveOp::Swap { .. }));
//! # Ok::<(), linscan::Error>(())
//! ```

use std::fmt;

use crate::{
    ir::{Location, ParallelMove, ValueType},
    Result,
};

/// One step of a sequentialized parallel move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOp {
    /// Copies `source` into `destination`.
    Move {
        /// Location read
        source: Location,
        /// Location written
        destination: Location,
        /// Type of the moved value
        ty: ValueType,
    },
    /// Exchanges the contents of two locations.
    Swap {
        /// First location
        first: Location,
        /// Second location
        second: Location,
        /// Type of the exchanged values
        ty: ValueType,
    },
}

impl fmt::Display for MoveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move {
                source,
                destination,
                ty,
            } => write!(f, "move.{ty} {destination}, {source}"),
            Self::Swap { first, second, ty } => write!(f, "swap.{ty} {first}, {second}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    source: Location,
    destination: Location,
    ty: ValueType,
    pending: bool,
    eliminated: bool,
}

impl PendingMove {
    /// Returns `true` if performing this move requires `location` to still
    /// hold its original contents.
    fn blocks(&self, location: &Location) -> bool {
        !self.eliminated && self.source.overlaps(location)
    }

    fn is_redundant(&self) -> bool {
        self.eliminated || self.source == self.destination
    }
}

/// Orders the moves of a parallel move, breaking cycles with swaps.
///
/// # Arguments
///
/// * `parallel_move` - The moves to sequentialize; destinations must not
///   overlap
///
/// # Returns
///
/// The moves and swaps in execution order. Redundant moves are dropped.
///
/// # Errors
///
/// Returns [`crate::Error::InvariantViolation`] if the moves cannot be
/// ordered, which only happens for malformed input.
pub fn resolve_parallel_move(parallel_move: &ParallelMove) -> Result<Vec<MoveOp>> {
    let mut resolver = ParallelMoveResolver::new(parallel_move);
    resolver.run()?;
    Ok(resolver.emitted)
}

struct ParallelMoveResolver {
    moves: Vec<PendingMove>,
    emitted: Vec<MoveOp>,
}

impl ParallelMoveResolver {
    fn new(parallel_move: &ParallelMove) -> Self {
        let moves = parallel_move
            .moves()
            .iter()
            .filter(|m| m.source != m.destination && m.destination.is_valid())
            .map(|m| PendingMove {
                source: m.source,
                destination: m.destination,
                ty: m.ty,
                pending: false,
                eliminated: false,
            })
            .collect();
        Self {
            moves,
            emitted: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<()> {
        for index in 0..self.moves.len() {
            let pending = &self.moves[index];
            if pending.eliminated || pending.source.is_constant() {
                continue;
            }
            if pending.source.is_stack() && pending.destination.is_stack() {
                self.perform_move(index);
            }
        }

        for index in 0..self.moves.len() {
            let pending = &self.moves[index];
            if !pending.eliminated && !pending.source.is_constant() {
                self.perform_move(index);
            }
        }

        for index in 0..self.moves.len() {
            let pending = self.moves[index];
            if pending.eliminated {
                continue;
            }
            if !pending.source.is_constant() {
                return Err(invariant_error!(
                    "Move {} -> {} left unperformed",
                    pending.source,
                    pending.destination
                ));
            }
            self.emit_move(index);
        }
        Ok(())
    }

    /// Performs the move at `index` after every move it blocks.
    ///
    /// # Returns
    ///
    /// The index of a move higher up the recursion that must be swapped
    /// before this one can make progress, if any.
    fn perform_move(&mut self, index: usize) -> Option<usize> {
        if self.moves[index].is_redundant() {
            // Earlier swaps may have put the value in place already.
            self.moves[index].eliminated = true;
            return None;
        }

        self.moves[index].pending = true;
        let destination = self.moves[index].destination;

        let mut required_swap = None;
        let mut i = 0;
        while i < self.moves.len() {
            if self.moves[i].blocks(&destination) && !self.moves[i].pending {
                required_swap = self.perform_move(i);
                if required_swap == Some(index) {
                    break;
                }
                if required_swap == Some(i) {
                    // `i` was swapped: sources changed, look again.
                    required_swap = None;
                    i = 0;
                    continue;
                }
                if required_swap.is_some() {
                    self.moves[index].pending = false;
                    return required_swap;
                }
            }
            i += 1;
        }

        self.moves[index].pending = false;

        // Swaps further down may have brought the value here already.
        if self.moves[index].source == destination {
            self.moves[index].eliminated = true;
            return None;
        }

        let mut do_swap = required_swap.is_some();
        if !do_swap {
            for other in 0..self.moves.len() {
                if other != index && self.moves[other].blocks(&destination) {
                    if !self.moves[index].ty.is_wide() && self.moves[other].ty.is_wide() {
                        return Some(other);
                    }
                    do_swap = true;
                    break;
                }
            }
        }

        if do_swap {
            self.emit_swap(index);
            required_swap
        } else {
            self.emit_move(index);
            None
        }
    }

    fn emit_move(&mut self, index: usize) {
        let pending = &mut self.moves[index];
        pending.eliminated = true;
        self.emitted.push(MoveOp::Move {
            source: pending.source,
            destination: pending.destination,
            ty: pending.ty,
        });
    }

    fn emit_swap(&mut self, index: usize) {
        let pending = &mut self.moves[index];
        pending.eliminated = true;
        let (source, destination) = (pending.source, pending.destination);
        self.emitted.push(MoveOp::Swap {
            first: source,
            second: destination,
            ty: pending.ty,
        });

        for other in &mut self.moves {
            if other.blocks(&source) {
                update_source(other, source, destination);
            } else if other.blocks(&destination) {
                update_source(other, destination, source);
            }
        }
    }
}

/// Renames the source of `pending` after `swapped` and `new_source` were
/// exchanged. `swapped` may be a pair while `pending` reads a single half.
fn update_source(pending: &mut PendingMove, swapped: Location, new_source: Location) {
    if swapped.low() == pending.source {
        pending.source = new_source.low();
    } else if swapped.high() == pending.source {
        pending.source = new_source.high();
    } else {
        pending.source = new_source;
    }
}
