//! Moves inserted by the allocator.
//!
//! All moves of one [`ParallelMove`] happen at once: every source is read
//! before any destination is written. The resolver in
//! [`crate::regalloc::moves`] turns them into a sequence of plain moves and
//! swaps.

use std::fmt;

use crate::{
    ir::{InstrId, Location, ValueType},
    Result,
};

/// A single move of a parallel move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOperands {
    /// Where the value is read from.
    pub source: Location,
    /// Where the value is written to.
    pub destination: Location,
    /// Type of the moved value.
    pub ty: ValueType,
    /// The value being moved, if the move carries one.
    pub instruction: Option<InstrId>,
}

impl fmt::Display for MoveOperands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// A set of moves performed simultaneously at one lifetime position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelMove {
    position: usize,
    moves: Vec<MoveOperands>,
}

impl ParallelMove {
    /// Creates an empty parallel move at `position`.
    #[must_use]
    pub fn new(position: usize) -> Self {
        Self {
            position,
            moves: Vec::new(),
        }
    }

    /// The lifetime position the moves happen at.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The moves, in insertion order.
    #[must_use]
    pub fn moves(&self) -> &[MoveOperands] {
        &self.moves
    }

    /// Number of moves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Returns `true` if there are no moves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Adds a move.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if `destination` overlaps
    /// the destination of a move already present: the result of the parallel
    /// move would be undefined.
    pub fn add_move(
        &mut self,
        source: Location,
        destination: Location,
        ty: ValueType,
        instruction: Option<InstrId>,
    ) -> Result<()> {
        if let Some(existing) = self
            .moves
            .iter()
            .find(|m| m.destination.overlaps(&destination))
        {
            return Err(invariant_error!(
                "Overlapping destinations at {}: {} and {}",
                self.position,
                existing,
                MoveOperands {
                    source,
                    destination,
                    ty,
                    instruction
                }
            ));
        }
        self.moves.push(MoveOperands {
            source,
            destination,
            ty,
            instruction,
        });
        Ok(())
    }
}

impl fmt::Display for ParallelMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let moves: Vec<String> = self.moves.iter().map(ToString::to_string).collect();
        write!(f, "@{} {{{}}}", self.position, moves.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_parallel_move_rejects_overlapping_destinations() {
        let mut moves = ParallelMove::new(9);
        moves
            .add_move(Location::Register(0), Location::DoubleStackSlot(2), ValueType::Long, None)
            .unwrap();
        moves
            .add_move(Location::Register(1), Location::Register(0), ValueType::Int, None)
            .unwrap();

        let err = moves
            .add_move(Location::Register(2), Location::StackSlot(3), ValueType::Int, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
        assert_eq!(moves.len(), 2);
        assert_eq!(moves.to_string(), "@9 {r0 -> [sp+2]:2, r1 -> r0}");
    }
}
