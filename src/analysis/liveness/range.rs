//! Ranges, use positions and safepoints of live intervals.

use std::fmt;

use crate::ir::InstrId;

/// A half-open span `[start, end)` of lifetime positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    /// First position covered.
    pub start: usize,
    /// First position no longer covered.
    pub end: usize,
}

impl LiveRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `position` is in the range.
    #[must_use]
    pub const fn covers(&self, position: usize) -> bool {
        self.start <= position && position < self.end
    }

    /// Returns `true` if the range lies entirely before `other`.
    #[must_use]
    pub const fn is_before(&self, other: &LiveRange) -> bool {
        self.end <= other.start
    }

    /// Returns the first position covered by both ranges.
    #[must_use]
    pub fn intersection(&self, other: &LiveRange) -> Option<usize> {
        let start = self.start.max(other.start);
        (start < self.end.min(other.end)).then_some(start)
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// How a value is consumed at a [`UsePosition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKind {
    /// Operand `n` of a regular instruction.
    Input(usize),
    /// Input `n` of a phi, consumed at the end of predecessor `n`.
    PhiInput(usize),
    /// Virtual register `index` of the environment at `depth` of the user.
    Environment {
        /// Distance from the user's own environment, 0 for that one.
        depth: usize,
        /// Virtual register index.
        index: usize,
    },
    /// Scratch register `n` of the user.
    Temp(usize),
    /// Added at a loop's back edge to keep the value in a register there.
    Synthesized,
}

/// One use of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsePosition {
    /// The consuming instruction, `None` for synthesized uses.
    pub user: Option<InstrId>,
    /// What slot of the user consumes the value.
    pub kind: UseKind,
    /// Lifetime position of the use.
    pub position: usize,
    /// Whether the value must be in a register at this use.
    pub requires_register: bool,
}

impl UsePosition {
    /// Creates a use.
    #[must_use]
    pub const fn new(
        user: Option<InstrId>,
        kind: UseKind,
        position: usize,
        requires_register: bool,
    ) -> Self {
        Self {
            user,
            kind,
            position,
            requires_register,
        }
    }

    /// Creates a back-edge use at `position`.
    #[must_use]
    pub const fn synthesized(position: usize) -> Self {
        Self::new(None, UseKind::Synthesized, position, false)
    }

    /// Returns `true` for back-edge uses.
    #[must_use]
    pub const fn is_synthesized(&self) -> bool {
        matches!(self.kind, UseKind::Synthesized)
    }

    /// Returns `true` for environment uses.
    #[must_use]
    pub const fn is_environment(&self) -> bool {
        matches!(self.kind, UseKind::Environment { .. })
    }
}

impl fmt::Display for UsePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position)?;
        if self.requires_register {
            f.write_str("(reg)")?;
        }
        Ok(())
    }
}

/// A safepoint the value is live across.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafepointPosition {
    /// The instruction needing a stack map.
    pub instruction: InstrId,
    /// Its lifetime position.
    pub position: usize,
    /// Whether the instruction always calls, clobbering caller-save registers.
    pub will_call: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_intersection() {
        let a = LiveRange::new(2, 10);
        assert_eq!(a.intersection(&LiveRange::new(8, 12)), Some(8));
        assert_eq!(a.intersection(&LiveRange::new(0, 3)), Some(2));
        assert_eq!(a.intersection(&LiveRange::new(10, 12)), None);
        assert!(a.is_before(&LiveRange::new(10, 12)));
        assert!(a.covers(9));
        assert!(!a.covers(10));
    }

    #[test]
    fn test_use_position_kinds() {
        let synthesized = UsePosition::synthesized(24);
        assert!(synthesized.is_synthesized());
        assert!(!synthesized.requires_register);

        let env = UsePosition::new(
            Some(InstrId::new(3)),
            UseKind::Environment { depth: 0, index: 1 },
            8,
            false,
        );
        assert!(env.is_environment());
        assert_eq!(LiveRange::new(4, 6).to_string(), "[4,6)");
    }
}
