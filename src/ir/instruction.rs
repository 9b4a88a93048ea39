//! SSA instructions and their deoptimization environments.

use std::fmt;

use crate::ir::{BlockId, Location, LocationSummary, ParallelMove, ValueType};

/// Identifier of an instruction within its [`Graph`](crate::ir::Graph).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub(crate) usize);

impl InstrId {
    /// Creates an id from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        InstrId(index)
    }

    /// Returns the raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrId({})", self.0)
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// What an instruction does, as far as allocation is concerned.
///
/// Arithmetic and memory operations are not told apart: their register needs
/// are fully described by their [`LocationSummary`], so they share
/// [`InstructionKind::Op`].
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Merges one input per predecessor.
    Phi,
    /// An integer or floating-point constant, stored as raw bits.
    Constant(i64),
    /// The null reference.
    NullConstant,
    /// An incoming parameter.
    Parameter {
        /// Position in the parameter list
        index: usize,
        /// Slot in the caller's outgoing area where the argument can be found
        /// or saved, counted from the start of the incoming area.
        stack_slot: usize,
    },
    /// Unconditional jump to the single successor.
    Goto,
    /// Conditional branch to the first (true) or second successor.
    If,
    /// Returns its input.
    Return,
    /// Returns nothing.
    ReturnVoid,
    /// Terminates the exit block.
    Exit,
    /// Transfers to the interpreter; its environment is always kept alive.
    Deoptimize,
    /// Polls for thread suspension at a loop header.
    SuspendCheck,
    /// Any other operation, named for diagnostics.
    Op(&'static str),
    /// Moves inserted by the allocator.
    ParallelMove(ParallelMove),
}

impl InstructionKind {
    /// Short mnemonic used in dumps.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Phi => "Phi",
            Self::Constant(_) => "Constant",
            Self::NullConstant => "NullConstant",
            Self::Parameter { .. } => "ParameterValue",
            Self::Goto => "Goto",
            Self::If => "If",
            Self::Return => "Return",
            Self::ReturnVoid => "ReturnVoid",
            Self::Exit => "Exit",
            Self::Deoptimize => "Deoptimize",
            Self::SuspendCheck => "SuspendCheck",
            Self::Op(name) => *name,
            Self::ParallelMove(_) => "ParallelMove",
        }
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Self::Goto | Self::If | Self::Return | Self::ReturnVoid | Self::Exit | Self::Deoptimize
        )
    }
}

/// The state the interpreter needs to resume execution at an instruction.
///
/// `values` lists the SSA value held by each virtual register (`None` for a
/// dead one); `parent` is the environment of the caller when the instruction
/// was inlined. After allocation, `locations` holds where each value is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    /// Value per virtual register.
    pub values: Vec<Option<InstrId>>,
    /// Location per virtual register, filled in by the allocator.
    pub locations: Vec<Location>,
    /// Environment of the inlining caller.
    pub parent: Option<Box<Environment>>,
}

impl Environment {
    /// Creates an environment over the given virtual registers.
    #[must_use]
    pub fn new(values: Vec<Option<InstrId>>) -> Self {
        let locations = vec![Location::Invalid; values.len()];
        Self {
            values,
            locations,
            parent: None,
        }
    }

    /// Sets the caller environment.
    #[must_use]
    pub fn with_parent(mut self, parent: Environment) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// The environment at `depth`, `0` being this one.
    #[must_use]
    pub fn at_depth(&self, depth: usize) -> Option<&Environment> {
        let mut env = self;
        for _ in 0..depth {
            env = env.parent.as_deref()?;
        }
        Some(env)
    }

    /// Mutable access to the environment at `depth`.
    pub fn at_depth_mut(&mut self, depth: usize) -> Option<&mut Environment> {
        let mut env = self;
        for _ in 0..depth {
            env = env.parent.as_deref_mut()?;
        }
        Some(env)
    }

    /// Iterates `(depth, environment)` from this one outwards.
    pub fn chain(&self) -> impl Iterator<Item = (usize, &Environment)> {
        let mut next = Some(self);
        let mut depth = 0;
        std::iter::from_fn(move || {
            let env = next?;
            next = env.parent.as_deref();
            depth += 1;
            Some((depth - 1, env))
        })
    }
}

/// An SSA instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InstrId,
    pub(crate) block: BlockId,
    /// What the instruction does.
    pub kind: InstructionKind,
    /// Type of the produced value, [`ValueType::Void`] if none.
    pub ty: ValueType,
    /// Values consumed, in operand order.
    pub inputs: Vec<InstrId>,
    /// Operand constraints, rewritten with final locations by the allocator.
    pub locations: LocationSummary,
    /// Interpreter state at this instruction.
    pub environment: Option<Environment>,
}

impl Instruction {
    /// The id of this instruction.
    #[must_use]
    pub fn id(&self) -> InstrId {
        self.id
    }

    /// The block holding this instruction.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Returns `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstructionKind::Phi)
    }

    /// Returns `true` for integer, floating-point and null constants.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::Constant(_) | InstructionKind::NullConstant
        )
    }

    /// Returns `true` for the null constant.
    #[must_use]
    pub fn is_null_constant(&self) -> bool {
        matches!(self.kind, InstructionKind::NullConstant)
    }

    /// Returns `true` for incoming parameters.
    #[must_use]
    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, InstructionKind::Parameter { .. })
    }

    /// Returns `true` for deoptimization points.
    #[must_use]
    pub fn is_deoptimize(&self) -> bool {
        matches!(self.kind, InstructionKind::Deoptimize)
    }

    /// Returns the parallel move if this is one.
    #[must_use]
    pub fn as_parallel_move(&self) -> Option<&ParallelMove> {
        match &self.kind {
            InstructionKind::ParallelMove(moves) => Some(moves),
            _ => None,
        }
    }

    /// Mutable access to the parallel move if this is one.
    pub fn as_parallel_move_mut(&mut self) -> Option<&mut ParallelMove> {
        match &mut self.kind {
            InstructionKind::ParallelMove(moves) => Some(moves),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.kind.name())?;
        if let InstructionKind::ParallelMove(moves) = &self.kind {
            return write!(f, " {moves}");
        }
        if !self.inputs.is_empty() {
            let inputs: Vec<String> = self.inputs.iter().map(ToString::to_string).collect();
            write!(f, "({})", inputs.join(", "))?;
        }
        if self.ty != ValueType::Void {
            write!(f, " -> {}", self.ty)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_chain() {
        let caller = Environment::new(vec![Some(InstrId::new(1))]);
        let mut env = Environment::new(vec![None, Some(InstrId::new(2))]).with_parent(caller);

        let depths: Vec<usize> = env.chain().map(|(d, _)| d).collect();
        assert_eq!(depths, vec![0, 1]);
        assert_eq!(env.at_depth(1).map(|e| e.values.len()), Some(1));
        assert!(env.at_depth(2).is_none());

        if let Some(parent) = env.at_depth_mut(1) {
            parent.locations[0] = Location::Register(4);
        }
        assert_eq!(env.at_depth(1).map(|e| e.locations[0]), Some(Location::Register(4)));
        assert_eq!(env.locations, vec![Location::Invalid; 2]);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(InstructionKind::Op("Add").name(), "Add");
        assert!(InstructionKind::If.is_control_flow());
        assert!(!InstructionKind::SuspendCheck.is_control_flow());
        assert_eq!(InstrId::new(7).to_string(), "i7");
    }
}
