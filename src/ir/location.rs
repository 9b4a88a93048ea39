//! Operand locations and per-instruction location summaries.
//!
//! Instruction selection describes what every instruction needs from the
//! allocator with a [`LocationSummary`]: where each input must be, which
//! scratch registers it needs, where its result goes and whether it calls out.
//! Before allocation most of these are [`Location::Unallocated`] policies; the
//! resolver overwrites them in place with the concrete locations chosen.

use std::{collections::BTreeSet, fmt};

use crate::ir::InstrId;

/// What an unallocated location asks the allocator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Any location will do, a stack slot included.
    Any,
    /// A core register.
    RequiresRegister,
    /// A floating-point register.
    RequiresFpuRegister,
    /// The output must be in the same location as the first input.
    SameAsFirstInput,
}

/// A storage location for a value.
///
/// Stack slots are numbered in slot units. A [`Location::DoubleStackSlot`]
/// at index `i` occupies slots `i` and `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// No location. Also used for outputs of instructions emitted at their
    /// use site, which therefore get no live interval.
    #[default]
    Invalid,
    /// The value of a constant instruction, materialized where needed.
    Constant(InstrId),
    /// A core register.
    Register(usize),
    /// A floating-point register.
    FpuRegister(usize),
    /// Two core registers holding a wide value.
    RegisterPair {
        /// Register holding the low half
        low: usize,
        /// Register holding the high half
        high: usize,
    },
    /// Two floating-point registers holding a wide value.
    FpuRegisterPair {
        /// Register holding the low half
        low: usize,
        /// Register holding the high half
        high: usize,
    },
    /// A single stack slot.
    StackSlot(usize),
    /// Two consecutive stack slots.
    DoubleStackSlot(usize),
    /// Not yet allocated; the policy says what is acceptable.
    Unallocated(Policy),
}

/// One indivisible piece of storage, used to decide whether two locations
/// alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Core(usize),
    Fpu(usize),
    Slot(usize),
}

impl Location {
    /// Shorthand for [`Location::Unallocated`] with [`Policy::Any`].
    #[must_use]
    pub const fn any() -> Self {
        Self::Unallocated(Policy::Any)
    }

    /// Shorthand for [`Location::Unallocated`] with [`Policy::RequiresRegister`].
    #[must_use]
    pub const fn requires_register() -> Self {
        Self::Unallocated(Policy::RequiresRegister)
    }

    /// Shorthand for [`Location::Unallocated`] with [`Policy::RequiresFpuRegister`].
    #[must_use]
    pub const fn requires_fpu_register() -> Self {
        Self::Unallocated(Policy::RequiresFpuRegister)
    }

    /// Shorthand for [`Location::Unallocated`] with [`Policy::SameAsFirstInput`].
    #[must_use]
    pub const fn same_as_first_input() -> Self {
        Self::Unallocated(Policy::SameAsFirstInput)
    }

    /// Returns `true` unless this is [`Location::Invalid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns `true` for [`Location::Invalid`].
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Returns `true` for constants.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns `true` for a single core register.
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Returns `true` for a single floating-point register.
    #[must_use]
    pub const fn is_fpu_register(&self) -> bool {
        matches!(self, Self::FpuRegister(_))
    }

    /// Returns `true` for core and floating-point register pairs.
    #[must_use]
    pub const fn is_pair(&self) -> bool {
        matches!(self, Self::RegisterPair { .. } | Self::FpuRegisterPair { .. })
    }

    /// Returns `true` for any register or register pair.
    #[must_use]
    pub const fn is_register_kind(&self) -> bool {
        matches!(
            self,
            Self::Register(_)
                | Self::FpuRegister(_)
                | Self::RegisterPair { .. }
                | Self::FpuRegisterPair { .. }
        )
    }

    /// Returns `true` for single and double stack slots.
    #[must_use]
    pub const fn is_stack(&self) -> bool {
        matches!(self, Self::StackSlot(_) | Self::DoubleStackSlot(_))
    }

    /// Returns `true` for unallocated locations.
    #[must_use]
    pub const fn is_unallocated(&self) -> bool {
        matches!(self, Self::Unallocated(_))
    }

    /// Returns `true` for locations chosen by instruction selection rather
    /// than by the allocator: registers, pairs and stack slots.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.is_register_kind() || self.is_stack()
    }

    /// Returns the policy of an unallocated location.
    #[must_use]
    pub const fn policy(&self) -> Option<Policy> {
        match self {
            Self::Unallocated(policy) => Some(*policy),
            _ => None,
        }
    }

    /// Returns `true` if this is an unallocated location that only accepts
    /// a register.
    #[must_use]
    pub const fn requires_register_kind(&self) -> bool {
        matches!(
            self,
            Self::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister)
        )
    }

    /// Returns the register, or the low register of a pair.
    #[must_use]
    pub const fn register(&self) -> Option<usize> {
        match self {
            Self::Register(reg) | Self::FpuRegister(reg) => Some(*reg),
            Self::RegisterPair { low, .. } | Self::FpuRegisterPair { low, .. } => Some(*low),
            _ => None,
        }
    }

    /// Returns the stack slot index of a single or double stack slot.
    #[must_use]
    pub const fn stack_index(&self) -> Option<usize> {
        match self {
            Self::StackSlot(slot) | Self::DoubleStackSlot(slot) => Some(*slot),
            _ => None,
        }
    }

    /// Returns the low half of a pair or double stack slot, or `self`.
    #[must_use]
    pub const fn low(&self) -> Self {
        match *self {
            Self::RegisterPair { low, .. } => Self::Register(low),
            Self::FpuRegisterPair { low, .. } => Self::FpuRegister(low),
            Self::DoubleStackSlot(slot) => Self::StackSlot(slot),
            other => other,
        }
    }

    /// Returns the high half of a pair or double stack slot, or `self`.
    #[must_use]
    pub const fn high(&self) -> Self {
        match *self {
            Self::RegisterPair { high, .. } => Self::Register(high),
            Self::FpuRegisterPair { high, .. } => Self::FpuRegister(high),
            Self::DoubleStackSlot(slot) => Self::StackSlot(slot + 1),
            other => other,
        }
    }

    /// Returns `true` if `other` is this location or one of its halves.
    #[must_use]
    pub fn contains(&self, other: Location) -> bool {
        *self == other
            || ((self.is_pair() || matches!(self, Self::DoubleStackSlot(_)))
                && (self.low() == other || self.high() == other))
    }

    /// Returns `true` if writing one location clobbers part of the other.
    #[must_use]
    pub fn overlaps(&self, other: &Location) -> bool {
        let mine = self.units();
        let theirs = other.units();
        mine.iter().flatten().any(|u| theirs.iter().flatten().any(|v| u == v))
    }

    fn units(&self) -> [Option<Unit>; 2] {
        match *self {
            Self::Register(reg) => [Some(Unit::Core(reg)), None],
            Self::FpuRegister(reg) => [Some(Unit::Fpu(reg)), None],
            Self::RegisterPair { low, high } => [Some(Unit::Core(low)), Some(Unit::Core(high))],
            Self::FpuRegisterPair { low, high } => [Some(Unit::Fpu(low)), Some(Unit::Fpu(high))],
            Self::StackSlot(slot) => [Some(Unit::Slot(slot)), None],
            Self::DoubleStackSlot(slot) => [Some(Unit::Slot(slot)), Some(Unit::Slot(slot + 1))],
            Self::Invalid | Self::Constant(_) | Self::Unallocated(_) => [None, None],
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("invalid"),
            Self::Constant(id) => write!(f, "#{id}"),
            Self::Register(reg) => write!(f, "r{reg}"),
            Self::FpuRegister(reg) => write!(f, "f{reg}"),
            Self::RegisterPair { low, high } => write!(f, "(r{low},r{high})"),
            Self::FpuRegisterPair { low, high } => write!(f, "(f{low},f{high})"),
            Self::StackSlot(slot) => write!(f, "[sp+{slot}]"),
            Self::DoubleStackSlot(slot) => write!(f, "[sp+{slot}]:2"),
            Self::Unallocated(Policy::Any) => f.write_str("U(any)"),
            Self::Unallocated(Policy::RequiresRegister) => f.write_str("U(reg)"),
            Self::Unallocated(Policy::RequiresFpuRegister) => f.write_str("U(fpu)"),
            Self::Unallocated(Policy::SameAsFirstInput) => f.write_str("U(same)"),
        }
    }
}

/// How an instruction calls out of compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallKind {
    /// Never calls.
    #[default]
    NoCall,
    /// Calls only on an out-of-line slow path, which saves live registers.
    CallOnSlowPath,
    /// Always calls; caller-save registers are clobbered.
    Call,
}

/// A set of core and floating-point registers, as 64-bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterSet {
    core: u64,
    floating_point: u64,
}

impl RegisterSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            core: 0,
            floating_point: 0,
        }
    }

    /// Adds a register location; pairs add both halves and every other
    /// location kind is ignored.
    pub fn add(&mut self, location: Location) {
        match location {
            Location::Register(reg) => self.core |= 1 << reg,
            Location::FpuRegister(reg) => self.floating_point |= 1 << reg,
            Location::RegisterPair { low, high } => self.core |= (1 << low) | (1 << high),
            Location::FpuRegisterPair { low, high } => {
                self.floating_point |= (1 << low) | (1 << high);
            }
            _ => {}
        }
    }

    /// Returns `true` if the core register is in the set.
    #[must_use]
    pub const fn contains_core(&self, reg: usize) -> bool {
        self.core & (1 << reg) != 0
    }

    /// Returns `true` if the floating-point register is in the set.
    #[must_use]
    pub const fn contains_floating_point(&self, reg: usize) -> bool {
        self.floating_point & (1 << reg) != 0
    }

    /// The core registers as a bit mask.
    #[must_use]
    pub const fn core_mask(&self) -> u64 {
        self.core
    }

    /// The floating-point registers as a bit mask.
    #[must_use]
    pub const fn floating_point_mask(&self) -> u64 {
        self.floating_point
    }

    /// Total number of registers in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.core.count_ones() + self.floating_point.count_ones()) as usize
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.core == 0 && self.floating_point == 0
    }
}

/// The operand constraints of one instruction, and after allocation its
/// concrete operand locations and stack map.
///
/// # Examples
///
/// ```rust
/// use linscan::ir::{CallKind, Location, LocationSummary};
///
/// // add r, r -> r, result may share an input register
/// let add = LocationSummary::new(CallKind::NoCall)
///     .with_input(Location::requires_register())
///     .with_input(Location::requires_register())
///     .with_output(Location::requires_register())
///     .no_output_overlap();
///
/// assert!(!add.output_can_overlap_with_inputs());
/// assert!(!add.needs_safepoint());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationSummary {
    inputs: Vec<Location>,
    temps: Vec<Location>,
    output: Location,
    output_overlaps: bool,
    call_kind: CallKind,
    live_registers: RegisterSet,
    register_mask: u64,
    stack_mask: BTreeSet<usize>,
}

impl LocationSummary {
    /// Creates an empty summary with the given call kind. The output, once
    /// set, may overlap the inputs unless [`Self::no_output_overlap`] is used.
    #[must_use]
    pub fn new(call_kind: CallKind) -> Self {
        Self {
            call_kind,
            output_overlaps: true,
            ..Self::default()
        }
    }

    /// A summary for an instruction without operands that never calls.
    #[must_use]
    pub fn none() -> Self {
        Self::new(CallKind::NoCall)
    }

    /// Appends an input location.
    #[must_use]
    pub fn with_input(mut self, location: Location) -> Self {
        self.inputs.push(location);
        self
    }

    /// Appends a temp location.
    #[must_use]
    pub fn with_temp(mut self, location: Location) -> Self {
        self.temps.push(location);
        self
    }

    /// Sets the output location.
    #[must_use]
    pub fn with_output(mut self, location: Location) -> Self {
        self.output = location;
        self
    }

    /// Lets the output share a register with an input that dies at this
    /// instruction.
    #[must_use]
    pub fn no_output_overlap(mut self) -> Self {
        self.output_overlaps = false;
        self
    }

    /// Number of inputs.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// The location of input `index`.
    #[must_use]
    pub fn in_at(&self, index: usize) -> Location {
        self.inputs.get(index).copied().unwrap_or_default()
    }

    /// Replaces the location of input `index`, growing the input list when a
    /// summary was built with fewer inputs than the instruction has.
    pub fn set_in_at(&mut self, index: usize, location: Location) {
        if index >= self.inputs.len() {
            self.inputs.resize(index + 1, Location::Invalid);
        }
        self.inputs[index] = location;
    }

    /// All input locations.
    #[must_use]
    pub fn inputs(&self) -> &[Location] {
        &self.inputs
    }

    /// Number of temps.
    #[must_use]
    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    /// The location of temp `index`.
    #[must_use]
    pub fn temp(&self, index: usize) -> Location {
        self.temps.get(index).copied().unwrap_or_default()
    }

    /// Replaces the location of temp `index`.
    pub fn set_temp_at(&mut self, index: usize, location: Location) {
        if let Some(slot) = self.temps.get_mut(index) {
            *slot = location;
        }
    }

    /// All temp locations.
    #[must_use]
    pub fn temps(&self) -> &[Location] {
        &self.temps
    }

    /// The output location.
    #[must_use]
    pub fn out(&self) -> Location {
        self.output
    }

    /// Replaces the output location.
    pub fn set_out(&mut self, location: Location) {
        self.output = location;
    }

    /// Whether the output must not share a register with any input.
    #[must_use]
    pub fn output_can_overlap_with_inputs(&self) -> bool {
        self.output_overlaps
    }

    /// Whether input `index` was pinned by instruction selection.
    #[must_use]
    pub fn is_fixed_input(&self, index: usize) -> bool {
        self.in_at(index).is_fixed()
    }

    /// Whether the output must live where input `index` lives.
    #[must_use]
    pub fn output_uses_same_as(&self, index: usize) -> bool {
        index == 0 && self.output == Location::same_as_first_input()
    }

    /// The call kind.
    #[must_use]
    pub fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    /// Whether a stack map must be recorded for this instruction.
    #[must_use]
    pub fn needs_safepoint(&self) -> bool {
        self.call_kind != CallKind::NoCall
    }

    /// Whether the instruction always calls.
    #[must_use]
    pub fn will_call(&self) -> bool {
        self.call_kind == CallKind::Call
    }

    /// Whether the instruction calls only on its slow path.
    #[must_use]
    pub fn only_calls_on_slow_path(&self) -> bool {
        self.call_kind == CallKind::CallOnSlowPath
    }

    /// Whether the instruction may call at all.
    #[must_use]
    pub fn can_call(&self) -> bool {
        self.needs_safepoint()
    }

    /// Records a register as live across this safepoint.
    pub fn add_live_register(&mut self, location: Location) {
        self.live_registers.add(location);
    }

    /// Registers live across this safepoint.
    #[must_use]
    pub fn live_registers(&self) -> RegisterSet {
        self.live_registers
    }

    /// Marks a core register as holding a reference at this safepoint.
    pub fn set_register_bit(&mut self, reg: usize) {
        self.register_mask |= 1 << reg;
    }

    /// Core registers holding references at this safepoint.
    #[must_use]
    pub fn register_mask(&self) -> u64 {
        self.register_mask
    }

    /// Marks a stack slot as holding a reference at this safepoint.
    pub fn set_stack_bit(&mut self, slot: usize) {
        self.stack_mask.insert(slot);
    }

    /// Stack slots holding references at this safepoint, ascending.
    #[must_use]
    pub fn stack_mask(&self) -> &BTreeSet<usize> {
        &self.stack_mask
    }
}
