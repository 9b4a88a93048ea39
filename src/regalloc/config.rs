//! Configuration for the register allocator.
//!
//! [`TargetConfig`] describes the machine: register files, which registers
//! are reserved or preserved across calls, whether wide values need register
//! pairs and how the frame is laid out. [`AllocatorConfig`] holds per-run
//! switches.

use crate::{
    ir::{RegisterClass, ValueType},
    Result,
};

/// Largest register file a [`TargetConfig`] may describe.
pub const MAX_REGISTERS: usize = 64;

/// Description of the target machine.
///
/// Registers are named by index within their class. All sizes are in stack
/// slot units (one slot holds a 32-bit value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Number of core registers (default: 16).
    pub core_registers: usize,

    /// Number of floating-point registers (default: 16).
    pub fp_registers: usize,

    /// Core registers never handed out, such as the stack pointer.
    pub blocked_core_registers: Vec<usize>,

    /// Floating-point registers never handed out.
    pub blocked_fp_registers: Vec<usize>,

    /// Core registers preserved across calls.
    pub callee_save_core_registers: Vec<usize>,

    /// Floating-point registers preserved across calls.
    pub callee_save_fp_registers: Vec<usize>,

    /// Whether a long value occupies two core registers.
    pub long_needs_pair: bool,

    /// Whether a double value occupies two floating-point registers.
    pub double_needs_pair: bool,

    /// Slots reserved at the bottom of the frame for outgoing arguments and
    /// the method pointer.
    pub reserved_out_slots: usize,

    /// Slots needed to save one core register.
    pub core_spill_slot_size: usize,

    /// Slots needed to save one floating-point register.
    pub fp_spill_slot_size: usize,

    /// Frame size alignment, in slots.
    pub stack_alignment: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::x86_64()
    }
}

impl TargetConfig {
    /// Creates a target with the given register files and nothing reserved,
    /// preserved or paired. Slots are one per register and the frame is not
    /// aligned.
    #[must_use]
    pub fn new(core_registers: usize, fp_registers: usize) -> Self {
        Self {
            core_registers,
            fp_registers,
            blocked_core_registers: Vec::new(),
            blocked_fp_registers: Vec::new(),
            callee_save_core_registers: Vec::new(),
            callee_save_fp_registers: Vec::new(),
            long_needs_pair: false,
            double_needs_pair: false,
            reserved_out_slots: 0,
            core_spill_slot_size: 1,
            fp_spill_slot_size: 1,
            stack_alignment: 1,
        }
    }

    /// A 64-bit target modelled on x86-64: `rsp` (4) is reserved, `rbx`,
    /// `rbp` and `r12`-`r15` are callee-save, and the method pointer takes
    /// two slots.
    #[must_use]
    pub fn x86_64() -> Self {
        Self {
            blocked_core_registers: vec![4],
            callee_save_core_registers: vec![3, 5, 12, 13, 14, 15],
            callee_save_fp_registers: vec![12, 13, 14, 15],
            reserved_out_slots: 2,
            core_spill_slot_size: 2,
            fp_spill_slot_size: 2,
            stack_alignment: 4,
            ..Self::new(16, 16)
        }
    }

    /// A 32-bit target modelled on ARM: long values use core register pairs
    /// and double values pairs of single-precision registers.
    #[must_use]
    pub fn arm() -> Self {
        Self {
            // sp, lr, pc and the thread register.
            blocked_core_registers: vec![9, 13, 14, 15],
            callee_save_core_registers: vec![5, 6, 7, 8, 10, 11],
            callee_save_fp_registers: (16..32).collect(),
            long_needs_pair: true,
            double_needs_pair: true,
            reserved_out_slots: 1,
            stack_alignment: 2,
            ..Self::new(16, 32)
        }
    }

    /// Sets the reserved registers of a class.
    #[must_use]
    pub fn with_blocked(mut self, class: RegisterClass, registers: &[usize]) -> Self {
        match class {
            RegisterClass::Core => self.blocked_core_registers = registers.to_vec(),
            RegisterClass::FloatingPoint => self.blocked_fp_registers = registers.to_vec(),
        }
        self
    }

    /// Sets the callee-save registers of a class.
    #[must_use]
    pub fn with_callee_saves(mut self, class: RegisterClass, registers: &[usize]) -> Self {
        match class {
            RegisterClass::Core => self.callee_save_core_registers = registers.to_vec(),
            RegisterClass::FloatingPoint => self.callee_save_fp_registers = registers.to_vec(),
        }
        self
    }

    /// Sets which wide types need register pairs.
    #[must_use]
    pub fn with_pairs(mut self, long_needs_pair: bool, double_needs_pair: bool) -> Self {
        self.long_needs_pair = long_needs_pair;
        self.double_needs_pair = double_needs_pair;
        self
    }

    /// Sets the number of reserved outgoing slots.
    #[must_use]
    pub fn with_reserved_out_slots(mut self, slots: usize) -> Self {
        self.reserved_out_slots = slots;
        self
    }

    /// Sets the frame alignment in slots.
    #[must_use]
    pub fn with_stack_alignment(mut self, slots: usize) -> Self {
        self.stack_alignment = slots;
        self
    }

    /// Number of registers in a class.
    #[must_use]
    pub fn register_count(&self, class: RegisterClass) -> usize {
        match class {
            RegisterClass::Core => self.core_registers,
            RegisterClass::FloatingPoint => self.fp_registers,
        }
    }

    /// Returns `true` if `register` may never be allocated.
    #[must_use]
    pub fn is_blocked(&self, class: RegisterClass, register: usize) -> bool {
        match class {
            RegisterClass::Core => self.blocked_core_registers.contains(&register),
            RegisterClass::FloatingPoint => self.blocked_fp_registers.contains(&register),
        }
    }

    /// Returns `true` if `register` survives calls.
    #[must_use]
    pub fn is_callee_save(&self, class: RegisterClass, register: usize) -> bool {
        match class {
            RegisterClass::Core => self.callee_save_core_registers.contains(&register),
            RegisterClass::FloatingPoint => self.callee_save_fp_registers.contains(&register),
        }
    }

    /// Returns `true` if values of `ty` are held in two registers.
    #[must_use]
    pub fn needs_two_registers(&self, ty: ValueType) -> bool {
        match ty {
            ValueType::Long => self.long_needs_pair,
            ValueType::Double => self.double_needs_pair,
            _ => false,
        }
    }

    /// Checks that the description can be allocated against.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if a register file is
    /// larger than [`MAX_REGISTERS`], a listed register is out of range, or
    /// the stack alignment is zero.
    pub fn verify(&self) -> Result<()> {
        for class in [RegisterClass::Core, RegisterClass::FloatingPoint] {
            let count = self.register_count(class);
            if count > MAX_REGISTERS {
                return Err(invariant_error!(
                    "Target has {} {} registers, at most {} are supported",
                    count,
                    class,
                    MAX_REGISTERS
                ));
            }
            let (blocked, callee_saves) = match class {
                RegisterClass::Core => (&self.blocked_core_registers, &self.callee_save_core_registers),
                RegisterClass::FloatingPoint => (&self.blocked_fp_registers, &self.callee_save_fp_registers),
            };
            if let Some(register) = blocked.iter().chain(callee_saves).find(|&&r| r >= count) {
                return Err(invariant_error!(
                    "{} register {} is out of range for {} registers",
                    class,
                    register,
                    count
                ));
            }
        }
        if self.stack_alignment == 0 {
            return Err(invariant_error!("Stack alignment must be at least one slot"));
        }
        Ok(())
    }
}

/// Per-run switches of the allocation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Keep every value mentioned by an environment alive, so a debugger can
    /// inspect it (default: false).
    pub debuggable: bool,

    /// Run the validator after allocation (default: on in debug builds).
    pub validate: bool,

    /// Insert blocks on critical edges before the analysis (default: true).
    pub split_critical_edges: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            debuggable: false,
            validate: cfg!(debug_assertions),
            split_critical_edges: true,
        }
    }
}

impl AllocatorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for debuggable code.
    #[must_use]
    pub fn debuggable() -> Self {
        Self {
            debuggable: true,
            ..Self::default()
        }
    }

    /// Sets whether the validator runs.
    #[must_use]
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_verify() -> Result<()> {
        TargetConfig::x86_64().verify()?;
        TargetConfig::arm().verify()?;
        TargetConfig::new(4, 2).verify()?;
        Ok(())
    }

    #[test]
    fn test_register_queries() {
        let target = TargetConfig::arm();
        assert!(target.is_blocked(RegisterClass::Core, 13));
        assert!(!target.is_blocked(RegisterClass::FloatingPoint, 13));
        assert!(target.is_callee_save(RegisterClass::FloatingPoint, 16));
        assert!(target.needs_two_registers(ValueType::Long));
        assert!(target.needs_two_registers(ValueType::Double));
        assert!(!target.needs_two_registers(ValueType::Int));
        assert!(!TargetConfig::x86_64().needs_two_registers(ValueType::Long));
    }

    #[test]
    fn test_verify_rejects_bad_targets() {
        assert!(TargetConfig::new(65, 0).verify().is_err());
        assert!(TargetConfig::new(4, 4)
            .with_blocked(RegisterClass::Core, &[4])
            .verify()
            .is_err());
        assert!(TargetConfig::new(4, 4).with_stack_alignment(0).verify().is_err());
    }

    #[test]
    fn test_allocator_config_defaults() {
        let config = AllocatorConfig::default();
        assert!(!config.debuggable);
        assert!(config.split_critical_edges);
        assert!(AllocatorConfig::debuggable().debuggable);
        assert!(!config.with_validation(false).validate);
    }
}
