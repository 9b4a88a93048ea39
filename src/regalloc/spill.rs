//! Spill slot pools and the frame layout derived from them.
//!
//! Values that leave their register live in a stack slot for their whole
//! lifetime. Slots are drawn from four pools by type so a slot never holds
//! values of different sizes or register files over time. A slot is free
//! again once the last sibling of its previous occupant has ended.
//!
//! # Frame Layout
//!
//! Slot indices are pool-relative during allocation. Once the pools are
//! final, the frame is laid out from the top:
//!
//! ```text
//! [parameter slots        ]  caller frame
//! [double spill slots     ]
//! [long spill slots       ]
//! [float spill slots      ]
//! [int/reference slots    ]
//! [reserved outgoing slots]  bottom of the frame
//! ```

use std::fmt;

use crate::{
    ir::{RegisterClass, ValueType},
    regalloc::TargetConfig,
    Result,
};

/// The typed spill slot pools of one compilation unit.
///
/// Each pool entry holds the position at which the slot's current occupant
/// dies.
#[derive(Debug, Clone, Default)]
pub struct SpillSlots {
    int: Vec<usize>,
    long: Vec<usize>,
    float: Vec<usize>,
    double: Vec<usize>,
}

impl SpillSlots {
    /// Creates empty pools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_mut(&mut self, ty: ValueType) -> Result<&mut Vec<usize>> {
        match ty {
            ValueType::Double => Ok(&mut self.double),
            ValueType::Long => Ok(&mut self.long),
            ValueType::Float => Ok(&mut self.float),
            ValueType::Boolean
            | ValueType::Byte
            | ValueType::Char
            | ValueType::Short
            | ValueType::Int
            | ValueType::Reference => Ok(&mut self.int),
            ValueType::Void => Err(invariant_error!("Cannot spill a value of type void")),
        }
    }

    /// Finds a slot (two for wide types) of the pool for `ty` that is free
    /// at `start`, marks it busy until `end` and returns its pool-relative
    /// index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] for [`ValueType::Void`].
    pub fn allocate(&mut self, ty: ValueType, start: usize, end: usize) -> Result<usize> {
        let pool = self.pool_mut(ty)?;
        let free = |slot: usize| pool.get(slot).map_or(true, |&busy_until| busy_until <= start);

        if ty.is_wide() {
            let slot = (0..pool.len())
                .find(|&slot| free(slot) && free(slot + 1))
                .unwrap_or(pool.len());
            if pool.len() < slot + 2 {
                pool.resize(slot + 2, end);
            }
            pool[slot] = end;
            pool[slot + 1] = end;
            Ok(slot)
        } else {
            let slot = (0..pool.len()).find(|&slot| free(slot)).unwrap_or(pool.len());
            if slot == pool.len() {
                pool.push(end);
            } else {
                pool[slot] = end;
            }
            Ok(slot)
        }
    }

    /// Slots in the int/reference pool.
    #[must_use]
    pub fn int_slots(&self) -> usize {
        self.int.len()
    }

    /// Slots in the long pool.
    #[must_use]
    pub fn long_slots(&self) -> usize {
        self.long.len()
    }

    /// Slots in the float pool.
    #[must_use]
    pub fn float_slots(&self) -> usize {
        self.float.len()
    }

    /// Slots in the double pool.
    #[must_use]
    pub fn double_slots(&self) -> usize {
        self.double.len()
    }

    /// Slots across all pools.
    #[must_use]
    pub fn total(&self) -> usize {
        self.int.len() + self.long.len() + self.float.len() + self.double.len()
    }

    /// Maps a pool-relative slot to its frame slot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] for [`ValueType::Void`].
    pub fn frame_slot(&self, ty: ValueType, slot: usize, reserved_out_slots: usize) -> Result<usize> {
        let below = match ty {
            ValueType::Double => self.long.len() + self.float.len() + self.int.len(),
            ValueType::Long => self.float.len() + self.int.len(),
            ValueType::Float => self.int.len(),
            ValueType::Void => return Err(invariant_error!("Cannot spill a value of type void")),
            _ => 0,
        };
        Ok(slot + below + reserved_out_slots)
    }
}

/// Frame summary handed to code generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLayout {
    /// Slots of the int/reference pool.
    pub int_spill_slots: usize,
    /// Slots of the long pool.
    pub long_spill_slots: usize,
    /// Slots of the float pool.
    pub float_spill_slots: usize,
    /// Slots of the double pool.
    pub double_spill_slots: usize,
    /// Outgoing argument slots at the bottom of the frame.
    pub reserved_out_slots: usize,
    /// Most core registers live at one slow-path call.
    pub max_live_core_registers: usize,
    /// Most floating-point registers live at one slow-path call.
    pub max_live_fp_registers: usize,
    /// Callee-save core registers the allocation used; the prologue saves them.
    pub callee_save_core_registers: Vec<usize>,
    /// Callee-save floating-point registers the allocation used.
    pub callee_save_fp_registers: Vec<usize>,
    /// Total frame size in slots, aligned.
    pub frame_size: usize,
}

impl FrameLayout {
    /// Lays out the frame for the given pools and register usage.
    ///
    /// `allocated_core` and `allocated_fp` are bit masks of the registers
    /// handed out by the allocator.
    #[must_use]
    pub fn compute(
        spills: &SpillSlots,
        target: &TargetConfig,
        max_live_core_registers: usize,
        max_live_fp_registers: usize,
        allocated_core: u64,
        allocated_fp: u64,
    ) -> Self {
        let used = |mask: u64, class: RegisterClass| -> Vec<usize> {
            (0..target.register_count(class))
                .filter(|&reg| mask & (1u64 << reg) != 0 && target.is_callee_save(class, reg))
                .collect()
        };
        let callee_save_core_registers = used(allocated_core, RegisterClass::Core);
        let callee_save_fp_registers = used(allocated_fp, RegisterClass::FloatingPoint);

        let unaligned = spills.total()
            + target.reserved_out_slots
            + max_live_core_registers * target.core_spill_slot_size
            + max_live_fp_registers * target.fp_spill_slot_size
            + callee_save_core_registers.len() * target.core_spill_slot_size
            + callee_save_fp_registers.len() * target.fp_spill_slot_size;
        let alignment = target.stack_alignment.max(1);

        Self {
            int_spill_slots: spills.int_slots(),
            long_spill_slots: spills.long_slots(),
            float_spill_slots: spills.float_slots(),
            double_spill_slots: spills.double_slots(),
            reserved_out_slots: target.reserved_out_slots,
            max_live_core_registers,
            max_live_fp_registers,
            callee_save_core_registers,
            callee_save_fp_registers,
            frame_size: unaligned.div_ceil(alignment) * alignment,
        }
    }

    /// Spill slots across all pools.
    #[must_use]
    pub fn spill_slots(&self) -> usize {
        self.int_spill_slots + self.long_spill_slots + self.float_spill_slots + self.double_spill_slots
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} slots: spills int={} long={} float={} double={}, out={}, live at slow paths core={} fp={}",
            self.frame_size,
            self.int_spill_slots,
            self.long_spill_slots,
            self.float_spill_slots,
            self.double_spill_slots,
            self.reserved_out_slots,
            self.max_live_core_registers,
            self.max_live_fp_registers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_reused_after_death() -> Result<()> {
        let mut slots = SpillSlots::new();
        assert_eq!(slots.allocate(ValueType::Int, 2, 10)?, 0);
        assert_eq!(slots.allocate(ValueType::Reference, 4, 8)?, 1);
        // Slot 1 is free again at 8.
        assert_eq!(slots.allocate(ValueType::Int, 8, 20)?, 1);
        assert_eq!(slots.allocate(ValueType::Int, 12, 14)?, 0);
        assert_eq!(slots.int_slots(), 2);
        Ok(())
    }

    #[test]
    fn test_wide_slots_take_two() -> Result<()> {
        let mut slots = SpillSlots::new();
        assert_eq!(slots.allocate(ValueType::Long, 0, 10)?, 0);
        assert_eq!(slots.allocate(ValueType::Long, 2, 6)?, 2);
        assert_eq!(slots.long_slots(), 4);
        assert_eq!(slots.allocate(ValueType::Long, 6, 8)?, 2);

        // Types never share a pool.
        assert_eq!(slots.allocate(ValueType::Double, 0, 4)?, 0);
        assert_eq!(slots.allocate(ValueType::Float, 0, 4)?, 0);
        assert_eq!(slots.total(), 7);
        assert!(slots.allocate(ValueType::Void, 0, 4).is_err());
        Ok(())
    }

    #[test]
    fn test_frame_slot_layout() -> Result<()> {
        let mut slots = SpillSlots::new();
        slots.allocate(ValueType::Int, 0, 4)?;
        slots.allocate(ValueType::Float, 0, 4)?;
        slots.allocate(ValueType::Long, 0, 4)?;
        slots.allocate(ValueType::Double, 0, 4)?;

        assert_eq!(slots.frame_slot(ValueType::Int, 0, 2)?, 2);
        assert_eq!(slots.frame_slot(ValueType::Float, 0, 2)?, 3);
        assert_eq!(slots.frame_slot(ValueType::Long, 0, 2)?, 4);
        assert_eq!(slots.frame_slot(ValueType::Double, 0, 2)?, 6);
        Ok(())
    }

    #[test]
    fn test_frame_layout_size() {
        let mut slots = SpillSlots::new();
        slots.allocate(ValueType::Int, 0, 4).unwrap();
        let target = TargetConfig::x86_64();
        // rbx (3) is callee-save, rax (0) is not.
        let frame = FrameLayout::compute(&slots, &target, 1, 0, 0b1001, 0);
        assert_eq!(frame.callee_save_core_registers, vec![3]);
        // 1 spill + 2 out + 1 live core * 2 + 1 callee save * 2 = 7, aligned to 8.
        assert_eq!(frame.frame_size, 8);
        assert_eq!(frame.spill_slots(), 1);
    }
}
