//! Checking an allocation for conflicts.
//!
//! The validator replays every interval sibling onto a grid with one row per
//! register and spill slot and one column per lifetime position. Two
//! intervals marking the same cell hold different values in the same place at
//! the same time, which is reported as a conflict.
//!
//! The single legitimate overlap is an output reusing the register of an
//! input that dies at the definition: both cover the definition position,
//! but the input is read before the output is written.

use crate::{
    analysis::{IntervalId, SsaLivenessAnalysis},
    ir::{Graph, RegisterClass},
    regalloc::{allocator::RegisterAllocator, TargetConfig},
    utils::BitSet,
    Error, Result,
};

/// Checks that no two of `intervals` share a register or spill slot while
/// both are live.
///
/// Every sibling of every listed interval is checked. Spill slots are the
/// final frame slots written by resolution; slots of parameters live in the
/// caller's frame and are skipped.
///
/// # Arguments
///
/// * `graph` - The allocated graph
/// * `liveness` - Its liveness, holding the intervals
/// * `intervals` - Interval families of `class` to check
/// * `spill_slots` - Number of spill slots in the frame
/// * `target` - The machine description
/// * `class` - The register class being checked
///
/// # Errors
///
/// Returns [`Error::ValidationFailed`] listing every conflict found.
pub fn validate_intervals(
    graph: &Graph,
    liveness: &SsaLivenessAnalysis,
    intervals: &[IntervalId],
    spill_slots: usize,
    target: &TargetConfig,
    class: RegisterClass,
) -> Result<()> {
    let arena = liveness.intervals();
    let registers = target.register_count(class);
    let positions = intervals
        .iter()
        .flat_map(|&id| arena.siblings(id))
        .map(|id| arena[id].end())
        .max()
        .unwrap_or(0);

    let mut register_rows = vec![BitSet::new(positions); registers];
    let mut slot_rows = vec![BitSet::new(positions); spill_slots];
    let mut conflicts = Vec::new();

    for &family in intervals {
        let parent = &arena[family];
        let defined_by = parent.defined_by();
        let is_parameter = defined_by.is_some_and(|id| graph.instruction(id).is_parameter());

        for sibling in arena.siblings(family) {
            let current = &arena[sibling];

            if let (Some(slot), false) = (parent.spill_slot(), is_parameter) {
                let width = if parent.needs_two_spill_slots() { 2 } else { 1 };
                for offset in 0..width {
                    let row = (slot + offset).checked_sub(target.reserved_out_slots);
                    let Some(bits) = row.and_then(|row| slot_rows.get_mut(row)) else {
                        conflicts.push(format!("{sibling}: spill slot {slot} is outside the frame"));
                        continue;
                    };
                    for range in current.ranges() {
                        for position in range.start..range.end {
                            if bits.contains(position) {
                                conflicts.push(format!(
                                    "{sibling}: spill slot {} already in use at {position}",
                                    slot + offset
                                ));
                            } else {
                                bits.insert(position);
                            }
                        }
                    }
                }
            }

            let Some(reg) = current.register() else {
                continue;
            };
            let Some(bits) = register_rows.get_mut(reg) else {
                conflicts.push(format!("{sibling}: register {reg} does not exist in class {class}"));
                continue;
            };
            let reuses_input = reuses_dying_input(graph, liveness, sibling);
            for range in current.ranges() {
                for position in range.start..range.end {
                    if bits.contains(position) {
                        if reuses_input {
                            continue;
                        }
                        conflicts.push(format!(
                            "{sibling} {current}: register {reg} already in use at {position}"
                        ));
                    } else {
                        bits.insert(position);
                    }
                }
            }
        }
    }

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(Error::ValidationFailed { class, conflicts })
    }
}

/// Returns `true` if `interval` is an unsplit definition that took the
/// register of one of its inputs, and that input dies at the definition.
fn reuses_dying_input(graph: &Graph, liveness: &SsaLivenessAnalysis, interval: IntervalId) -> bool {
    let arena = liveness.intervals();
    let current = &arena[interval];
    let (Some(defined_by), false) = (current.defined_by(), current.is_split()) else {
        return false;
    };
    let Some(position) = liveness.position(defined_by) else {
        return false;
    };
    let instruction = graph.instruction(defined_by);
    if instruction.locations.output_can_overlap_with_inputs() {
        return false;
    }

    for &input in &instruction.inputs {
        let Some(mut input_interval) = liveness.interval(input) else {
            continue;
        };
        if current.is_high() {
            match arena[input_interval].high_interval() {
                Some(high) => input_interval = high,
                None => continue,
            }
        }
        let covering = arena
            .siblings(input_interval)
            .find(|&sibling| arena[sibling].covers(position));
        if let Some(covering) = covering {
            let other = &arena[covering];
            if other.is_floating_point() == current.is_floating_point()
                && other.register() == current.register()
            {
                return !other.covers(position + 1);
            }
        }
    }
    false
}

impl RegisterAllocator<'_> {
    /// Checks the allocation of both register classes for conflicts.
    ///
    /// Covers value intervals with their high halves, fixed register
    /// intervals and temps. Call after
    /// [`RegisterAllocator::allocate_registers`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationFailed`] for the first class with a
    /// conflict.
    pub fn validate(&self) -> Result<()> {
        let arena = self.liveness.intervals();
        for class in [RegisterClass::Core, RegisterClass::FloatingPoint] {
            let mut intervals = Vec::new();
            for index in 0..self.liveness.number_of_ssa_values() {
                let value = self.liveness.instruction_from_ssa_index(index);
                let Some(interval) = self.liveness.interval(value) else {
                    continue;
                };
                if arena[interval].register_class() != class {
                    continue;
                }
                intervals.push(interval);
                intervals.extend(arena[interval].high_interval());
            }

            let physical = match class {
                RegisterClass::Core => &self.physical_core,
                RegisterClass::FloatingPoint => &self.physical_fp,
            };
            intervals.extend(physical.iter().flatten().copied());
            intervals.extend(
                self.temp_intervals
                    .iter()
                    .copied()
                    .filter(|&temp| arena[temp].register_class() == class),
            );

            validate_intervals(
                self.graph,
                self.liveness,
                &intervals,
                self.spill_slots.total(),
                self.target,
                class,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstructionKind, Location, LocationSummary, ValueType};

    fn two_values() -> Result<(Graph, SsaLivenessAnalysis, IntervalId, IntervalId)> {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, exit);
        let a = graph.append(
            entry,
            InstructionKind::Constant(1),
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::requires_register()),
        );
        let b = graph.append(
            entry,
            InstructionKind::Constant(2),
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::requires_register()),
        );
        graph.append(
            entry,
            InstructionKind::Op("use"),
            ValueType::Void,
            &[a, b],
            LocationSummary::none()
                .with_input(Location::requires_register())
                .with_input(Location::requires_register()),
        );
        graph.append(entry, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());
        graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
        let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let ia = liveness.interval(a).ok_or_else(|| invariant_error!("no interval"))?;
        let ib = liveness.interval(b).ok_or_else(|| invariant_error!("no interval"))?;
        Ok((graph, liveness, ia, ib))
    }

    #[test]
    fn test_distinct_registers_pass() -> Result<()> {
        let (graph, mut liveness, a, b) = two_values()?;
        liveness.intervals_mut()[a].set_register(0);
        liveness.intervals_mut()[b].set_register(1);
        let target = TargetConfig::new(2, 0);
        validate_intervals(&graph, &liveness, &[a, b], 0, &target, RegisterClass::Core)
    }

    #[test]
    fn test_shared_register_conflicts() -> Result<()> {
        let (graph, mut liveness, a, b) = two_values()?;
        liveness.intervals_mut()[a].set_register(0);
        liveness.intervals_mut()[b].set_register(0);
        let target = TargetConfig::new(2, 0);
        let result = validate_intervals(&graph, &liveness, &[a, b], 0, &target, RegisterClass::Core);
        match result {
            Err(Error::ValidationFailed { class, conflicts }) => {
                assert_eq!(class, RegisterClass::Core);
                assert!(!conflicts.is_empty());
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_shared_spill_slot_conflicts() -> Result<()> {
        let (graph, mut liveness, a, b) = two_values()?;
        liveness.intervals_mut()[a].set_spill_slot(2);
        liveness.intervals_mut()[b].set_spill_slot(2);
        let target = TargetConfig::new(2, 0).with_reserved_out_slots(2);
        let result = validate_intervals(&graph, &liveness, &[a, b], 1, &target, RegisterClass::Core);
        assert!(matches!(result, Err(Error::ValidationFailed { .. })));
        Ok(())
    }
}
