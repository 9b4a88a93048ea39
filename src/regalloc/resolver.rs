//! Resolution: turning allocated intervals into graph locations and moves.
//!
//! After the linear scan every interval sibling knows its register or stack
//! slot. Resolution writes those decisions back into the graph:
//!
//! 1. The frame layout is fixed, so spill slots and stack-passed parameters
//!    get their final frame offsets.
//! 2. Outputs of every value are set to the location of its first sibling.
//! 3. Sibling by sibling, uses and environment slots covered by the sibling
//!    take its location, fixed inputs get an input move, adjacent siblings in
//!    different locations are connected and safepoints record live registers
//!    and references.
//! 4. Values live across a block boundary whose location differs on both
//!    sides get a move on the edge.
//! 5. Phi inputs are moved into the phi's location at the end of each
//!    predecessor.
//! 6. Temps receive their registers.
//!
//! Moves are grouped into [`ParallelMove`] instructions at a given lifetime
//! position, inserted next to the instruction they belong to. Moves whose
//! source equals their destination are dropped.

use log::debug;

use crate::{
    analysis::{IntervalId, SafepointPosition, UseKind, UsePosition},
    events::EventKind,
    ir::{BlockId, InstrId, InstructionKind, Location, ParallelMove, Policy, ValueType},
    regalloc::{allocator::RegisterAllocator, spill::FrameLayout},
    Result,
};

impl RegisterAllocator<'_> {
    pub(super) fn resolve(&mut self) -> Result<()> {
        let frame = FrameLayout::compute(
            &self.spill_slots,
            self.target,
            self.max_live_core,
            self.max_live_fp,
            self.allocated_core,
            self.allocated_fp,
        );
        debug!("{}", frame);
        let frame_size = frame.frame_size;
        self.frame = Some(frame);

        let values: Vec<(InstrId, IntervalId)> = (0..self.liveness.number_of_ssa_values())
            .filter_map(|index| {
                let instruction = self.liveness.instruction_from_ssa_index(index);
                self.liveness
                    .interval(instruction)
                    .map(|interval| (instruction, interval))
            })
            .collect();

        for &(instruction, interval) in &values {
            self.resolve_output(instruction, interval, frame_size)?;
        }

        for &(_, interval) in &values {
            self.connect_siblings(interval)?;
        }

        let order = self.liveness.linear_order().to_vec();
        for &block in &order {
            let Some(liveness) = self.liveness.block(block) else {
                continue;
            };
            let live_in: Vec<usize> = liveness.live_in.iter().collect();
            let predecessors = self.graph.block(block).predecessors().to_vec();
            for index in live_in {
                let value = self.liveness.instruction_from_ssa_index(index);
                let Some(interval) = self.liveness.interval(value) else {
                    continue;
                };
                for &predecessor in &predecessors {
                    self.connect_split_siblings(interval, predecessor, block)?;
                }
            }
        }

        for &block in &order {
            self.resolve_phis(block)?;
        }

        self.resolve_temps()
    }

    /// Fixes the frame offset of the value's stack home and writes its output
    /// location.
    fn resolve_output(
        &mut self,
        instruction: InstrId,
        interval: IntervalId,
        frame_size: usize,
    ) -> Result<()> {
        let is_parameter = self.graph.instruction(instruction).is_parameter();
        let mut output = self.graph.locations(instruction).out();
        let intervals = self.liveness.intervals_mut();

        if is_parameter {
            // Incoming arguments sit above this frame.
            match output {
                Location::StackSlot(slot) => {
                    output = Location::StackSlot(slot + frame_size);
                    intervals[interval].set_spill_slot(slot + frame_size);
                    self.graph.locations_mut(instruction).set_out(output);
                }
                Location::DoubleStackSlot(slot) => {
                    output = Location::DoubleStackSlot(slot + frame_size);
                    intervals[interval].set_spill_slot(slot + frame_size);
                    self.graph.locations_mut(instruction).set_out(output);
                }
                _ => {
                    if let Some(slot) = intervals[interval].spill_slot() {
                        intervals[interval].set_spill_slot(slot + frame_size);
                    }
                }
            }
        } else if !output.is_stack() {
            if let Some(slot) = intervals[interval].spill_slot() {
                let ty = intervals[interval].ty();
                let slot = self
                    .spill_slots
                    .frame_slot(ty, slot, self.target.reserved_out_slots)?;
                intervals[interval].set_spill_slot(slot);
            }
        }

        let source = self.liveness.intervals().to_location(interval);
        if output.is_unallocated() {
            let locations = self.graph.locations_mut(instruction);
            if output.policy() == Some(Policy::SameAsFirstInput) && locations.in_at(0).is_unallocated() {
                locations.set_in_at(0, source);
            }
            locations.set_out(source);
        }
        Ok(())
    }

    /// Propagates the locations of all siblings of `interval` to the uses
    /// they cover and connects siblings that follow each other directly.
    fn connect_siblings(&mut self, interval: IntervalId) -> Result<()> {
        let intervals = self.liveness.intervals();
        let parent = &intervals[interval];
        let Some(defined_by) = parent.defined_by() else {
            return Err(invariant_error!("Value interval {} has no definition", interval));
        };

        // Values are spilled right after their definition, once.
        if let (Some(slot), true) = (parent.spill_slot(), parent.has_register()) {
            let source = intervals.to_location(interval);
            let destination = if parent.needs_two_spill_slots() {
                Location::DoubleStackSlot(slot)
            } else {
                Location::StackSlot(slot)
            };
            self.insert_move_after(defined_by, source, destination)?;
        }

        let intervals = self.liveness.intervals();
        let parent_slot = intervals[interval].spill_slot();
        let uses: Vec<UsePosition> = intervals.uses_of(interval).copied().collect();
        let env_uses: Vec<UsePosition> = intervals.env_uses_of(interval).copied().collect();
        let siblings: Vec<IntervalId> = intervals.siblings(interval).collect();
        let mut next_use = 0;
        let mut next_env_use = 0;

        for (index, &current) in siblings.iter().enumerate() {
            let intervals = self.liveness.intervals();
            let sibling = &intervals[current];
            let source = intervals.to_location(current);
            let ty = sibling.ty();
            let ranges: Vec<(usize, usize)> = sibling.ranges().map(|r| (r.start, r.end)).collect();
            let safepoints: Vec<SafepointPosition> = sibling.safepoints().copied().collect();
            let adjacent = siblings
                .get(index + 1)
                .copied()
                .filter(|&next| intervals[next].has_register() && sibling.end() == intervals[next].start())
                .map(|next| (sibling.end(), intervals.to_location(next)));

            for (start, end) in ranges {
                while uses.get(next_use).is_some_and(|u| u.position < start) {
                    next_use += 1;
                }
                while let Some(&use_position) = uses.get(next_use).filter(|u| u.position <= end) {
                    next_use += 1;
                    self.update_input(defined_by, &use_position, source)?;
                }

                while env_uses.get(next_env_use).is_some_and(|u| u.position < start) {
                    next_env_use += 1;
                }
                while let Some(&use_position) = env_uses.get(next_env_use).filter(|u| u.position <= end) {
                    next_env_use += 1;
                    self.update_environment(&use_position, source);
                }
            }

            if let Some((position, destination)) = adjacent {
                self.insert_parallel_move_at(position, defined_by, source, destination)?;
            }

            for safepoint in &safepoints {
                self.record_safepoint(safepoint, ty, parent_slot, source)?;
            }
        }
        Ok(())
    }

    fn update_input(&mut self, value: InstrId, use_position: &UsePosition, source: Location) -> Result<()> {
        let Some(user) = use_position.user else {
            return Ok(());
        };
        let (index, is_phi) = match use_position.kind {
            UseKind::Input(index) => (index, false),
            UseKind::PhiInput(index) => (index, true),
            _ => return Ok(()),
        };

        let expected = self.graph.locations(user).in_at(index);
        if !expected.is_valid() {
            // Inputs the user ignores have no location to fill.
            return Ok(());
        }
        if expected.is_unallocated() {
            self.graph.locations_mut(user).set_in_at(index, source);
        } else if !expected.is_constant() && !is_phi {
            self.add_input_move_for(value, user, source, expected)?;
        }
        Ok(())
    }

    fn update_environment(&mut self, use_position: &UsePosition, source: Location) {
        let (Some(user), UseKind::Environment { depth, index }) = (use_position.user, use_position.kind)
        else {
            return;
        };
        let environment = self
            .graph
            .instruction_mut(user)
            .environment
            .as_mut()
            .and_then(|environment| environment.at_depth_mut(depth));
        if let Some(slot) = environment.and_then(|environment| environment.locations.get_mut(index)) {
            *slot = source;
        }
    }

    /// Adds a value living at `source` across `safepoint` to its maps.
    fn record_safepoint(
        &mut self,
        safepoint: &SafepointPosition,
        ty: ValueType,
        parent_slot: Option<usize>,
        source: Location,
    ) -> Result<()> {
        let locations = self.graph.locations_mut(safepoint.instruction);
        if ty.is_reference() {
            if let Some(slot) = parent_slot {
                locations.set_stack_bit(slot);
            }
        }

        match source {
            Location::Register(reg) => {
                locations.add_live_register(source);
                if ty.is_reference() {
                    locations.set_register_bit(reg);
                }
            }
            Location::FpuRegister(_) => locations.add_live_register(source),
            Location::RegisterPair { .. } | Location::FpuRegisterPair { .. } => {
                locations.add_live_register(source.low());
                locations.add_live_register(source.high());
            }
            Location::StackSlot(_) | Location::DoubleStackSlot(_) | Location::Constant(_) => {}
            other => {
                return Err(invariant_error!(
                    "Unexpected location {} live at safepoint {}",
                    other,
                    safepoint.instruction
                ));
            }
        }
        Ok(())
    }

    /// Inserts a move on the edge `from -> to` if the value of `interval`
    /// changes location across it.
    fn connect_split_siblings(&mut self, interval: IntervalId, from: BlockId, to: BlockId) -> Result<()> {
        if self.liveness.block(from).is_none() {
            return Ok(());
        }
        let intervals = self.liveness.intervals();
        if intervals[interval].next_sibling().is_none() {
            return Ok(());
        }

        let destination = intervals.sibling_at(interval, self.liveness.block_start(to));
        let source = intervals.sibling_at(interval, self.liveness.block_end(from).saturating_sub(1));
        if destination == source {
            return Ok(());
        }
        let (Some(destination), Some(source)) = (destination, source) else {
            return Err(invariant_error!(
                "{} is live on edge {} -> {} but has no sibling there",
                interval,
                from,
                to
            ));
        };
        if !intervals[destination].has_register() {
            // The stack slot was written at the definition.
            return Ok(());
        }

        let Some(defined_by) = intervals[interval].defined_by() else {
            return Err(invariant_error!("Value interval {} has no definition", interval));
        };
        let source = intervals.to_location(source);
        let destination = intervals.to_location(destination);
        if self.graph.block(from).successors().len() == 1 {
            self.insert_parallel_move_at_exit_of(from, defined_by, source, destination)
        } else {
            self.insert_parallel_move_at_entry_of(to, defined_by, source, destination)
        }
    }

    fn resolve_phis(&mut self, block: BlockId) -> Result<()> {
        let phis = self.graph.block(block).phis().to_vec();
        let predecessors = self.graph.block(block).predecessors().to_vec();
        for phi in phis {
            let Some(phi_interval) = self.liveness.interval(phi) else {
                continue;
            };
            let destination = self.liveness.intervals().to_location(phi_interval);
            for (index, &predecessor) in predecessors.iter().enumerate() {
                if self.liveness.block(predecessor).is_none() {
                    continue;
                }
                let Some(&input) = self.graph.instruction(phi).inputs.get(index) else {
                    return Err(invariant_error!("{} has no input for predecessor {}", phi, predecessor));
                };
                let Some(input_interval) = self.liveness.interval(input) else {
                    return Err(invariant_error!("Phi input {} has no live interval", input));
                };
                let position = self.liveness.block_end(predecessor).saturating_sub(1);
                let source = self.liveness.intervals().location_at(input_interval, position);
                self.insert_parallel_move_at_exit_of(predecessor, phi, source, destination)?;
            }
        }
        Ok(())
    }

    fn resolve_temps(&mut self) -> Result<()> {
        for index in 0..self.temp_intervals.len() {
            let temp = self.temp_intervals[index];
            let intervals = self.liveness.intervals();
            let interval = &intervals[temp];
            if interval.is_high() {
                // Written together with its low half.
                continue;
            }
            let Some((user, temp_index)) = self.liveness.temp_user(temp) else {
                return Err(invariant_error!("Temp {} has no user", temp));
            };
            let Some(reg) = interval.register() else {
                return Err(invariant_error!("Temp {} of {} has no register", temp, user));
            };
            let location = match interval.ty() {
                ValueType::Int => Location::Register(reg),
                ValueType::Double => match interval.high_interval().and_then(|high| intervals[high].register()) {
                    Some(high) => Location::FpuRegisterPair { low: reg, high },
                    None => Location::FpuRegister(reg),
                },
                other => return Err(invariant_error!("Unexpected temp type {} for {}", other, temp)),
            };
            self.graph.locations_mut(user).set_temp_at(temp_index, location);
        }
        Ok(())
    }

    /// Returns the block of `instruction` and its index there.
    fn index_in_block(&self, instruction: InstrId) -> Result<(BlockId, usize)> {
        let block = self.graph.instruction(instruction).block();
        let Some(index) = self
            .graph
            .block(block)
            .instructions()
            .iter()
            .position(|&id| id == instruction)
        else {
            return Err(invariant_error!("{} is not in the instruction list of {}", instruction, block));
        };
        Ok((block, index))
    }

    /// Returns the parallel move at `index` of `block` and its position, if
    /// the instruction there is one.
    fn parallel_move_at(&self, block: BlockId, index: Option<usize>) -> Option<(InstrId, usize)> {
        let id = *self.graph.block(block).instructions().get(index?)?;
        let moves = self.graph.instruction(id).as_parallel_move()?;
        Some((id, moves.position()))
    }

    fn new_parallel_move(&mut self, block: BlockId, index: usize, position: usize) -> InstrId {
        self.graph.insert_instruction(
            block,
            index,
            InstructionKind::ParallelMove(ParallelMove::new(position)),
        )
    }

    fn add_move(
        &mut self,
        parallel_move: InstrId,
        source: Location,
        destination: Location,
        instruction: Option<InstrId>,
        ty: ValueType,
    ) -> Result<()> {
        let Some(moves) = self.graph.instruction_mut(parallel_move).as_parallel_move_mut() else {
            return Err(invariant_error!("{} is not a parallel move", parallel_move));
        };
        moves.add_move(source, destination, ty, instruction)?;
        let position = moves.position();
        self.events
            .record(EventKind::MoveInserted)
            .at_position(position)
            .message(format!("{source} -> {destination}"));
        Ok(())
    }

    /// Moves `source` into the fixed input location of `user`, just before it.
    fn add_input_move_for(
        &mut self,
        input: InstrId,
        user: InstrId,
        source: Location,
        destination: Location,
    ) -> Result<()> {
        if source == destination {
            return Ok(());
        }
        if self.graph.instruction(user).is_phi() {
            return Err(invariant_error!("Input move requested for phi {}", user));
        }

        let position = self.lifetime_position(user);
        let (block, index) = self.index_in_block(user)?;
        let parallel_move = match self.parallel_move_at(block, index.checked_sub(1)) {
            Some((id, at)) if at >= position => id,
            _ => self.new_parallel_move(block, index, position),
        };
        let ty = self.graph.instruction(input).ty;
        self.add_move(parallel_move, source, destination, None, ty)
    }

    /// Moves a value from `source` to `destination` at `position`, which
    /// must lie inside a block.
    ///
    /// Even positions place the move before the instruction there, odd ones
    /// after it. The start of a block is left to edge resolution.
    fn insert_parallel_move_at(
        &mut self,
        position: usize,
        instruction: InstrId,
        source: Location,
        destination: Location,
    ) -> Result<()> {
        if source == destination {
            return Ok(());
        }

        let parallel_move = match self.liveness.instruction_from_position(position / 2) {
            None => {
                if position % 2 == 0 {
                    return Ok(());
                }
                // Just after a block start: before the first instruction,
                // after moves already placed at the block start.
                let Some(block) = self.liveness.block_from_position(position / 2) else {
                    return Err(invariant_error!("No block at position {}", position));
                };
                let index = match self.parallel_move_at(block, Some(0)) {
                    Some((_, at)) if at < position => 1,
                    _ => 0,
                };
                match self.parallel_move_at(block, Some(index)) {
                    Some((id, at)) if at == position => id,
                    _ => self.new_parallel_move(block, index, position),
                }
            }
            Some(at) if position % 2 == 1 => {
                if self.graph.instruction(at).kind.is_control_flow() {
                    return Err(invariant_error!("Move after control flow {} at {}", at, position));
                }
                let (block, index) = self.index_in_block(at)?;
                match self.parallel_move_at(block, Some(index + 1)) {
                    Some((id, existing)) if existing <= position => id,
                    _ => self.new_parallel_move(block, index + 1, position),
                }
            }
            Some(at) => {
                let (block, index) = self.index_in_block(at)?;
                match self.parallel_move_at(block, index.checked_sub(1)) {
                    Some((id, existing)) if existing == position => id,
                    _ => self.new_parallel_move(block, index, position),
                }
            }
        };

        let ty = self.graph.instruction(instruction).ty;
        self.add_move(parallel_move, source, destination, Some(instruction), ty)
    }

    /// Places a move just before the last instruction of `block`, which must
    /// have a single successor.
    fn insert_parallel_move_at_exit_of(
        &mut self,
        block: BlockId,
        instruction: InstrId,
        source: Location,
        destination: Location,
    ) -> Result<()> {
        if source == destination {
            return Ok(());
        }
        if self.graph.block(block).successors().len() != 1 {
            return Err(invariant_error!("Exit moves need a single successor, {} has several", block));
        }
        let Some(last) = self.graph.block(block).last_instruction() else {
            return Err(invariant_error!("{} has no instructions", block));
        };

        let position = self.lifetime_position(last);
        let (_, index) = self.index_in_block(last)?;
        let parallel_move = match self.parallel_move_at(block, index.checked_sub(1)) {
            Some((id, existing)) if existing == position => id,
            _ => self.new_parallel_move(block, index, position),
        };
        let ty = self.graph.instruction(instruction).ty;
        self.add_move(parallel_move, source, destination, Some(instruction), ty)
    }

    /// Places a move at the very start of `block`.
    fn insert_parallel_move_at_entry_of(
        &mut self,
        block: BlockId,
        instruction: InstrId,
        source: Location,
        destination: Location,
    ) -> Result<()> {
        if source == destination {
            return Ok(());
        }
        let position = self.liveness.block_start(block);
        let parallel_move = match self.parallel_move_at(block, Some(0)) {
            Some((id, existing)) if existing == position => id,
            _ => self.new_parallel_move(block, 0, position),
        };
        let ty = self.graph.instruction(instruction).ty;
        self.add_move(parallel_move, source, destination, Some(instruction), ty)
    }

    /// Places a move right after `instruction`, or at the start of its block
    /// for a phi.
    fn insert_move_after(&mut self, instruction: InstrId, source: Location, destination: Location) -> Result<()> {
        if source == destination {
            return Ok(());
        }
        if self.graph.instruction(instruction).is_phi() {
            let block = self.graph.instruction(instruction).block();
            return self.insert_parallel_move_at_entry_of(block, instruction, source, destination);
        }

        let position = self.lifetime_position(instruction) + 1;
        let (block, index) = self.index_in_block(instruction)?;
        let parallel_move = match self.parallel_move_at(block, Some(index + 1)) {
            Some((id, existing)) if existing <= position => id,
            _ => self.new_parallel_move(block, index + 1, position),
        };
        let ty = self.graph.instruction(instruction).ty;
        self.add_move(parallel_move, source, destination, Some(instruction), ty)
    }
}
