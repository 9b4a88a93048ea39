//! The linear-scan register allocator.
//!
//! [`RegisterAllocator`] walks the live intervals produced by
//! [`SsaLivenessAnalysis`] in order of increasing start position and hands
//! each one a register, splitting and spilling where the register file runs
//! out. The resolver (see [`RegisterAllocator::allocate_registers`]) then
//! rewrites the graph so every operand names its final location.
//!
//! # Algorithm
//!
//! 1. **Interval construction**: blocks are visited in reverse linear order,
//!    instructions backwards and phis forwards. Every instruction contributes
//!    its temps, blocks fixed registers it names for inputs, outputs or calls
//!    and queues its own interval (plus a high half for values that need a
//!    register pair).
//! 2. **Linear scan**: once per register class, intervals are popped by
//!    start position. Intervals that ended move to `handled`, intervals in a
//!    lifetime hole to `inactive`. The allocator first looks for a register
//!    that stays free long enough ([`try_allocate_free_reg`]), then for the
//!    register whose next use is furthest away ([`allocate_blocked_reg`]),
//!    splitting whichever interval loses.
//! 3. **Resolution**: see the `resolver` module.
//!
//! Splits are placed at block boundaries where possible: a split position is
//! moved up the dominator tree and out of loops so spill code does not land
//! in hot loop bodies.
//!
//! # Complexity
//!
//! - Time: O(n * r) where n is the number of intervals and r the number of
//!   registers, plus O(n log n) worth of sorted insertions
//! - Space: O(n)
//!
//! [`try_allocate_free_reg`]: RegisterAllocator::try_allocate_free_reg
//! [`allocate_blocked_reg`]: RegisterAllocator::allocate_blocked_reg

use std::mem;

use log::{debug, trace};

use crate::{
    analysis::{IntervalArena, IntervalId, SafepointPosition, SsaLivenessAnalysis},
    events::{EventKind, EventLog},
    ir::{Graph, InstrId, InstructionKind, Location, Policy, RegisterClass, ValueType},
    regalloc::{
        spill::{FrameLayout, SpillSlots},
        TargetConfig,
    },
    Error, Result,
};

/// Position meaning "never" for free-until and next-use computations.
pub(super) const MAX_POSITION: usize = usize::MAX;

/// Linear-scan register allocator for one compilation unit.
///
/// The allocator borrows the graph and its liveness analysis mutably for the
/// whole run: intervals are split and assigned in place, and the resolver
/// inserts parallel moves and fills in location summaries.
///
/// # Example
///
/// ```rust,ignore
/// let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
/// let events = EventLog::new();
/// let target = TargetConfig::x86_64();
/// let mut allocator = RegisterAllocator::new(&mut graph, &mut liveness, &target, &events)?;
/// allocator.allocate_registers()?;
/// allocator.validate()?;
/// ```
pub struct RegisterAllocator<'a> {
    pub(super) graph: &'a mut Graph,
    pub(super) liveness: &'a mut SsaLivenessAnalysis,
    pub(super) target: &'a TargetConfig,
    pub(super) events: &'a EventLog,

    /// Core intervals waiting for the scan, sorted by decreasing start.
    unhandled_core: Vec<IntervalId>,
    /// Floating-point intervals waiting for the scan, sorted by decreasing start.
    unhandled_fp: Vec<IntervalId>,
    /// One fixed interval per core register that is ever blocked.
    pub(super) physical_core: Vec<Option<IntervalId>>,
    /// One fixed interval per floating-point register that is ever blocked.
    pub(super) physical_fp: Vec<Option<IntervalId>>,
    /// Every temp interval, lows and highs.
    pub(super) temp_intervals: Vec<IntervalId>,
    /// Instructions needing a safepoint, in reverse linear order.
    pub(super) safepoints: Vec<InstrId>,

    // Scan state of the class currently being processed.
    class: RegisterClass,
    unhandled: Vec<IntervalId>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    handled: Vec<IntervalId>,

    pub(super) spill_slots: SpillSlots,
    pub(super) max_live_core: usize,
    pub(super) max_live_fp: usize,
    pub(super) allocated_core: u64,
    pub(super) allocated_fp: u64,
    pub(super) frame: Option<FrameLayout>,
}

impl<'a> RegisterAllocator<'a> {
    /// Creates an allocator for `graph`.
    ///
    /// # Arguments
    ///
    /// * `graph` - The graph to allocate, with critical edges already split
    /// * `liveness` - Liveness computed on `graph`
    /// * `target` - The machine description
    /// * `events` - Log receiving assignment, split and spill events
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is inconsistent.
    pub fn new(
        graph: &'a mut Graph,
        liveness: &'a mut SsaLivenessAnalysis,
        target: &'a TargetConfig,
        events: &'a EventLog,
    ) -> Result<Self> {
        target.verify()?;
        Ok(Self {
            graph,
            liveness,
            target,
            events,
            unhandled_core: Vec::new(),
            unhandled_fp: Vec::new(),
            physical_core: vec![None; target.core_registers],
            physical_fp: vec![None; target.fp_registers],
            temp_intervals: Vec::new(),
            safepoints: Vec::new(),
            class: RegisterClass::Core,
            unhandled: Vec::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            handled: Vec::new(),
            spill_slots: SpillSlots::new(),
            max_live_core: 0,
            max_live_fp: 0,
            allocated_core: 0,
            allocated_fp: 0,
            frame: None,
        })
    }

    /// Runs allocation and resolution.
    ///
    /// On success every location summary of the graph names concrete
    /// locations, parallel moves connect split intervals and the frame layout
    /// is available through [`RegisterAllocator::frame`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRegisters`] if fixed constraints leave no
    /// register where one is required, or [`Error::InvariantViolation`] on
    /// inconsistent input.
    pub fn allocate_registers(&mut self) -> Result<()> {
        self.allocate_registers_internal()?;
        self.resolve()
    }

    /// The frame layout, available after [`RegisterAllocator::allocate_registers`].
    #[must_use]
    pub fn frame(&self) -> Option<&FrameLayout> {
        self.frame.as_ref()
    }

    /// Spill slot pools as allocated so far.
    #[must_use]
    pub fn spill_slots(&self) -> &SpillSlots {
        &self.spill_slots
    }

    /// The lifetime position of `instruction`. Parallel moves report the
    /// position they were inserted at.
    #[must_use]
    pub fn lifetime_position(&self, instruction: InstrId) -> usize {
        if let Some(moves) = self.graph.instruction(instruction).as_parallel_move() {
            return moves.position();
        }
        self.liveness.position(instruction).unwrap_or(0)
    }

    fn allocate_registers_internal(&mut self) -> Result<()> {
        let order = self.liveness.linear_order().to_vec();
        for &block in order.iter().rev() {
            let instructions = self.graph.block(block).instructions().to_vec();
            for &instruction in instructions.iter().rev() {
                self.process_instruction(instruction)?;
            }
            let phis = self.graph.block(block).phis().to_vec();
            for &phi in &phis {
                self.process_instruction(phi)?;
            }
        }

        debug!(
            "Collected {} core and {} floating-point intervals, {} temps, {} safepoints",
            self.unhandled_core.len(),
            self.unhandled_fp.len(),
            self.temp_intervals.len(),
            self.safepoints.len()
        );

        for class in [RegisterClass::Core, RegisterClass::FloatingPoint] {
            self.class = class;
            self.active.clear();
            self.inactive.clear();
            self.handled.clear();
            let (unhandled, physical) = match class {
                RegisterClass::Core => (mem::take(&mut self.unhandled_core), &self.physical_core),
                RegisterClass::FloatingPoint => (mem::take(&mut self.unhandled_fp), &self.physical_fp),
            };
            self.inactive.extend(physical.iter().flatten().copied());
            self.unhandled = unhandled;
            self.linear_scan()?;
        }
        Ok(())
    }

    /// Builds the intervals contributed by one instruction and queues them.
    fn process_instruction(&mut self, instruction: InstrId) -> Result<()> {
        let Some(position) = self.liveness.position(instruction) else {
            return Ok(());
        };
        let locations = self.graph.locations(instruction).clone();

        for (index, &temp) in locations.temps().iter().enumerate() {
            match temp {
                Location::Register(_)
                | Location::FpuRegister(_)
                | Location::RegisterPair { .. }
                | Location::FpuRegisterPair { .. } => {
                    self.block_register(temp, position, position + 1)?;
                }
                Location::Unallocated(Policy::RequiresRegister) => {
                    let intervals = self.liveness.intervals_mut();
                    let interval = intervals.make_temp(ValueType::Int);
                    intervals[interval].add_temp_use(instruction, index, position);
                    self.temp_intervals.push(interval);
                    self.unhandled_core.push(interval);
                }
                Location::Unallocated(Policy::RequiresFpuRegister) => {
                    let intervals = self.liveness.intervals_mut();
                    let interval = intervals.make_temp(ValueType::Double);
                    intervals[interval].add_temp_use(instruction, index, position);
                    self.temp_intervals.push(interval);
                    if self.target.needs_two_registers(ValueType::Double) {
                        let high = intervals.add_high_interval(interval, true);
                        self.temp_intervals.push(high);
                        self.unhandled_fp.push(high);
                    }
                    self.unhandled_fp.push(interval);
                }
                other => {
                    return Err(invariant_error!(
                        "Unexpected temp location {} on {}",
                        other,
                        instruction
                    ));
                }
            }
        }

        if locations.needs_safepoint() {
            self.safepoints.push(instruction);
            if locations.only_calls_on_slow_path() {
                let intervals = self.liveness.intervals_mut();
                let interval = intervals.make_slow_path(instruction);
                intervals[interval].add_range(position, position + 1);
                add_sorted(&mut self.unhandled_core, self.liveness.intervals(), interval);
                add_sorted(&mut self.unhandled_fp, self.liveness.intervals(), interval);
            }
        }

        if locations.will_call() {
            self.block_caller_save_registers(position, position + 1)?;
        }

        for &input in locations.inputs() {
            if input.is_register_kind() {
                self.block_register(input, position, position + 1)?;
            }
        }

        let Some(current) = self.liveness.interval(instruction) else {
            return Ok(());
        };
        let ty = self.liveness.intervals()[current].ty();
        if self.target.needs_two_registers(ty) {
            self.liveness.intervals_mut().add_high_interval(current, false);
        }

        self.events
            .record(EventKind::IntervalCreated)
            .at_position(position)
            .block(self.graph.instruction(instruction).block())
            .message(format!("{current} for {instruction}"));

        self.assign_safepoints(current);

        match locations.out() {
            Location::Unallocated(Policy::SameAsFirstInput) => {
                let first = locations.in_at(0);
                if first.is_register_kind() {
                    self.preassign(current, first, position + 1);
                }
            }
            output @ (Location::Register(_)
            | Location::FpuRegister(_)
            | Location::RegisterPair { .. }
            | Location::FpuRegisterPair { .. }) => {
                self.preassign(current, output, position + 1);
                self.block_register(output, position, position + 1)?;
            }
            Location::StackSlot(slot) | Location::DoubleStackSlot(slot) => {
                self.liveness.intervals_mut()[current].set_spill_slot(slot);
            }
            _ => {}
        }

        // A value living in memory from its definition only needs to enter
        // the scan where a register is first required.
        let interval = &self.liveness.intervals()[current];
        if interval.has_spill_slot() || self.graph.instruction(instruction).is_constant() {
            let start = interval.start();
            let Some(first_register_use) = self.liveness.intervals().first_register_use(current)
            else {
                return Ok(());
            };
            if first_register_use > start + 1 {
                let split = self.split_between(current, start, first_register_use - 1)?;
                self.enqueue(split);
            } else {
                self.enqueue(current);
            }
        } else {
            self.enqueue(current);
        }
        Ok(())
    }

    /// Records every earlier-processed safepoint covered by `interval`.
    fn assign_safepoints(&mut self, interval: IntervalId) {
        let start = self.liveness.intervals()[interval].start();
        // Safepoints were pushed in reverse linear order: walking the list
        // backwards yields ascending positions.
        for index in (0..self.safepoints.len()).rev() {
            let safepoint = self.safepoints[index];
            let position = self.lifetime_position(safepoint);
            if position == start {
                // The safepoint is the definition itself.
                continue;
            }
            let current = &self.liveness.intervals()[interval];
            if current.is_dead_at(position) {
                break;
            }
            if !current.covers(position) {
                continue;
            }
            let will_call = self.graph.locations(safepoint).will_call();
            self.liveness.intervals_mut()[interval].add_safepoint(SafepointPosition {
                instruction: safepoint,
                position,
                will_call,
            });
        }
    }

    /// Gives `interval` (and its high half for pairs) the register named by
    /// `location` from `from` on.
    fn preassign(&mut self, interval: IntervalId, location: Location, from: usize) {
        let intervals = self.liveness.intervals_mut();
        intervals[interval].set_from(from);
        if let Some(reg) = location.register() {
            intervals[interval].set_register(reg);
        }
        if location.is_pair() {
            if let Some(high) = intervals[interval].high_interval() {
                intervals[high].set_from(from);
                if let Some(reg) = location.high().register() {
                    intervals[high].set_register(reg);
                }
            }
        }
    }

    /// Queues `interval` on the unhandled list of its class.
    fn enqueue(&mut self, interval: IntervalId) {
        let intervals = self.liveness.intervals();
        let list = match intervals[interval].register_class() {
            RegisterClass::Core => &mut self.unhandled_core,
            RegisterClass::FloatingPoint => &mut self.unhandled_fp,
        };
        add_sorted(list, intervals, interval);
    }

    /// Marks the register(s) of `location` as taken in `[start, end)`.
    fn block_register(&mut self, location: Location, start: usize, end: usize) -> Result<()> {
        match location {
            Location::Register(reg) => self.block_fixed(RegisterClass::Core, reg, start, end),
            Location::FpuRegister(reg) => {
                self.block_fixed(RegisterClass::FloatingPoint, reg, start, end)
            }
            Location::RegisterPair { .. } | Location::FpuRegisterPair { .. } => {
                self.block_register(location.low(), start, end)?;
                self.block_register(location.high(), start, end)
            }
            other => Err(invariant_error!("Cannot block {} at {}", other, start)),
        }
    }

    fn block_caller_save_registers(&mut self, start: usize, end: usize) -> Result<()> {
        for class in [RegisterClass::Core, RegisterClass::FloatingPoint] {
            for reg in 0..self.target.register_count(class) {
                if !self.target.is_blocked(class, reg) && !self.target.is_callee_save(class, reg) {
                    self.block_fixed(class, reg, start, end)?;
                }
            }
        }
        Ok(())
    }

    fn block_fixed(&mut self, class: RegisterClass, reg: usize, start: usize, end: usize) -> Result<()> {
        let slot = match class {
            RegisterClass::Core => self.physical_core.get_mut(reg),
            RegisterClass::FloatingPoint => self.physical_fp.get_mut(reg),
        };
        let Some(slot) = slot else {
            return Err(invariant_error!("Register {} does not exist in class {}", reg, class));
        };
        let intervals = self.liveness.intervals_mut();
        let interval = match *slot {
            Some(interval) => interval,
            None => {
                let interval = intervals.make_fixed(reg, class);
                *slot = Some(interval);
                interval
            }
        };
        intervals[interval].add_range(start, end);
        Ok(())
    }

    fn linear_scan(&mut self) -> Result<()> {
        while let Some(current) = self.unhandled.pop() {
            let position = self.liveness.intervals()[current].start();

            // Intervals moved from active to inactive below are not revisited
            // by the inactive pass.
            let mut inactive_to_handle = self.inactive.len();

            let mut i = 0;
            while i < self.active.len() {
                let interval = &self.liveness.intervals()[self.active[i]];
                if interval.is_dead_at(position) {
                    let id = self.active.remove(i);
                    self.handled.push(id);
                } else if !interval.covers(position) {
                    let id = self.active.remove(i);
                    self.inactive.push(id);
                } else {
                    i += 1;
                }
            }

            let mut i = 0;
            while i < inactive_to_handle {
                let interval = &self.liveness.intervals()[self.inactive[i]];
                if interval.is_dead_at(position) {
                    let id = self.inactive.remove(i);
                    inactive_to_handle -= 1;
                    self.handled.push(id);
                } else if interval.covers(position) {
                    let id = self.inactive.remove(i);
                    inactive_to_handle -= 1;
                    self.active.push(id);
                } else {
                    i += 1;
                }
            }

            let interval = &self.liveness.intervals()[current];
            if interval.is_slow_path_safepoint() {
                match self.class {
                    RegisterClass::Core => {
                        self.max_live_core = self.max_live_core.max(self.active.len());
                    }
                    RegisterClass::FloatingPoint => {
                        self.max_live_fp = self.max_live_fp.max(self.active.len());
                    }
                }
                continue;
            }

            if let Some(low) = interval.low_interval() {
                if !self.liveness.intervals()[low].has_register() {
                    // The low half was spilled: the pair lives in memory.
                    continue;
                }
            }

            let success =
                self.try_allocate_free_reg(current)? || self.allocate_blocked_reg(current)?;
            if !success {
                continue;
            }

            let intervals = self.liveness.intervals_mut();
            let Some(reg) = intervals[current].register() else {
                return Err(invariant_error!("{} allocated without a register", current));
            };
            match self.class {
                RegisterClass::Core => self.allocated_core |= 1u64 << reg,
                RegisterClass::FloatingPoint => self.allocated_fp |= 1u64 << reg,
            }
            if let Some(high) = intervals[current].high_interval() {
                if !intervals[high].has_register() {
                    intervals[high].set_register(reg + 1);
                }
            }
            self.active.push(current);

            let location = self.liveness.intervals().to_location(current);
            trace!("{} [{}, {}) -> {}", current, position, self.liveness.intervals()[current].end(), location);
            self.events
                .record(EventKind::RegisterAssigned)
                .at_position(position)
                .message(format!("{current} -> {location}"));
        }
        Ok(())
    }

    /// Tries to find a register free for the whole of `current`, or at least
    /// for a prefix of it, in which case `current` is split where the
    /// register stops being free.
    ///
    /// # Returns
    ///
    /// `true` if `current` received a register.
    fn try_allocate_free_reg(&mut self, current: IntervalId) -> Result<bool> {
        let intervals = self.liveness.intervals();
        let mut free_until = vec![MAX_POSITION; self.target.register_count(self.class)];

        for &active in &self.active {
            if let Some(slot) = intervals[active].register().and_then(|r| free_until.get_mut(r)) {
                *slot = 0;
            }
        }

        let interval = &intervals[current];

        // An input dying at the definition hands its register to the output.
        if let (Some(defined_by), false) = (interval.defined_by(), interval.is_split()) {
            let instruction = self.graph.instruction(defined_by);
            let locations = &instruction.locations;
            if !locations.output_can_overlap_with_inputs() && locations.out().is_unallocated() {
                let position = self.liveness.position(defined_by).unwrap_or(0) + 1;
                for (index, &input) in instruction.inputs.iter().enumerate() {
                    if !locations.in_at(index).is_valid() {
                        continue;
                    }
                    let Some(input_interval) = self.liveness.interval(input) else {
                        continue;
                    };
                    let last = intervals.last_sibling(input_interval);
                    if intervals[last].has_register()
                        && intervals[last].is_floating_point() == interval.is_floating_point()
                    {
                        free_if_not_cover_at(intervals, last, position, &mut free_until);
                    }
                }
            }
        }

        for &inactive in &self.inactive {
            let other = &intervals[inactive];
            // A fresh interval cannot meet a non-fixed inactive one before
            // that one ends: it would already have been live at this start.
            if !interval.is_split() && !other.is_fixed() {
                continue;
            }
            let Some(reg) = other.register() else {
                continue;
            };
            if free_until.get(reg).map_or(true, |&until| until == 0) {
                continue;
            }
            if let Some(intersection) = other.first_intersection_with(interval) {
                free_until[reg] = free_until[reg].min(intersection);
            }
        }

        let reg = if let Some(reg) = interval.register() {
            reg
        } else {
            let hint = self
                .liveness
                .find_first_register_hint(self.graph, current, &free_until)
                .filter(|&hint| self.is_usable_hint(hint, interval.is_low()));
            match hint {
                Some(hint) => hint,
                None if interval.is_low() => {
                    match self.find_available_register_pair(&free_until, interval.start()) {
                        Some(reg) => reg,
                        None => return Ok(false),
                    }
                }
                None => match self.find_available_register(&free_until, current) {
                    Some(reg) => reg,
                    None => return Ok(false),
                },
            }
        };

        let mut split_position = free_until.get(reg).copied().unwrap_or(0);
        if split_position == 0 {
            return Ok(false);
        }
        if interval.is_low() {
            let high_reg = interval
                .high_interval()
                .and_then(|high| intervals[high].register())
                .unwrap_or(reg + 1);
            if self.target.is_blocked(self.class, high_reg) {
                return Ok(false);
            }
            let high_free = free_until.get(high_reg).copied().unwrap_or(0);
            if high_free == 0 {
                return Ok(false);
            }
            split_position = split_position.min(high_free);
        }

        let start = interval.start();
        if split_position <= start {
            return Ok(false);
        }
        let dead = interval.is_dead_at(split_position);

        self.liveness.intervals_mut()[current].set_register(reg);
        if !dead {
            // The register is taken before the interval ends.
            let split = self.split_between(current, start, split_position)?;
            add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
        }
        Ok(true)
    }

    fn is_usable_hint(&self, hint: usize, is_low: bool) -> bool {
        let count = self.target.register_count(self.class);
        if hint >= count || self.target.is_blocked(self.class, hint) {
            return false;
        }
        !is_low || (hint + 1 < count && !self.target.is_blocked(self.class, hint + 1))
    }

    /// Picks the register whose next use (or end of freedom) is furthest
    /// away. Caller-save registers win ties unless the interval spans a
    /// call, where a callee-save register avoids saving around it.
    fn find_available_register(&self, next_use: &[usize], current: IntervalId) -> Option<usize> {
        let prefers_caller_save =
            !self.liveness.intervals()[current].has_will_call_safepoint();
        let mut candidate: Option<usize> = None;

        for (reg, &use_position) in next_use.iter().enumerate() {
            if self.target.is_blocked(self.class, reg) {
                continue;
            }
            if use_position == MAX_POSITION {
                if prefers_caller_save && self.target.is_callee_save(self.class, reg) {
                    if candidate.map_or(true, |c| next_use[c] != MAX_POSITION) {
                        candidate = Some(reg);
                    }
                    continue;
                }
                candidate = Some(reg);
                break;
            }
            match candidate {
                Some(c) if use_position <= next_use[c] => {}
                _ => candidate = Some(reg),
            }
        }
        candidate
    }

    /// Picks an even-aligned pair `(r, r + 1)` whose halves are both free the
    /// longest. A pair whose current next use is already at `starting_at` is
    /// replaced by any other pair.
    fn find_available_register_pair(&self, next_use: &[usize], starting_at: usize) -> Option<usize> {
        let mut candidate: Option<usize> = None;

        for low in (0..next_use.len()).step_by(2) {
            let high = low + 1;
            if high >= next_use.len()
                || self.target.is_blocked(self.class, low)
                || self.target.is_blocked(self.class, high)
            {
                continue;
            }
            match candidate {
                Some(c)
                    if !(next_use[low] >= next_use[c] && next_use[high] >= next_use[c + 1]) =>
                {
                    if next_use[c] <= starting_at || next_use[c + 1] <= starting_at {
                        candidate = Some(low);
                    }
                }
                _ => {
                    candidate = Some(low);
                    if next_use[low] == MAX_POSITION && next_use[high] == MAX_POSITION {
                        break;
                    }
                }
            }
        }
        candidate
    }

    /// Takes a register from the interval that needs it the latest, or spills
    /// `current` if it is the one whose next register use is furthest away.
    ///
    /// # Returns
    ///
    /// `true` if `current` received a register.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRegisters`] if `current` needs a register at its
    /// start and every candidate is pinned there.
    fn allocate_blocked_reg(&mut self, current: IntervalId) -> Result<bool> {
        let intervals = self.liveness.intervals();
        let interval = &intervals[current];
        let preassigned = interval.register();
        let first_register_use = intervals.first_register_use(current);

        let first_register_use = match (first_register_use, preassigned) {
            (None, None) => {
                // No register needed anywhere: the whole interval lives in memory.
                self.allocate_spill_slot_for(current)?;
                self.events
                    .record(EventKind::IntervalSpilled)
                    .at_position(self.liveness.intervals()[current].start())
                    .message(format!("{current}"));
                return Ok(false);
            }
            (first, _) => first.unwrap_or(MAX_POSITION),
        };

        let start = interval.start();
        let is_low = interval.is_low();
        let mut next_use = vec![MAX_POSITION; self.target.register_count(self.class)];

        for &active in &self.active {
            let other = &intervals[active];
            let Some(slot) = other.register().and_then(|r| next_use.get_mut(r)) else {
                continue;
            };
            if other.is_fixed() {
                *slot = start;
            } else if let Some(use_position) = intervals.first_register_use_after(active, start) {
                *slot = (*slot).min(use_position);
            }
        }

        for &inactive in &self.inactive {
            let other = &intervals[inactive];
            if !interval.is_split() && !other.is_fixed() {
                continue;
            }
            let Some(slot) = other.register().and_then(|r| next_use.get_mut(r)) else {
                continue;
            };
            let Some(intersection) = other.first_intersection_with(interval) else {
                continue;
            };
            if other.is_fixed() {
                *slot = (*slot).min(intersection);
            } else if let Some(use_position) = intervals.first_use_after(inactive, start) {
                *slot = (*slot).min(use_position);
            }
        }

        let out_of_registers = Error::OutOfRegisters {
            class: self.class,
            position: start,
        };
        let (reg, should_spill) = if let Some(reg) = preassigned {
            (reg, false)
        } else if is_low {
            let reg = self
                .find_available_register_pair(&next_use, first_register_use)
                .ok_or(out_of_registers)?;
            let spill = first_register_use >= next_use[reg]
                || first_register_use >= next_use[reg + 1];
            (reg, spill)
        } else {
            let reg = self
                .find_available_register(&next_use, current)
                .ok_or(out_of_registers)?;
            (reg, first_register_use >= next_use[reg])
        };

        if should_spill {
            if start + 1 >= first_register_use {
                // The register is needed right here.
                let exhausted = Error::OutOfRegisters {
                    class: self.class,
                    position: first_register_use.saturating_sub(1).max(start),
                };
                if !is_low
                    || !self.try_split_non_pair_or_unaligned_pair_interval_at(
                        start,
                        first_register_use,
                        &next_use,
                    )?
                {
                    return Err(exhausted);
                }
                // A single register was freed; retry the pair.
                self.unhandled.push(current);
            } else {
                self.allocate_spill_slot_for(current)?;
                self.events
                    .record(EventKind::IntervalSpilled)
                    .at_position(start)
                    .message(format!("{current} until {first_register_use}"));
                let split = self.split_between(current, start, first_register_use - 1)?;
                if split == current {
                    return Err(invariant_error!(
                        "Spilling {} at {} produced no new sibling",
                        current,
                        start
                    ));
                }
                add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
            }
            return Ok(false);
        }

        self.liveness.intervals_mut()[current].set_register(reg);

        let position = self
            .active
            .iter()
            .position(|&id| self.liveness.intervals()[id].register() == Some(reg));
        if let Some(index) = position {
            let active = self.active[index];
            if self.liveness.intervals()[active].is_fixed() {
                return Err(invariant_error!(
                    "Register {} of fixed {} handed to {}",
                    reg,
                    active,
                    current
                ));
            }
            let split = self.split(active, start)?;
            if split != active {
                self.handled.push(active);
            }
            self.active.remove(index);
            remove_other_half(&mut self.active, self.liveness.intervals(), active);
            add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
        }

        let mut i = 0;
        while i < self.inactive.len() {
            let inactive = self.inactive[i];
            let intervals = self.liveness.intervals();
            let other = &intervals[inactive];
            if other.register() != Some(reg)
                || (!intervals[current].is_split() && !other.is_fixed())
            {
                i += 1;
                continue;
            }
            let Some(intersection) = other.first_intersection_with(&intervals[current]) else {
                i += 1;
                continue;
            };

            if other.is_fixed() {
                // Give the register back before the fixed interval needs it.
                let split = self.split(current, intersection)?;
                if split == current {
                    return Err(invariant_error!(
                        "{} collides with fixed {} at its start",
                        current,
                        inactive
                    ));
                }
                add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
                i += 1;
            } else {
                let split = self.split(inactive, start)?;
                self.inactive.remove(i);
                if let Some(removed) =
                    remove_other_half(&mut self.inactive, self.liveness.intervals(), inactive)
                {
                    if removed < i {
                        i -= 1;
                    }
                }
                self.handled.push(inactive);
                add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
            }
        }

        Ok(true)
    }

    /// Frees a register for a pair by splitting an active interval that holds
    /// a single register or a misaligned pair.
    ///
    /// # Returns
    ///
    /// `true` if an interval was split.
    fn try_split_non_pair_or_unaligned_pair_interval_at(
        &mut self,
        position: usize,
        first_register_use: usize,
        next_use: &[usize],
    ) -> Result<bool> {
        for index in 0..self.active.len() {
            let active = self.active[index];
            let intervals = self.liveness.intervals();
            let interval = &intervals[active];
            let Some(reg) = interval.register() else {
                continue;
            };
            if interval.is_fixed()
                || interval.is_high()
                || first_register_use > next_use.get(reg).copied().unwrap_or(MAX_POSITION)
            {
                continue;
            }
            let unaligned = interval
                .high_interval()
                .and_then(|high| intervals[high].register())
                .is_some_and(|high| high != reg + 1);
            if interval.is_low() && !unaligned && reg % 2 == 0 {
                continue;
            }

            let split = self.split(active, position)?;
            self.active.remove(index);
            if split != active {
                self.handled.push(active);
            }
            remove_other_half(&mut self.active, self.liveness.intervals(), active);
            add_sorted(&mut self.unhandled, self.liveness.intervals(), split);
            return Ok(true);
        }
        Ok(false)
    }

    /// Splits `interval` at `position`, splitting its pair half alongside.
    ///
    /// Splitting at the interval's own start only drops its register: the
    /// interval itself is returned and goes back to the unhandled list.
    pub(super) fn split(&mut self, interval: IntervalId, position: usize) -> Result<IntervalId> {
        let intervals = self.liveness.intervals_mut();
        if position == intervals[interval].start() {
            intervals[interval].clear_register();
            let other = intervals[interval]
                .high_interval()
                .or_else(|| intervals[interval].low_interval());
            if let Some(other) = other {
                intervals[other].clear_register();
            }
            return Ok(interval);
        }

        let Some(sibling) = intervals.split_at(interval, position)? else {
            return Err(invariant_error!("Cannot split {} at {}: already dead", interval, position));
        };
        if let Some(high) = intervals[interval].high_interval() {
            let Some(high_sibling) = intervals.split_at(high, position)? else {
                return Err(invariant_error!("High half {} dead at {}", high, position));
            };
            intervals.link_pair(sibling, high_sibling);
        } else if let Some(low) = intervals[interval].low_interval() {
            let Some(low_sibling) = intervals.split_at(low, position)? else {
                return Err(invariant_error!("Low half {} dead at {}", low, position));
            };
            intervals.link_pair(low_sibling, sibling);
        }

        trace!("Split {} at {} into {}", interval, position, sibling);
        self.events
            .record(EventKind::IntervalSplit)
            .at_position(position)
            .message(format!("{interval} -> {sibling}"));
        Ok(sibling)
    }

    /// Splits `interval` somewhere in `(from, to]`, preferring a block
    /// boundary outside loops over `to` itself.
    fn split_between(&mut self, interval: IntervalId, from: usize, to: usize) -> Result<IntervalId> {
        let Some(block_from) = self.liveness.block_from_position(from / 2) else {
            return Err(invariant_error!("No block at position {}", from));
        };
        let Some(mut block_to) = self.liveness.block_from_position(to / 2) else {
            return Err(invariant_error!("No block at position {}", to));
        };
        if block_from == block_to {
            return self.split(interval, to);
        }

        // Hoist the split into the dominated block of `block_from`'s
        // dominator that starts earliest after `from`.
        let dominators = self.liveness.dominators();
        if let Some(dominator) = dominators.immediate_dominator(block_from) {
            for dominated in dominators.dominated(dominator) {
                let position = self.liveness.block_start(dominated);
                if position > from && self.liveness.block_start(block_to) > position {
                    block_to = dominated;
                }
            }
        }

        // Move it out of loops that do not contain `from`.
        let from_start = self.liveness.block_start(block_from);
        for loop_id in self.liveness.loops().enclosing_loops(block_to) {
            let header = self.liveness.loops().get(loop_id).header;
            if from_start >= self.liveness.block_start(header) {
                break;
            }
            block_to = header;
        }

        let position = self.liveness.block_start(block_to);
        self.split(interval, position)
    }

    /// Gives the value of `interval` a stack home, once per value.
    ///
    /// Parameters reuse their incoming slot and constants are rematerialized,
    /// so neither takes a slot.
    fn allocate_spill_slot_for(&mut self, interval: IntervalId) -> Result<()> {
        let intervals = self.liveness.intervals();
        if intervals[interval].is_high() {
            // Covered by the two slots of the low half.
            return Ok(());
        }
        let parent = intervals[interval].parent();
        if intervals[parent].has_spill_slot() {
            return Ok(());
        }
        let Some(defined_by) = intervals[parent].defined_by() else {
            return Err(invariant_error!("{} has no definition to spill", interval));
        };

        let instruction = self.graph.instruction(defined_by);
        if let InstructionKind::Parameter { stack_slot, .. } = &instruction.kind {
            let slot = *stack_slot;
            self.liveness.intervals_mut()[parent].set_spill_slot(slot);
            return Ok(());
        }
        if instruction.is_constant() {
            return Ok(());
        }

        let ty = intervals[parent].ty();
        let start = intervals[parent].start();
        let end = intervals[intervals.last_sibling(interval)].end();
        let slot = self.spill_slots.allocate(ty, start, end)?;
        self.liveness.intervals_mut()[parent].set_spill_slot(slot);

        trace!("Spill slot {} ({}) for {}", slot, ty, parent);
        self.events
            .record(EventKind::SpillSlotAllocated)
            .at_position(start)
            .message(format!("{ty} slot {slot} for {defined_by}"));
        Ok(())
    }
}

/// Inserts `interval` into `list`, kept sorted by decreasing start so the
/// next interval to process is at the end.
///
/// A pair is inserted with its low half after its high half, so the low is
/// processed first. Slow-path intervals go after other intervals with the
/// same start, so they see every interval live there as active.
fn add_sorted(list: &mut Vec<IntervalId>, intervals: &IntervalArena, interval: IntervalId) {
    let current = &intervals[interval];
    let mut insert_at = 0;
    for i in (1..=list.len()).rev() {
        let existing = &intervals[list[i - 1]];
        if (existing.starts_after(current) && !existing.is_high())
            || (existing.start() == current.start() && existing.is_slow_path_safepoint())
        {
            insert_at = i;
            break;
        }
    }

    list.insert(insert_at, interval);
    if let Some(high) = current.high_interval() {
        list.insert(insert_at, high);
    } else if let Some(low) = current.low_interval() {
        list.insert(insert_at + 1, low);
    }
}

/// Removes the pair half of `interval` from `list`.
///
/// # Returns
///
/// The index the half was removed from, if it was in the list.
fn remove_other_half(
    list: &mut Vec<IntervalId>,
    intervals: &IntervalArena,
    interval: IntervalId,
) -> Option<usize> {
    let other = intervals[interval]
        .high_interval()
        .or_else(|| intervals[interval].low_interval())?;
    let index = list.iter().position(|&id| id == other)?;
    list.remove(index);
    Some(index)
}

/// Frees the register of an input that is dead or in a hole at `position`.
fn free_if_not_cover_at(
    intervals: &IntervalArena,
    interval: IntervalId,
    position: usize,
    free_until: &mut [usize],
) {
    let current = &intervals[interval];
    let until = if current.is_dead_at(position) {
        MAX_POSITION
    } else if !current.covers(position) {
        intervals
            .first_use_after(interval, position)
            .unwrap_or(MAX_POSITION)
    } else {
        return;
    };

    let high = current.high_interval().and_then(|high| intervals[high].register());
    for reg in current.register().into_iter().chain(high) {
        if let Some(slot) = free_until.get_mut(reg) {
            *slot = until;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::IntervalFlags,
        ir::{CallKind, LocationSummary},
    };

    fn straight_line() -> (Graph, Vec<InstrId>) {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, body);
        graph.add_edge(body, exit);

        let a = graph.append(
            entry,
            InstructionKind::Parameter { index: 0, stack_slot: 0 },
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::requires_register()),
        );
        graph.append(entry, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());
        let b = graph.append(
            body,
            InstructionKind::Op("add"),
            ValueType::Int,
            &[a, a],
            LocationSummary::new(CallKind::NoCall)
                .with_input(Location::requires_register())
                .with_input(Location::requires_register())
                .with_output(Location::requires_register()),
        );
        graph.append(
            body,
            InstructionKind::Return,
            ValueType::Void,
            &[b],
            LocationSummary::none().with_input(Location::requires_register()),
        );
        graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
        (graph, vec![a, b])
    }

    #[test]
    fn test_add_sorted_keeps_decreasing_start() -> Result<()> {
        let (graph, values) = straight_line();
        let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let intervals = liveness.intervals_mut();
        let early = intervals.make_interval(ValueType::Int, values[0], IntervalFlags::empty());
        intervals[early].add_range(2, 10);
        let late = intervals.make_interval(ValueType::Int, values[1], IntervalFlags::empty());
        intervals[late].add_range(6, 8);
        let middle = intervals.make_temp(ValueType::Int);
        intervals[middle].add_range(4, 5);

        let mut list = Vec::new();
        add_sorted(&mut list, intervals, early);
        add_sorted(&mut list, intervals, late);
        add_sorted(&mut list, intervals, middle);
        assert_eq!(list, vec![late, middle, early]);
        Ok(())
    }

    #[test]
    fn test_add_sorted_puts_low_after_high() -> Result<()> {
        let (graph, values) = straight_line();
        let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let intervals = liveness.intervals_mut();
        let low = intervals.make_interval(ValueType::Long, values[0], IntervalFlags::empty());
        intervals[low].add_range(2, 10);
        let high = intervals.add_high_interval(low, false);

        let mut list = Vec::new();
        add_sorted(&mut list, intervals, low);
        assert_eq!(list, vec![high, low]);
        assert_eq!(list.pop(), Some(low));
        Ok(())
    }

    #[test]
    fn test_find_available_register_prefers_caller_save() -> Result<()> {
        let (mut graph, values) = straight_line();
        let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let interval = liveness.interval(values[1]).ok_or_else(|| invariant_error!("no interval"))?;
        let events = EventLog::new();
        let target = TargetConfig::new(4, 4).with_callee_saves(RegisterClass::Core, &[0, 1]);
        let allocator = RegisterAllocator::new(&mut graph, &mut liveness, &target, &events)?;

        let free = vec![MAX_POSITION; 4];
        assert_eq!(allocator.find_available_register(&free, interval), Some(2));

        let free = vec![MAX_POSITION, MAX_POSITION, 10, 12];
        assert_eq!(allocator.find_available_register(&free, interval), Some(0));
        Ok(())
    }

    #[test]
    fn test_find_available_register_pair_is_aligned() -> Result<()> {
        let (mut graph, _) = straight_line();
        let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let events = EventLog::new();
        let target = TargetConfig::new(6, 0).with_blocked(RegisterClass::Core, &[1]);
        let allocator = RegisterAllocator::new(&mut graph, &mut liveness, &target, &events)?;

        let free = vec![MAX_POSITION, MAX_POSITION, 8, MAX_POSITION, MAX_POSITION, MAX_POSITION];
        assert_eq!(allocator.find_available_register_pair(&free, 0), Some(4));

        // Ties go to the later pair.
        let free = vec![0; 6];
        assert_eq!(allocator.find_available_register_pair(&free, 0), Some(4));
        Ok(())
    }

    #[test]
    fn test_straight_line_allocation_uses_registers() -> Result<()> {
        let (mut graph, values) = straight_line();
        let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
        let events = EventLog::new();
        let target = TargetConfig::new(4, 4);
        let mut allocator = RegisterAllocator::new(&mut graph, &mut liveness, &target, &events)?;
        allocator.allocate_registers()?;
        allocator.validate()?;
        assert_eq!(allocator.spill_slots().total(), 0);
        drop(allocator);

        for value in values {
            assert!(graph.locations(value).out().is_register());
        }
        assert!(events.has(EventKind::RegisterAssigned));
        Ok(())
    }
}
