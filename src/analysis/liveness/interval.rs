//! Live intervals and the arena holding them.
//!
//! A [`LiveInterval`] describes where a value is live (a list of
//! [`LiveRange`]s), where it is used ([`UsePosition`]s) and which safepoints
//! it crosses. During allocation an interval is split into siblings, each
//! assigned a register or left in the value's spill slot.
//!
//! Intervals reference each other (parent, next sibling, the other half of a
//! register pair), so all of them live in one [`IntervalArena`] per
//! compilation unit and are addressed by [`IntervalId`]. Use positions are
//! stored once on the parent and shared by every sibling: a sibling's uses
//! are the parent's uses that fall inside its ranges.

use std::{collections::VecDeque, fmt, ops::Index};

use bitflags::bitflags;

use crate::{
    analysis::liveness::{LiveRange, SafepointPosition, UseKind, UsePosition},
    ir::{InstrId, Location, RegisterClass, ValueType},
    Result,
};

/// Identifier of an interval in its [`IntervalArena`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(pub(crate) usize);

impl IntervalId {
    /// Returns the raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntervalId({})", self.0)
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "li{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Properties fixed when an interval is created
    pub struct IntervalFlags : u8 {
        /// Pins a physical register over its ranges
        const FIXED = 0x01;
        /// Scratch register of a single instruction
        const TEMP = 0x02;
        /// Records the registers live at a call on a slow path
        const SLOW_PATH_SAFEPOINT = 0x04;
        /// High half of a register pair
        const HIGH = 0x08;
        /// Defined by a constant, which can be rematerialized instead of spilled
        const CONSTANT = 0x10;
        /// Defined by an incoming parameter, which owns a stack slot already
        const PARAMETER = 0x20;
        /// The definition must write a register
        const DEFINITION_REQUIRES_REGISTER = 0x40;
    }
}

/// The liveness and allocation state of a value, or of one split part of it.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    id: IntervalId,
    /// Ascending, non-touching ranges.
    ranges: VecDeque<LiveRange>,
    /// Uses, ascending. Only populated on parents.
    uses: VecDeque<UsePosition>,
    /// Environment uses, ascending. Only populated on parents.
    env_uses: VecDeque<UsePosition>,
    /// Safepoints crossed by this interval, ascending.
    safepoints: VecDeque<SafepointPosition>,
    ty: ValueType,
    flags: IntervalFlags,
    register: Option<usize>,
    /// Spill slot of the value; only meaningful on parents.
    spill_slot: Option<usize>,
    parent: IntervalId,
    next_sibling: Option<IntervalId>,
    /// The other half of a register pair.
    high_or_low: Option<IntervalId>,
    defined_by: Option<InstrId>,
}

impl LiveInterval {
    fn new(id: IntervalId, ty: ValueType, defined_by: Option<InstrId>, flags: IntervalFlags) -> Self {
        Self {
            id,
            ranges: VecDeque::new(),
            uses: VecDeque::new(),
            env_uses: VecDeque::new(),
            safepoints: VecDeque::new(),
            ty,
            flags,
            register: None,
            spill_slot: None,
            parent: id,
            next_sibling: None,
            high_or_low: None,
            defined_by,
        }
    }

    /// The id of this interval.
    #[must_use]
    pub fn id(&self) -> IntervalId {
        self.id
    }

    /// The type of the value.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// The creation flags.
    #[must_use]
    pub fn flags(&self) -> IntervalFlags {
        self.flags
    }

    /// Returns `true` for physical register intervals.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.flags.contains(IntervalFlags::FIXED)
    }

    /// Returns `true` for temp intervals.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.flags.contains(IntervalFlags::TEMP)
    }

    /// Returns `true` for slow-path safepoint intervals.
    #[must_use]
    pub fn is_slow_path_safepoint(&self) -> bool {
        self.flags.contains(IntervalFlags::SLOW_PATH_SAFEPOINT)
    }

    /// Returns `true` for the high half of a register pair.
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.flags.contains(IntervalFlags::HIGH)
    }

    /// Returns `true` for the low half of a register pair.
    #[must_use]
    pub fn is_low(&self) -> bool {
        !self.is_high() && self.high_or_low.is_some()
    }

    /// The high half, if this is a low interval.
    #[must_use]
    pub fn high_interval(&self) -> Option<IntervalId> {
        if self.is_high() {
            None
        } else {
            self.high_or_low
        }
    }

    /// The low half, if this is a high interval.
    #[must_use]
    pub fn low_interval(&self) -> Option<IntervalId> {
        if self.is_high() {
            self.high_or_low
        } else {
            None
        }
    }

    /// Returns `true` if the value lives in floating-point registers.
    #[must_use]
    pub fn is_floating_point(&self) -> bool {
        self.ty.is_floating_point()
    }

    /// The register class the interval is allocated in.
    #[must_use]
    pub fn register_class(&self) -> RegisterClass {
        self.ty.register_class()
    }

    /// Returns `true` for long and double values.
    #[must_use]
    pub fn needs_two_spill_slots(&self) -> bool {
        self.ty.is_wide()
    }

    /// The assigned register.
    #[must_use]
    pub fn register(&self) -> Option<usize> {
        self.register
    }

    /// Returns `true` if a register is assigned.
    #[must_use]
    pub fn has_register(&self) -> bool {
        self.register.is_some()
    }

    /// Assigns a register.
    pub fn set_register(&mut self, register: usize) {
        self.register = Some(register);
    }

    /// Removes the assigned register.
    pub fn clear_register(&mut self) {
        self.register = None;
    }

    /// The spill slot; read it on the parent.
    #[must_use]
    pub fn spill_slot(&self) -> Option<usize> {
        self.spill_slot
    }

    /// Returns `true` if a spill slot is assigned.
    #[must_use]
    pub fn has_spill_slot(&self) -> bool {
        self.spill_slot.is_some()
    }

    /// Assigns the spill slot.
    pub fn set_spill_slot(&mut self, slot: usize) {
        self.spill_slot = Some(slot);
    }

    /// The instruction defining the value; `None` on split siblings, fixed,
    /// temp and slow-path intervals.
    #[must_use]
    pub fn defined_by(&self) -> Option<InstrId> {
        self.defined_by
    }

    /// The parent interval, `self` if this is not a split sibling.
    #[must_use]
    pub fn parent(&self) -> IntervalId {
        self.parent
    }

    /// Returns `true` if this interval was created by splitting.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.parent != self.id
    }

    /// Returns `true` if this interval is not a split sibling.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.parent == self.id
    }

    /// The next sibling produced by splitting.
    #[must_use]
    pub fn next_sibling(&self) -> Option<IntervalId> {
        self.next_sibling
    }

    /// The ranges, ascending.
    pub fn ranges(&self) -> impl Iterator<Item = &LiveRange> {
        self.ranges.iter()
    }

    /// Number of ranges.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// The first range.
    #[must_use]
    pub fn first_range(&self) -> Option<&LiveRange> {
        self.ranges.front()
    }

    /// The last range.
    #[must_use]
    pub fn last_range(&self) -> Option<&LiveRange> {
        self.ranges.back()
    }

    /// Uses recorded on this interval (the full list on a parent).
    pub fn uses(&self) -> impl Iterator<Item = &UsePosition> {
        self.uses.iter()
    }

    /// Environment uses recorded on this interval.
    pub fn env_uses(&self) -> impl Iterator<Item = &UsePosition> {
        self.env_uses.iter()
    }

    /// Safepoints crossed by this interval.
    pub fn safepoints(&self) -> impl Iterator<Item = &SafepointPosition> {
        self.safepoints.iter()
    }

    /// First position covered, 0 for an interval without ranges.
    #[must_use]
    pub fn start(&self) -> usize {
        self.ranges.front().map_or(0, |r| r.start)
    }

    /// First position after the last range, 0 for an interval without ranges.
    #[must_use]
    pub fn end(&self) -> usize {
        self.ranges.back().map_or(0, |r| r.end)
    }

    /// Returns `true` if the interval starts after `other`.
    #[must_use]
    pub fn starts_after(&self, other: &LiveInterval) -> bool {
        self.start() > other.start()
    }

    /// Returns `true` once `position` is past the last range.
    #[must_use]
    pub fn is_dead_at(&self, position: usize) -> bool {
        position >= self.end()
    }

    /// Returns `true` if `position` lies in the span of this interval, holes
    /// included.
    #[must_use]
    pub fn is_defined_at(&self, position: usize) -> bool {
        self.start() <= position && !self.is_dead_at(position)
    }

    /// Returns `true` if some range covers `position`.
    #[must_use]
    pub fn covers(&self, position: usize) -> bool {
        let index = self.ranges.partition_point(|r| r.end <= position);
        self.ranges.get(index).is_some_and(|r| r.start <= position)
    }

    /// Returns the first position covered by both intervals.
    #[must_use]
    pub fn first_intersection_with(&self, other: &LiveInterval) -> Option<usize> {
        let mut mine = self.ranges.iter().peekable();
        let mut theirs = other.ranges.iter().peekable();
        loop {
            let (a, b) = (mine.peek()?, theirs.peek()?);
            if let Some(position) = a.intersection(b) {
                return Some(position);
            }
            if a.is_before(b) {
                mine.next();
            } else {
                theirs.next();
            }
        }
    }

    /// Returns `true` if this interval crosses a safepoint that always calls.
    #[must_use]
    pub fn has_will_call_safepoint(&self) -> bool {
        self.safepoints.iter().any(|s| s.will_call)
    }

    /// Adds the range `[start, end)` in front of the existing ones, merging
    /// with the first range when they touch.
    pub fn add_range(&mut self, start: usize, end: usize) {
        match self.ranges.front_mut() {
            None => self.ranges.push_front(LiveRange::new(start, end)),
            Some(first) if first.start == end => first.start = start,
            Some(first) if first.start == start && first.end == end => {
                debug_assert!(self.flags.contains(IntervalFlags::FIXED));
            }
            Some(first) => {
                debug_assert!(first.start > end);
                self.ranges.push_front(LiveRange::new(start, end));
            }
        }
    }

    /// Makes the interval cover the loop `[start, end)` entirely.
    ///
    /// Ranges ending inside the loop are merged into one; a range continuing
    /// after the loop is extended back to `start`.
    pub fn add_loop_range(&mut self, start: usize, end: usize) {
        debug_assert!(!self.ranges.is_empty());
        let after_loop = self.ranges.iter().position(|r| r.end >= end);
        match after_loop {
            None => {
                self.ranges.clear();
                self.ranges.push_back(LiveRange::new(start, end));
            }
            Some(index) if self.ranges[index].start <= end => {
                self.ranges.drain(..index);
                if let Some(first) = self.ranges.front_mut() {
                    first.start = start;
                }
            }
            Some(index) => {
                // The use after the loop is behind a lifetime hole.
                debug_assert!(index > 0);
                let last_in_loop = index.saturating_sub(1);
                self.ranges.drain(..last_in_loop);
                if let Some(first) = self.ranges.front_mut() {
                    first.start = start;
                    first.end = end;
                }
            }
        }
    }

    /// Moves the start of the interval to its definition. An interval without
    /// ranges (a value never used) gets `[from, from + 2)`.
    pub fn set_from(&mut self, from: usize) {
        match self.ranges.front_mut() {
            Some(first) => first.start = from,
            None => self.ranges.push_back(LiveRange::new(from, from + 2)),
        }
    }

    /// Records a use of the value and extends the ranges to reach it.
    ///
    /// Instructions are visited backwards, so a use is normally prepended.
    /// A second use by the same user at a later position is inserted in
    /// order instead. `block_start` is the lifetime start of the user's
    /// block. Environment uses only extend liveness when `keep_alive`.
    pub fn add_use(&mut self, use_position: UsePosition, block_start: usize, keep_alive: bool) {
        let position = use_position.position;
        let is_environment = use_position.is_environment();

        if !is_environment {
            if let Some(first) = self.uses.front().copied() {
                if first.user.is_some() && first.user == use_position.user && first.position < position {
                    // The same user consumes the value twice and one use
                    // dies before the other: keep the list sorted.
                    let at = self.uses.partition_point(|u| u.position < position);
                    self.uses.insert(at, use_position);
                    if let Some(range) = self.ranges.front_mut() {
                        if range.end == first.position {
                            range.end = position;
                        }
                    }
                    return;
                }
            }
            self.uses.push_front(use_position);
        } else {
            self.env_uses.push_front(use_position);
            if !keep_alive {
                return;
            }
        }

        match self.ranges.front() {
            None => self.ranges.push_front(LiveRange::new(block_start, position)),
            Some(first) if first.start == block_start => {
                debug_assert!(position <= first.end);
            }
            Some(first) => {
                debug_assert!(first.start >= position);
                self.ranges.push_front(LiveRange::new(block_start, position));
            }
        }
    }

    /// Records a use by a phi at the end of the predecessor block. The range
    /// itself comes from the predecessor's live-out set.
    pub fn add_phi_use(&mut self, phi: InstrId, input_index: usize, block_end: usize) {
        self.uses.push_front(UsePosition::new(
            Some(phi),
            UseKind::PhiInput(input_index),
            block_end,
            false,
        ));
    }

    /// Adds a synthesized use at the back edge of every loop around a use
    /// that does not contain the definition.
    ///
    /// `loops` yields `(header_start, lifetime_end)` from the innermost loop
    /// outwards; `defined_at` is the position of the definition.
    pub fn add_back_edge_uses(
        &mut self,
        defined_at: usize,
        loops: impl IntoIterator<Item = (usize, usize)>,
    ) {
        let mut added = Vec::new();
        for (header_start, lifetime_end) in loops {
            if defined_at >= header_start {
                // Defined inside this loop.
                break;
            }
            if self.uses.front().is_some_and(|u| u.position <= lifetime_end) {
                // A later use in this loop already added the back-edge uses.
                break;
            }
            added.push(UsePosition::synthesized(lifetime_end));
        }
        for use_position in added.into_iter().rev() {
            self.uses.push_front(use_position);
        }
    }

    /// Records the single use of a temp interval and covers its user.
    pub fn add_temp_use(&mut self, user: InstrId, temp_index: usize, position: usize) {
        debug_assert!(self.is_temp() && self.uses.is_empty());
        self.uses.push_front(UsePosition::new(
            Some(user),
            UseKind::Temp(temp_index),
            position,
            true,
        ));
        self.add_range(position, position + 1);
    }

    /// Records a safepoint crossed by the interval. Safepoints are added in
    /// ascending order.
    pub fn add_safepoint(&mut self, safepoint: SafepointPosition) {
        debug_assert!(self
            .safepoints
            .back()
            .map_or(true, |last| last.position < safepoint.position));
        self.safepoints.push_back(safepoint);
    }

    /// Returns `true` if `position` is the start of a parent interval.
    fn is_defining_position(&self, position: usize) -> bool {
        self.is_parent() && position == self.start()
    }
}

impl fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(defined_by) = self.defined_by {
            write!(f, " ({defined_by})")?;
        }
        f.write_str(" ranges:")?;
        for range in &self.ranges {
            write!(f, " {range}")?;
        }
        if let Some(register) = self.register {
            if self.is_floating_point() {
                write!(f, " f{register}")?;
            } else {
                write!(f, " r{register}")?;
            }
        }
        if self.is_fixed() {
            f.write_str(" fixed")?;
        }
        if self.is_temp() {
            f.write_str(" temp")?;
        }
        if self.is_high() {
            f.write_str(" high")?;
        }
        Ok(())
    }
}

/// Owner of every interval of one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct IntervalArena {
    intervals: Vec<LiveInterval>,
}

impl Index<IntervalId> for IntervalArena {
    type Output = LiveInterval;

    fn index(&self, id: IntervalId) -> &LiveInterval {
        &self.intervals[id.0]
    }
}

impl std::ops::IndexMut<IntervalId> for IntervalArena {
    fn index_mut(&mut self, id: IntervalId) -> &mut LiveInterval {
        &mut self.intervals[id.0]
    }
}

impl IntervalArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of intervals, siblings included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Returns `true` if the arena holds no interval.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterates every interval in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &LiveInterval> {
        self.intervals.iter()
    }

    fn push(&mut self, ty: ValueType, defined_by: Option<InstrId>, flags: IntervalFlags) -> IntervalId {
        let id = IntervalId(self.intervals.len());
        self.intervals.push(LiveInterval::new(id, ty, defined_by, flags));
        id
    }

    /// Creates the interval of a value.
    pub fn make_interval(&mut self, ty: ValueType, defined_by: InstrId, flags: IntervalFlags) -> IntervalId {
        self.push(ty, Some(defined_by), flags)
    }

    /// Creates the interval pinning a physical register.
    pub fn make_fixed(&mut self, register: usize, class: RegisterClass) -> IntervalId {
        let ty = match class {
            RegisterClass::Core => ValueType::Int,
            RegisterClass::FloatingPoint => ValueType::Float,
        };
        let id = self.push(ty, None, IntervalFlags::FIXED);
        self.intervals[id.0].register = Some(register);
        id
    }

    /// Creates a temp interval.
    pub fn make_temp(&mut self, ty: ValueType) -> IntervalId {
        self.push(ty, None, IntervalFlags::TEMP)
    }

    /// Creates the interval marking a slow-path call of `instruction`.
    pub fn make_slow_path(&mut self, instruction: InstrId) -> IntervalId {
        self.push(ValueType::Void, Some(instruction), IntervalFlags::SLOW_PATH_SAFEPOINT)
    }

    /// Creates the high half of `low`, duplicating its ranges and uses.
    pub fn add_high_interval(&mut self, low: IntervalId, is_temp: bool) -> IntervalId {
        debug_assert!(self[low].is_parent() && self[low].high_or_low.is_none());
        let mut flags = IntervalFlags::HIGH;
        if is_temp {
            flags |= IntervalFlags::TEMP;
        }
        flags |= self[low].flags & IntervalFlags::DEFINITION_REQUIRES_REGISTER;
        let (ty, defined_by) = (self[low].ty, self[low].defined_by);
        let high = self.push(ty, defined_by, flags);
        let (ranges, uses, env_uses) = {
            let source = &self[low];
            (source.ranges.clone(), source.uses.clone(), source.env_uses.clone())
        };
        let interval = &mut self[high];
        interval.ranges = ranges;
        interval.uses = uses;
        interval.env_uses = env_uses;
        interval.high_or_low = Some(low);
        self[low].high_or_low = Some(high);
        high
    }

    /// Links split halves of a pair.
    pub(crate) fn link_pair(&mut self, low: IntervalId, high: IntervalId) {
        self[low].high_or_low = Some(high);
        self[high].high_or_low = Some(low);
    }

    /// Splits `id` at `position`, returning the new sibling holding
    /// everything from `position` on, or `None` if the interval is dead
    /// there.
    ///
    /// Safepoints at or after `position` move to the sibling. Registers and
    /// spill slots are not carried over.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] when splitting a fixed or
    /// temp interval or at or before the interval's start.
    pub fn split_at(&mut self, id: IntervalId, position: usize) -> Result<Option<IntervalId>> {
        let interval = &self[id];
        if interval.is_fixed() || interval.is_temp() {
            return Err(invariant_error!("Cannot split {}", interval));
        }
        if position <= interval.start() {
            return Err(invariant_error!(
                "Split of {} at {} is not after its start",
                interval,
                position
            ));
        }
        if interval.end() <= position {
            return Ok(None);
        }

        let mut flags = IntervalFlags::empty();
        if interval.is_high() {
            flags |= IntervalFlags::HIGH;
        }
        let (ty, parent, next) = (interval.ty, interval.parent, interval.next_sibling);
        let new_id = self.push(ty, None, flags);

        let interval = &mut self.intervals[id.0];
        let split_index = interval.ranges.partition_point(|r| r.end <= position);
        let mut tail = interval.ranges.split_off(split_index);
        if let Some(first) = tail.front_mut() {
            if first.start < position {
                interval.ranges.push_back(LiveRange::new(first.start, position));
                first.start = position;
            }
        }
        let safepoint_index = interval.safepoints.partition_point(|s| s.position < position);
        let safepoints = interval.safepoints.split_off(safepoint_index);
        interval.next_sibling = Some(new_id);

        let sibling = &mut self.intervals[new_id.0];
        sibling.ranges = tail;
        sibling.safepoints = safepoints;
        sibling.parent = parent;
        sibling.next_sibling = next;
        Ok(Some(new_id))
    }

    /// The sibling whose span (holes included) contains `position`.
    #[must_use]
    pub fn sibling_at(&self, id: IntervalId, position: usize) -> Option<IntervalId> {
        self.siblings(id).find(|&s| self[s].is_defined_at(position))
    }

    /// Iterates `id` and the siblings after it.
    pub fn siblings(&self, id: IntervalId) -> impl Iterator<Item = IntervalId> + '_ {
        let mut current = Some(id);
        std::iter::from_fn(move || {
            let id = current?;
            current = self[id].next_sibling;
            Some(id)
        })
    }

    /// The last sibling of `id`.
    #[must_use]
    pub fn last_sibling(&self, id: IntervalId) -> IntervalId {
        self.siblings(id).last().unwrap_or(id)
    }

    /// The uses of the value `id` is part of.
    pub fn uses_of(&self, id: IntervalId) -> impl Iterator<Item = &UsePosition> {
        self[self[id].parent].uses.iter()
    }

    /// The environment uses of the value `id` is part of.
    pub fn env_uses_of(&self, id: IntervalId) -> impl Iterator<Item = &UsePosition> {
        self[self[id].parent].env_uses.iter()
    }

    /// First position after `position`, within `id`, where a register is
    /// required. The definition counts when `position` is the start of a
    /// parent whose output must be a register.
    #[must_use]
    pub fn first_register_use_after(&self, id: IntervalId, position: usize) -> Option<usize> {
        let interval = &self[id];
        if interval.is_temp() {
            return (position == interval.start()).then_some(position);
        }
        if interval.is_defining_position(position)
            && interval.flags.contains(IntervalFlags::DEFINITION_REQUIRES_REGISTER)
        {
            return Some(position);
        }
        let end = interval.end();
        self.uses_of(id)
            .take_while(|u| u.position <= end)
            .find(|u| u.position > position && u.requires_register)
            .map(|u| u.position)
    }

    /// First position, from the start of `id`, where a register is required.
    #[must_use]
    pub fn first_register_use(&self, id: IntervalId) -> Option<usize> {
        let start = self[id].start();
        self.first_register_use_after(id, start)
    }

    /// First use of any kind after `position` within `id`.
    #[must_use]
    pub fn first_use_after(&self, id: IntervalId, position: usize) -> Option<usize> {
        let interval = &self[id];
        if interval.is_temp() {
            return (position == interval.start()).then_some(position);
        }
        if interval.is_defining_position(position) {
            return Some(position);
        }
        let end = interval.end();
        self.uses_of(id)
            .take_while(|u| u.position <= end)
            .find(|u| u.position > position)
            .map(|u| u.position)
    }

    /// The location `id` holds its value in over its whole span.
    ///
    /// A register (or pair) if one is assigned, otherwise the constant for
    /// constants, otherwise the value's spill slot, otherwise
    /// [`Location::Invalid`].
    #[must_use]
    pub fn to_location(&self, id: IntervalId) -> Location {
        let interval = &self[id];
        if let Some(register) = interval.register {
            let high = interval
                .high_interval()
                .and_then(|high| self[high].register);
            return match (interval.is_floating_point(), high) {
                (true, Some(high)) => Location::FpuRegisterPair { low: register, high },
                (true, None) => Location::FpuRegister(register),
                (false, Some(high)) => Location::RegisterPair { low: register, high },
                (false, None) => Location::Register(register),
            };
        }
        let parent = &self[interval.parent];
        if parent.flags.contains(IntervalFlags::CONSTANT) {
            if let Some(defined_by) = parent.defined_by {
                return Location::Constant(defined_by);
            }
        }
        match parent.spill_slot {
            Some(slot) if interval.needs_two_spill_slots() => Location::DoubleStackSlot(slot),
            Some(slot) => Location::StackSlot(slot),
            None => Location::Invalid,
        }
    }

    /// The location of the value `id` belongs to at `position`.
    #[must_use]
    pub fn location_at(&self, id: IntervalId, position: usize) -> Location {
        self.sibling_at(id, position)
            .map_or(Location::Invalid, |sibling| self.to_location(sibling))
    }

    /// Returns `true` if `location` is of the kind `id` can be assigned:
    /// same register file, pair or single register.
    #[must_use]
    pub fn same_register_kind(&self, id: IntervalId, location: Location) -> bool {
        let interval = &self[id];
        let paired = interval.is_low() || interval.is_high();
        match (interval.is_floating_point(), paired) {
            (true, true) => matches!(location, Location::FpuRegisterPair { .. }),
            (true, false) => location.is_fpu_register(),
            (false, true) => matches!(location, Location::RegisterPair { .. }),
            (false, false) => location.is_register(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(arena: &IntervalArena, id: IntervalId) -> Vec<(usize, usize)> {
        arena[id].ranges().map(|r| (r.start, r.end)).collect()
    }

    fn value(arena: &mut IntervalArena, spans: &[(usize, usize)]) -> IntervalId {
        let id = arena.make_interval(ValueType::Int, InstrId::new(0), IntervalFlags::empty());
        for &(start, end) in spans.iter().rev() {
            arena[id].add_range(start, end);
        }
        id
    }

    #[test]
    fn test_add_range_merges_adjacent() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[(4, 8), (8, 12)]);
        assert_eq!(ranges(&arena, id), vec![(4, 12)]);

        arena[id].add_range(0, 2);
        assert_eq!(ranges(&arena, id), vec![(0, 2), (4, 12)]);
        assert_eq!(arena[id].start(), 0);
        assert_eq!(arena[id].end(), 12);
    }

    #[test]
    fn test_covers_and_holes() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[(2, 6), (10, 14)]);
        let interval = &arena[id];
        assert!(interval.covers(2));
        assert!(interval.covers(5));
        assert!(!interval.covers(6));
        assert!(!interval.covers(8));
        assert!(interval.covers(13));
        assert!(!interval.covers(14));
        assert!(interval.is_defined_at(8));
        assert!(interval.is_dead_at(14));
        assert!(!interval.is_dead_at(13));
    }

    #[test]
    fn test_first_intersection() {
        let mut arena = IntervalArena::new();
        let a = value(&mut arena, &[(2, 6), (10, 14)]);
        let b = value(&mut arena, &[(6, 10), (12, 20)]);
        let c = value(&mut arena, &[(14, 16)]);
        assert_eq!(arena[a].first_intersection_with(&arena[b]), Some(12));
        assert_eq!(arena[b].first_intersection_with(&arena[a]), Some(12));
        assert_eq!(arena[a].first_intersection_with(&arena[c]), None);
    }

    #[test]
    fn test_add_loop_range() {
        let mut arena = IntervalArena::new();

        // Uses only inside the loop.
        let inside = value(&mut arena, &[(12, 14), (16, 18)]);
        arena[inside].add_loop_range(10, 24);
        assert_eq!(ranges(&arena, inside), vec![(10, 24)]);

        // A use right after the loop continues the range.
        let after = value(&mut arena, &[(12, 14), (20, 30)]);
        arena[after].add_loop_range(10, 24);
        assert_eq!(ranges(&arena, after), vec![(10, 30)]);

        // A use after a hole behind the loop keeps the hole.
        let hole = value(&mut arena, &[(12, 14), (28, 30)]);
        arena[hole].add_loop_range(10, 24);
        assert_eq!(ranges(&arena, hole), vec![(10, 24), (28, 30)]);
    }

    #[test]
    fn test_set_from_without_ranges() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[]);
        arena[id].set_from(6);
        assert_eq!(ranges(&arena, id), vec![(6, 8)]);
        arena[id].set_from(5);
        assert_eq!(ranges(&arena, id), vec![(5, 8)]);
    }

    #[test]
    fn test_add_use_creates_ranges() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[]);
        let user = InstrId::new(5);

        arena[id].add_use(UsePosition::new(Some(user), UseKind::Input(0), 13, true), 10, false);
        assert_eq!(ranges(&arena, id), vec![(10, 13)]);

        // Earlier use in an earlier block: a new range in front.
        arena[id].add_use(UsePosition::new(Some(InstrId::new(2)), UseKind::Input(0), 5, false), 2, false);
        assert_eq!(ranges(&arena, id), vec![(2, 5), (10, 13)]);

        let positions: Vec<usize> = arena[id].uses().map(|u| u.position).collect();
        assert_eq!(positions, vec![5, 13]);
    }

    #[test]
    fn test_add_use_same_user_twice() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[]);
        let user = InstrId::new(5);

        // Fixed input dies at the instruction, the other one just after.
        arena[id].add_use(UsePosition::new(Some(user), UseKind::Input(0), 12, false), 10, false);
        arena[id].add_use(UsePosition::new(Some(user), UseKind::Input(1), 13, true), 10, false);

        let positions: Vec<usize> = arena[id].uses().map(|u| u.position).collect();
        assert_eq!(positions, vec![12, 13]);
        assert_eq!(ranges(&arena, id), vec![(10, 13)]);
    }

    #[test]
    fn test_environment_use_without_keep_alive() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[]);
        let env = UsePosition::new(
            Some(InstrId::new(3)),
            UseKind::Environment { depth: 0, index: 0 },
            9,
            false,
        );
        arena[id].add_use(env, 4, false);
        assert_eq!(arena[id].range_count(), 0);
        assert_eq!(arena[id].env_uses().count(), 1);

        arena[id].add_use(env, 4, true);
        assert_eq!(ranges(&arena, id), vec![(4, 9)]);
    }

    #[test]
    fn test_back_edge_uses() {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[]);

        // Inner loop [10, 20), outer loop [6, 30), value defined at 2.
        arena[id].add_back_edge_uses(2, [(10, 20), (6, 30)]);
        let positions: Vec<usize> = arena[id].uses().map(|u| u.position).collect();
        assert_eq!(positions, vec![20, 30]);
        assert!(arena[id].uses().all(UsePosition::is_synthesized));

        // A second use inside the inner loop adds nothing.
        arena[id].add_back_edge_uses(2, [(10, 20), (6, 30)]);
        assert_eq!(arena[id].uses().count(), 2);

        // Defined inside the outer loop: only the inner back edge counts.
        let inner = value(&mut arena, &[]);
        arena[inner].add_back_edge_uses(8, [(10, 20), (6, 30)]);
        let positions: Vec<usize> = arena[inner].uses().map(|u| u.position).collect();
        assert_eq!(positions, vec![20]);
    }

    #[test]
    fn test_split_inside_range() -> Result<()> {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[(2, 10), (14, 20)]);
        arena[id].add_safepoint(SafepointPosition {
            instruction: InstrId::new(3),
            position: 4,
            will_call: false,
        });
        arena[id].add_safepoint(SafepointPosition {
            instruction: InstrId::new(9),
            position: 16,
            will_call: true,
        });

        let sibling = arena.split_at(id, 6)?.unwrap();
        assert_eq!(ranges(&arena, id), vec![(2, 6)]);
        assert_eq!(ranges(&arena, sibling), vec![(6, 10), (14, 20)]);
        assert_eq!(arena[id].next_sibling(), Some(sibling));
        assert_eq!(arena[sibling].parent(), id);
        assert!(arena[sibling].is_split());
        assert_eq!(arena[id].safepoints().count(), 1);
        assert!(arena[sibling].has_will_call_safepoint());
        assert!(!arena[id].has_will_call_safepoint());
        Ok(())
    }

    #[test]
    fn test_split_in_hole_and_chain() -> Result<()> {
        let mut arena = IntervalArena::new();
        let id = value(&mut arena, &[(2, 6), (10, 14), (18, 22)]);

        let second = arena.split_at(id, 16)?.unwrap();
        assert_eq!(ranges(&arena, id), vec![(2, 6), (10, 14)]);
        assert_eq!(ranges(&arena, second), vec![(18, 22)]);

        let middle = arena.split_at(id, 8)?.unwrap();
        assert_eq!(ranges(&arena, id), vec![(2, 6)]);
        assert_eq!(ranges(&arena, middle), vec![(10, 14)]);
        assert_eq!(arena.siblings(id).collect::<Vec<_>>(), vec![id, middle, second]);
        assert_eq!(arena.last_sibling(id), second);
        assert_eq!(arena.sibling_at(id, 12), Some(middle));
        assert_eq!(arena.sibling_at(id, 16), None);
        assert_eq!(arena.sibling_at(id, 21), Some(second));

        assert!(arena.split_at(id, 6)?.is_none());
        assert!(arena.split_at(id, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_register_uses() {
        let mut arena = IntervalArena::new();
        let id = arena.make_interval(
            ValueType::Int,
            InstrId::new(0),
            IntervalFlags::DEFINITION_REQUIRES_REGISTER,
        );
        arena[id].add_use(UsePosition::new(Some(InstrId::new(4)), UseKind::Input(0), 15, true), 10, false);
        arena[id].add_use(UsePosition::new(Some(InstrId::new(2)), UseKind::Input(0), 9, false), 2, false);
        arena[id].set_from(4);

        assert_eq!(arena.first_register_use(id), Some(4));
        assert_eq!(arena.first_register_use_after(id, 5), Some(15));
        assert_eq!(arena.first_use_after(id, 5), Some(9));
        assert_eq!(arena.first_use_after(id, 15), None);
    }

    #[test]
    fn test_to_location() {
        let mut arena = IntervalArena::new();
        let constant = arena.make_interval(ValueType::Int, InstrId::new(1), IntervalFlags::CONSTANT);
        assert_eq!(arena.to_location(constant), Location::Constant(InstrId::new(1)));

        let wide = arena.make_interval(ValueType::Long, InstrId::new(2), IntervalFlags::empty());
        arena[wide].add_range(0, 10);
        let high = arena.add_high_interval(wide, false);
        assert!(arena[wide].is_low());
        assert!(arena[high].is_high());
        assert_eq!(arena[high].range_count(), 1);

        arena[wide].set_spill_slot(4);
        assert_eq!(arena.to_location(wide), Location::DoubleStackSlot(4));

        arena[wide].set_register(2);
        arena[high].set_register(3);
        assert_eq!(arena.to_location(wide), Location::RegisterPair { low: 2, high: 3 });
        assert!(arena.same_register_kind(wide, Location::RegisterPair { low: 0, high: 1 }));
        assert!(!arena.same_register_kind(wide, Location::Register(0)));
    }

    #[test]
    fn test_high_half_shares_definition_register_use() {
        let mut arena = IntervalArena::new();
        let wide = arena.make_interval(
            ValueType::Long,
            InstrId::new(3),
            IntervalFlags::DEFINITION_REQUIRES_REGISTER,
        );
        arena[wide].add_range(6, 12);
        arena[wide].add_use(UsePosition::new(Some(InstrId::new(5)), UseKind::Input(0), 11, false), 6, false);

        let high = arena.add_high_interval(wide, false);
        assert_eq!(arena.first_register_use(wide), Some(6));
        assert_eq!(arena.first_register_use(high), Some(6));
        assert_eq!(arena.first_register_use_after(high, 7), None);
    }
}
