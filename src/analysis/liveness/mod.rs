//! SSA liveness analysis.
//!
//! Numbers every instruction along the linear block order, computes live-in,
//! live-out and kill sets per block, and builds one [`LiveInterval`] for each
//! value whose output has a location.
//!
//! # Lifetime Positions
//!
//! Each block starts at an even position shared by its phis. Every other
//! instruction takes two positions: the even one where it reads its inputs
//! and the odd one where its output becomes live. The block ends after its
//! last instruction.
//!
//! ```text
//! B0  [0]                 block start
//!     2: c0 = Constant    c0 live from 2
//!     4: Goto             B0 ends at 6
//! B1  [6]   p0 = Phi      phis live from the block start
//!     8: Add p0, c0       inputs read at 8, output from 9
//! ```
//!
//! # Uses
//!
//! An input is used at `position + 1` (it stays alive across the reading
//! instruction) unless it is fixed or aliased by the output, in which case it
//! dies at `position`. Phi inputs are used at the end of the corresponding
//! predecessor. Inside loops, a synthesized use is added at the back edge of
//! every loop enclosing the use but not the definition.
//!
//! Environment uses only extend liveness for references, at deoptimization
//! points, or in debuggable code; the interpreter state of other values may
//! be lost.

mod interval;
mod range;

pub use interval::{IntervalArena, IntervalFlags, IntervalId, LiveInterval};
pub use range::{LiveRange, SafepointPosition, UseKind, UsePosition};

use log::{debug, trace};

use crate::{
    analysis::{
        loops::{detect_loops, LoopForest, LoopId},
        order::linearize,
    },
    ir::{BlockId, Graph, InstrId, Instruction, Location, Policy},
    utils::{
        graph::algorithms::{compute_dominators_rooted, DominatorTree},
        BitSet,
    },
    Error, Result,
};

/// Liveness sets and lifetime span of one block.
#[derive(Debug, Clone)]
pub struct BlockLiveness {
    /// First position of the block.
    pub start: usize,
    /// First position after the block.
    pub end: usize,
    /// Values live at the block entry, by SSA index.
    pub live_in: BitSet,
    /// Values live at the block exit, by SSA index.
    pub live_out: BitSet,
    /// Values defined in the block, by SSA index.
    pub kill: BitSet,
}

/// Result of the liveness analysis of one graph.
///
/// Owns the [`IntervalArena`] of the compilation unit; the allocator splits
/// and assigns intervals in place through [`SsaLivenessAnalysis::intervals_mut`].
#[derive(Debug, Clone)]
pub struct SsaLivenessAnalysis {
    linear_order: Vec<BlockId>,
    loops: LoopForest,
    dominators: DominatorTree,
    loop_lifetime_ends: Vec<usize>,
    blocks: Vec<Option<BlockLiveness>>,
    positions: Vec<Option<usize>>,
    ssa_indices: Vec<Option<usize>>,
    instructions_from_ssa_index: Vec<InstrId>,
    /// One entry per even position: `None` marks a block start.
    instructions_from_position: Vec<Option<InstrId>>,
    blocks_from_position: Vec<BlockId>,
    intervals: IntervalArena,
    interval_of: Vec<Option<IntervalId>>,
    debuggable: bool,
}

impl SsaLivenessAnalysis {
    /// Runs the analysis.
    ///
    /// In `debuggable` mode every environment use keeps its value alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGraph`] for structurally broken graphs,
    /// [`Error::CriticalEdge`] if an edge still needs splitting,
    /// [`Error::IrreducibleLoop`] for irreducible control flow and
    /// [`Error::InvariantViolation`] when a value is used without a reaching
    /// definition.
    pub fn analyze(graph: &Graph, debuggable: bool) -> Result<Self> {
        graph.verify()?;
        if let Some((from, to)) = graph.find_critical_edge() {
            return Err(Error::CriticalEdge { from, to });
        }

        let dominators = compute_dominators_rooted(graph);
        let loops = detect_loops(graph, &dominators)?;
        let reachable: Vec<bool> = graph
            .blocks()
            .map(|block| dominators.is_reachable(block.id()))
            .collect();
        let linear_order = linearize(graph, &loops, &reachable)?;

        let mut analysis = Self {
            linear_order,
            loops,
            dominators,
            loop_lifetime_ends: Vec::new(),
            blocks: vec![None; graph.block_count()],
            positions: vec![None; graph.instruction_count()],
            ssa_indices: vec![None; graph.instruction_count()],
            instructions_from_ssa_index: Vec::new(),
            instructions_from_position: Vec::new(),
            blocks_from_position: Vec::new(),
            intervals: IntervalArena::new(),
            interval_of: vec![None; graph.instruction_count()],
            debuggable,
        };

        analysis.number_instructions(graph);
        analysis.compute_loop_lifetime_ends();
        analysis.compute_live_ranges(graph)?;
        analysis.compute_live_in_and_live_out_sets(graph);
        analysis.check_entry_live_in(graph)?;

        debug!(
            "liveness: {} blocks, {} values, {} positions",
            analysis.linear_order.len(),
            analysis.instructions_from_ssa_index.len(),
            analysis.max_lifetime_position() + 1
        );
        Ok(analysis)
    }

    fn number_instructions(&mut self, graph: &Graph) {
        let mut position = 0;
        let order = self.linear_order.clone();
        for &block_id in &order {
            let block = graph.block(block_id);
            let start = position;

            for &phi in block.phis() {
                self.number(graph.instruction(phi), position);
            }
            self.instructions_from_position.push(None);
            self.blocks_from_position.push(block_id);
            position += 2;

            for &id in block.instructions() {
                self.number(graph.instruction(id), position);
                self.instructions_from_position.push(Some(id));
                self.blocks_from_position.push(block_id);
                position += 2;
            }

            self.blocks[block_id.index()] = Some(BlockLiveness {
                start,
                end: position,
                live_in: BitSet::new(0),
                live_out: BitSet::new(0),
                kill: BitSet::new(0),
            });
        }

        let values = self.instructions_from_ssa_index.len();
        for info in self.blocks.iter_mut().flatten() {
            info.live_in = BitSet::new(values);
            info.live_out = BitSet::new(values);
            info.kill = BitSet::new(values);
        }
    }

    fn number(&mut self, instruction: &Instruction, position: usize) {
        let id = instruction.id();
        self.positions[id.index()] = Some(position);
        if !instruction.locations.out().is_valid() {
            return;
        }

        self.ssa_indices[id.index()] = Some(self.instructions_from_ssa_index.len());
        self.instructions_from_ssa_index.push(id);

        let mut flags = IntervalFlags::empty();
        if instruction.is_constant() {
            flags |= IntervalFlags::CONSTANT;
        }
        if instruction.is_parameter() {
            flags |= IntervalFlags::PARAMETER;
        }
        if definition_requires_register(instruction) {
            flags |= IntervalFlags::DEFINITION_REQUIRES_REGISTER;
        }
        let interval = self.intervals.make_interval(instruction.ty, id, flags);
        self.interval_of[id.index()] = Some(interval);
    }

    /// The end of a loop is the end of its last back edge.
    fn compute_loop_lifetime_ends(&mut self) {
        self.loop_lifetime_ends = self
            .loops
            .iter()
            .map(|info| {
                info.back_edges
                    .iter()
                    .filter_map(|&block| self.blocks[block.index()].as_ref())
                    .map(|block| block.end)
                    .max()
                    .unwrap_or(0)
            })
            .collect();
    }

    fn compute_live_ranges(&mut self, graph: &Graph) -> Result<()> {
        let values = self.instructions_from_ssa_index.len();
        let order = self.linear_order.clone();

        for &block_id in order.iter().rev() {
            let block = graph.block(block_id);
            let (block_start, block_end) = self.block_span(block_id);
            let mut live_in = BitSet::new(values);
            let mut kill = BitSet::new(values);

            // Phi inputs flowing through this block are live at its end.
            for &successor in block.successors() {
                if let Some(info) = &self.blocks[successor.index()] {
                    live_in.union_with(&info.live_in);
                }
                let Some(input_index) = graph
                    .block(successor)
                    .predecessors()
                    .iter()
                    .position(|&pred| pred == block_id)
                else {
                    continue;
                };
                for &phi in graph.block(successor).phis() {
                    let Some(&input) = graph.instruction(phi).inputs.get(input_index) else {
                        continue;
                    };
                    let (interval, ssa_index) = self.value_of(input, phi)?;
                    self.add_back_edge_uses(graph, interval, input, block_id);
                    self.intervals[interval].add_phi_use(phi, input_index, block_end);
                    live_in.insert(ssa_index);
                }
            }

            for index in live_in.iter() {
                let interval = self.interval_for_ssa_index(index)?;
                self.intervals[interval].add_range(block_start, block_end);
            }

            for &id in block.instructions().iter().rev() {
                let instruction = graph.instruction(id);
                let position = self.position(id).unwrap_or(block_start);

                if let (Some(ssa_index), Some(interval)) = (self.ssa_index(id), self.interval(id)) {
                    kill.insert(ssa_index);
                    live_in.remove(ssa_index);
                    self.intervals[interval].set_from(position);
                }

                if let Some(environment) = &instruction.environment {
                    for (depth, env) in environment.chain() {
                        for (index, value) in env.values.iter().enumerate() {
                            let Some(value) = *value else {
                                continue;
                            };
                            let keep_alive = self.should_be_live_for_environment(graph, instruction, value);
                            let Some(interval) = self.interval(value) else {
                                continue;
                            };
                            if keep_alive {
                                if let Some(ssa_index) = self.ssa_index(value) {
                                    live_in.insert(ssa_index);
                                }
                            }
                            let use_position = UsePosition::new(
                                Some(id),
                                UseKind::Environment { depth, index },
                                position + 1,
                                false,
                            );
                            self.intervals[interval].add_use(use_position, block_start, keep_alive);
                        }
                    }
                }

                let locations = &instruction.locations;
                for (input_index, &input) in instruction.inputs.iter().enumerate() {
                    let expected = locations.in_at(input_index);
                    if !expected.is_valid() {
                        continue;
                    }
                    if self.interval(input).is_none() && !produces_value(graph, input) {
                        // Emitted at its use site, nothing to track.
                        continue;
                    }
                    let (interval, ssa_index) = self.value_of(input, id)?;
                    let position = if locations.is_fixed_input(input_index)
                        || locations.output_uses_same_as(input_index)
                    {
                        position
                    } else {
                        position + 1
                    };
                    live_in.insert(ssa_index);
                    if self.loops.is_in_loop(block_id) {
                        self.add_back_edge_uses(graph, interval, input, block_id);
                    }
                    let requires_register = expected.is_unallocated() && expected.requires_register_kind();
                    let use_position = UsePosition::new(
                        Some(id),
                        UseKind::Input(input_index),
                        position,
                        requires_register,
                    );
                    self.intervals[interval].add_use(use_position, block_start, false);
                }
            }

            for &phi in block.phis() {
                if let (Some(ssa_index), Some(interval)) = (self.ssa_index(phi), self.interval(phi)) {
                    kill.insert(ssa_index);
                    live_in.remove(ssa_index);
                    self.intervals[interval].set_from(block_start);
                }
            }

            if let Some(loop_id) = self.loops.loop_for_header(block_id) {
                let loop_end = self.loop_lifetime_ends[loop_id];
                for index in live_in.iter() {
                    let interval = self.interval_for_ssa_index(index)?;
                    self.intervals[interval].add_loop_range(block_start, loop_end);
                }
            }

            if let Some(info) = self.blocks[block_id.index()].as_mut() {
                info.live_in = live_in;
                info.kill = kill;
            }
        }
        Ok(())
    }

    fn compute_live_in_and_live_out_sets(&mut self, graph: &Graph) {
        let order = self.linear_order.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for &block_id in order.iter().rev() {
                let mut live_out = match &self.blocks[block_id.index()] {
                    Some(info) => info.live_out.clone(),
                    None => continue,
                };
                let mut out_changed = false;
                for &successor in graph.block(block_id).successors() {
                    if let Some(info) = &self.blocks[successor.index()] {
                        out_changed |= live_out.union_with(&info.live_in);
                    }
                }
                if let Some(info) = self.blocks[block_id.index()].as_mut() {
                    if out_changed {
                        changed |= info.live_in.union_if_not_in(&live_out, &info.kill);
                    }
                    info.live_out = live_out;
                }
            }
        }
    }

    fn check_entry_live_in(&self, graph: &Graph) -> Result<()> {
        let Some(entry) = &self.blocks[graph.entry_block().index()] else {
            return Ok(());
        };
        if let Some(index) = entry.live_in.iter().next() {
            let value = self.instructions_from_ssa_index[index];
            return Err(invariant_error!(
                "Value {} is used without a reaching definition",
                graph.instruction(value)
            ));
        }
        Ok(())
    }

    fn value_of(&self, input: InstrId, user: InstrId) -> Result<(IntervalId, usize)> {
        match (self.interval(input), self.ssa_index(input)) {
            (Some(interval), Some(ssa_index)) => Ok((interval, ssa_index)),
            _ => Err(invariant_error!(
                "Instruction {} uses {} which has no live interval",
                user,
                input
            )),
        }
    }

    fn interval_for_ssa_index(&self, index: usize) -> Result<IntervalId> {
        self.instructions_from_ssa_index
            .get(index)
            .and_then(|&id| self.interval(id))
            .ok_or_else(|| invariant_error!("No interval for SSA index {}", index))
    }

    fn add_back_edge_uses(&mut self, graph: &Graph, interval: IntervalId, value: InstrId, block: BlockId) {
        let Some(defined_at) = self.position(value) else {
            return;
        };
        let loops: Vec<(usize, usize)> = self
            .loops
            .enclosing_loops(block)
            .map(|loop_id| {
                let header = self.loops.get(loop_id).header;
                (self.block_span(header).0, self.loop_lifetime_ends[loop_id])
            })
            .collect();
        trace!("back-edge uses of {} from {:?}", graph.instruction(value), block);
        self.intervals[interval].add_back_edge_uses(defined_at, loops);
    }

    fn should_be_live_for_environment(&self, graph: &Graph, holder: &Instruction, value: InstrId) -> bool {
        if holder.is_deoptimize() || self.debuggable {
            return true;
        }
        graph.instruction(value).ty.is_reference()
    }

    /// Blocks in linear order.
    #[must_use]
    pub fn linear_order(&self) -> &[BlockId] {
        &self.linear_order
    }

    /// The loop forest of the graph.
    #[must_use]
    pub fn loops(&self) -> &LoopForest {
        &self.loops
    }

    /// The dominator tree of the graph.
    #[must_use]
    pub fn dominators(&self) -> &DominatorTree {
        &self.dominators
    }

    /// End of the last back edge of a loop.
    #[must_use]
    pub fn loop_lifetime_end(&self, loop_id: LoopId) -> usize {
        self.loop_lifetime_ends[loop_id]
    }

    /// Liveness of a block, `None` for unreachable blocks.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<&BlockLiveness> {
        self.blocks.get(block.index())?.as_ref()
    }

    /// `(start, end)` lifetime positions of a block, `(0, 0)` if unreachable.
    #[must_use]
    pub fn block_span(&self, block: BlockId) -> (usize, usize) {
        self.block(block).map_or((0, 0), |info| (info.start, info.end))
    }

    /// First position of a block.
    #[must_use]
    pub fn block_start(&self, block: BlockId) -> usize {
        self.block_span(block).0
    }

    /// First position after a block.
    #[must_use]
    pub fn block_end(&self, block: BlockId) -> usize {
        self.block_span(block).1
    }

    /// Lifetime position of an instruction numbered by the analysis.
    #[must_use]
    pub fn position(&self, instruction: InstrId) -> Option<usize> {
        self.positions.get(instruction.index()).copied().flatten()
    }

    /// Dense index of a value, `None` if the instruction produces none.
    #[must_use]
    pub fn ssa_index(&self, instruction: InstrId) -> Option<usize> {
        self.ssa_indices.get(instruction.index()).copied().flatten()
    }

    /// Number of values with an interval.
    #[must_use]
    pub fn number_of_ssa_values(&self) -> usize {
        self.instructions_from_ssa_index.len()
    }

    /// The instruction with SSA index `index`.
    #[must_use]
    pub fn instruction_from_ssa_index(&self, index: usize) -> InstrId {
        self.instructions_from_ssa_index[index]
    }

    /// The instruction at `index` (a position divided by two); `None` at a
    /// block start.
    #[must_use]
    pub fn instruction_from_position(&self, index: usize) -> Option<InstrId> {
        self.instructions_from_position.get(index).copied().flatten()
    }

    /// Returns `true` if `index` (a position divided by two) starts a block.
    #[must_use]
    pub fn is_at_block_boundary(&self, index: usize) -> bool {
        self.instructions_from_position
            .get(index)
            .is_some_and(Option::is_none)
    }

    /// The block containing `index` (a position divided by two).
    #[must_use]
    pub fn block_from_position(&self, index: usize) -> Option<BlockId> {
        self.blocks_from_position.get(index).copied()
    }

    /// Last position of the graph.
    #[must_use]
    pub fn max_lifetime_position(&self) -> usize {
        (self.instructions_from_position.len() * 2).saturating_sub(1)
    }

    /// The parent interval of a value.
    #[must_use]
    pub fn interval(&self, instruction: InstrId) -> Option<IntervalId> {
        self.interval_of.get(instruction.index()).copied().flatten()
    }

    /// All intervals.
    #[must_use]
    pub fn intervals(&self) -> &IntervalArena {
        &self.intervals
    }

    /// Mutable access to the intervals.
    pub fn intervals_mut(&mut self) -> &mut IntervalArena {
        &mut self.intervals
    }

    /// The instruction a temp interval serves and the temp's index.
    #[must_use]
    pub fn temp_user(&self, temp: IntervalId) -> Option<(InstrId, usize)> {
        let first = self.intervals[temp].uses().next()?;
        match (first.user, first.kind) {
            (Some(user), UseKind::Temp(index)) => Some((user, index)),
            _ => None,
        }
    }

    /// The register of `location` if `interval` could be assigned it.
    fn hint_register(&self, interval: IntervalId, location: Location) -> Option<usize> {
        if location.is_register_kind() && self.intervals.same_register_kind(interval, location) {
            location.register()
        } else {
            None
        }
    }

    /// Picks a register `interval` would like, given the position each
    /// register stays free until.
    ///
    /// Candidates, in order: the register of an input the definition can
    /// reuse, the register the value held at the end of a predecessor when
    /// the interval starts a block, then registers expected by its users.
    #[must_use]
    pub fn find_first_register_hint(
        &self,
        graph: &Graph,
        interval: IntervalId,
        free_until: &[usize],
    ) -> Option<usize> {
        let current = &self.intervals[interval];
        if current.is_temp() {
            return None;
        }
        let free = |register: usize, position: usize| {
            free_until.get(register).is_some_and(|&until| until >= position)
        };
        let start = current.start();
        let end = current.end();

        if current.is_parent() {
            if let Some(hint) = self.find_hint_at_definition(graph, interval) {
                if free(hint, start + 1) {
                    return Some(hint);
                }
            }
        }

        if current.is_split() && self.is_at_block_boundary(start / 2) {
            if let Some(block) = self.block_from_position(start / 2) {
                let next_register_use = self.intervals.first_register_use(interval).unwrap_or(usize::MAX);
                for &predecessor in graph.block(block).predecessors() {
                    let position = self.block_end(predecessor).saturating_sub(1);
                    if position >= start {
                        continue;
                    }
                    let existing = self
                        .intervals
                        .sibling_at(current.parent(), position)
                        .and_then(|sibling| self.intervals[sibling].register());
                    if let Some(register) = existing {
                        if free(register, next_register_use) {
                            return Some(register);
                        }
                    }
                }
            }
        }

        for use_position in self.intervals.uses_of(interval) {
            if use_position.position > end {
                break;
            }
            if use_position.position < start || use_position.is_synthesized() {
                continue;
            }
            let Some(user) = use_position.user else {
                continue;
            };
            let user_instruction = graph.instruction(user);
            match use_position.kind {
                UseKind::PhiInput(input_index) => {
                    if let Some(phi_interval) = self.interval(user) {
                        let location = self.intervals.to_location(phi_interval);
                        if let Some(register) = self.hint_register(interval, location) {
                            if free(register, use_position.position) {
                                return Some(register);
                            }
                        }
                    }
                    // Dying at the phi: try the register of another input.
                    let predecessors = graph.block(user_instruction.block()).predecessors();
                    let dies_at_phi = predecessors
                        .get(input_index)
                        .is_some_and(|&pred| self.block_end(pred) == end);
                    if dies_at_phi {
                        for (index, &input) in user_instruction.inputs.iter().enumerate() {
                            if index == input_index {
                                continue;
                            }
                            let (Some(other), Some(&pred)) = (self.interval(input), predecessors.get(index)) else {
                                continue;
                            };
                            let position = self.block_end(pred).saturating_sub(1);
                            let location = self.intervals.location_at(other, position);
                            if let Some(register) = self.hint_register(interval, location) {
                                if free(register, use_position.position) {
                                    return Some(register);
                                }
                            }
                        }
                    }
                }
                UseKind::Input(input_index) => {
                    let expected = user_instruction.locations.in_at(input_index);
                    let position = self.position(user).unwrap_or(0).saturating_sub(1);
                    if let Some(register) = self.hint_register(interval, expected) {
                        if free(register, position) {
                            return Some(register);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn find_hint_at_definition(&self, graph: &Graph, interval: IntervalId) -> Option<usize> {
        let defined_by = graph.instruction(self.intervals[interval].defined_by()?);
        if defined_by.is_phi() {
            let predecessors = graph.block(defined_by.block()).predecessors();
            for (index, &input) in defined_by.inputs.iter().enumerate() {
                let (Some(input_interval), Some(&pred)) = (self.interval(input), predecessors.get(index)) else {
                    continue;
                };
                let end = self.block_end(pred);
                let Some(sibling) = self.intervals.sibling_at(input_interval, end.saturating_sub(1)) else {
                    continue;
                };
                if self.intervals[sibling].end() == end {
                    let location = self.intervals.to_location(sibling);
                    if let Some(register) = self.hint_register(interval, location) {
                        return Some(register);
                    }
                }
            }
            return None;
        }

        if defined_by.locations.out() == Location::Unallocated(Policy::SameAsFirstInput) {
            let start = self.intervals[interval].start();
            let input_interval = self.interval(*defined_by.inputs.first()?)?;
            let sibling = self.intervals.sibling_at(input_interval, start.checked_sub(1)?)?;
            if self.intervals[sibling].end() == start {
                let location = self.intervals.to_location(sibling);
                return self.hint_register(interval, location);
            }
        }
        None
    }
}

/// Returns `true` if the definition of `instruction` must be a register.
fn definition_requires_register(instruction: &Instruction) -> bool {
    let locations = &instruction.locations;
    match locations.out() {
        Location::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister) => true,
        Location::Unallocated(Policy::SameAsFirstInput) => {
            let first = locations.in_at(0);
            first.is_register_kind() || first.requires_register_kind()
        }
        Location::Register(_)
        | Location::FpuRegister(_)
        | Location::RegisterPair { .. }
        | Location::FpuRegisterPair { .. } => true,
        _ => false,
    }
}

fn produces_value(graph: &Graph, instruction: InstrId) -> bool {
    graph
        .get_instruction(instruction)
        .is_some_and(|i| i.locations.out().is_valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstructionKind, LocationSummary, ValueType};

    fn constant(graph: &mut Graph, block: BlockId, value: i64) -> InstrId {
        graph.append(
            block,
            InstructionKind::Constant(value),
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::any()),
        )
    }

    fn ranges(analysis: &SsaLivenessAnalysis, value: InstrId) -> Vec<(usize, usize)> {
        let interval = analysis.interval(value).unwrap();
        analysis.intervals()[interval]
            .ranges()
            .map(|r| (r.start, r.end))
            .collect()
    }

    #[test]
    fn test_numbering_straight_line() -> Result<()> {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, exit);

        let c = constant(&mut graph, entry, 1);
        let ret = graph.append(
            entry,
            InstructionKind::Return,
            ValueType::Void,
            &[c],
            LocationSummary::none().with_input(Location::requires_register()),
        );
        graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

        let analysis = SsaLivenessAnalysis::analyze(&graph, false)?;
        assert_eq!(analysis.linear_order(), &[entry, exit]);
        assert_eq!(analysis.block_span(entry), (0, 6));
        assert_eq!(analysis.block_span(exit), (6, 10));
        assert_eq!(analysis.position(c), Some(2));
        assert_eq!(analysis.position(ret), Some(4));
        assert_eq!(analysis.number_of_ssa_values(), 1);
        assert_eq!(analysis.ssa_index(ret), None);
        assert!(analysis.is_at_block_boundary(0));
        assert!(analysis.is_at_block_boundary(3));
        assert_eq!(analysis.instruction_from_position(2), Some(ret));
        assert_eq!(analysis.block_from_position(3), Some(exit));
        assert_eq!(analysis.max_lifetime_position(), 9);

        // Used at 5, one past the return.
        assert_eq!(ranges(&analysis, c), vec![(2, 5)]);
        let interval = analysis.interval(c).unwrap();
        assert_eq!(analysis.intervals().first_register_use(interval), Some(5));
        Ok(())
    }

    #[test]
    fn test_unused_value_lives_at_its_definition() -> Result<()> {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let c = constant(&mut graph, entry, 7);
        graph.append(entry, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());

        let analysis = SsaLivenessAnalysis::analyze(&graph, false)?;
        assert_eq!(ranges(&analysis, c), vec![(2, 4)]);
        Ok(())
    }

    #[test]
    fn test_use_without_definition_is_rejected() {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let body = graph.add_block();
        graph.add_edge(entry, body);
        graph.add_edge(body, body);
        graph.append(entry, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());

        // Reads a value only defined further down the loop body.
        graph.append(
            body,
            InstructionKind::Op("use"),
            ValueType::Void,
            &[InstrId::new(2)],
            LocationSummary::none().with_input(Location::requires_register()),
        );
        let late = constant(&mut graph, body, 3);
        assert_eq!(late, InstrId::new(2));
        graph.append(body, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());

        let result = SsaLivenessAnalysis::analyze(&graph, false);
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));
    }

    #[test]
    fn test_environment_keep_alive_policy() -> Result<()> {
        for (ty, debuggable, expected_end) in [
            (ValueType::Int, false, 4),
            (ValueType::Int, true, 7),
            (ValueType::Reference, false, 7),
        ] {
            let mut graph = Graph::new();
            let entry = graph.add_block();
            let value = graph.append(
                entry,
                InstructionKind::Op("load"),
                ty,
                &[],
                LocationSummary::none().with_output(Location::requires_register()),
            );
            graph.append(entry, InstructionKind::Op("nop"), ValueType::Void, &[], LocationSummary::none());
            let check = graph.append(
                entry,
                InstructionKind::SuspendCheck,
                ValueType::Void,
                &[],
                LocationSummary::none(),
            );
            graph.set_environment(check, crate::ir::Environment::new(vec![Some(value)]));
            graph.append(entry, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());

            let analysis = SsaLivenessAnalysis::analyze(&graph, debuggable)?;
            let interval = analysis.interval(value).unwrap();
            assert_eq!(analysis.intervals()[interval].end(), expected_end, "{ty} debuggable={debuggable}");
            assert_eq!(analysis.intervals()[interval].env_uses().count(), 1);
        }
        Ok(())
    }
}
