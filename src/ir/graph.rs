//! The control-flow graph handed to the allocator.

use std::fmt;

use crate::{
    ir::{
        Environment, InstrId, Instruction, InstructionKind, Location, LocationSummary, ValueType,
    },
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
    Error, Result,
};

/// Identifier of a basic block.
pub type BlockId = NodeId;

/// A basic block: phis first, then instructions, the last one a terminator.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    pub(crate) phis: Vec<InstrId>,
    pub(crate) instructions: Vec<InstrId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
}

impl Block {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            phis: Vec::new(),
            instructions: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    /// The id of this block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Phis, in creation order.
    #[must_use]
    pub fn phis(&self) -> &[InstrId] {
        &self.phis
    }

    /// Non-phi instructions, in program order.
    #[must_use]
    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }

    /// Predecessors; phi input `n` flows in from predecessor `n`.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Successors, in branch order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// The first non-phi instruction.
    #[must_use]
    pub fn first_instruction(&self) -> Option<InstrId> {
        self.instructions.first().copied()
    }

    /// The terminator.
    #[must_use]
    pub fn last_instruction(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }
}

/// An SSA control-flow graph.
///
/// Blocks and instructions are stored in arenas and addressed by id. The
/// first block created is the entry unless [`Graph::set_entry`] says
/// otherwise.
///
/// # Examples
///
/// ```rust
/// use linscan::ir::{Graph, InstructionKind, Location, LocationSummary, ValueType};
///
/// let mut graph = Graph::new();
/// let entry = graph.add_block();
/// let exit = graph.add_block();
/// graph.add_edge(entry, exit);
///
/// let c = graph.append(
///     entry,
///     InstructionKind::Constant(0),
///     ValueType::Int,
///     &[],
///     LocationSummary::none().with_output(Location::any()),
/// );
/// graph.append(
///     entry,
///     InstructionKind::Return,
///     ValueType::Void,
///     &[c],
///     LocationSummary::none().with_input(Location::Register(0)),
/// );
/// graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
///
/// assert!(graph.verify().is_ok());
/// assert_eq!(graph.block(entry).instructions().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Graph {
    blocks: Vec<Block>,
    instructions: Vec<Instruction>,
    entry: BlockId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            instructions: Vec::new(),
            entry: BlockId::new(0),
        }
    }

    /// Adds an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id));
        id
    }

    /// The entry block.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    /// Makes `block` the entry.
    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block;
    }

    /// Adds an edge. The order of calls fixes successor and predecessor
    /// order.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The block with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// All blocks, by id.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Number of instructions, phis and inserted moves included.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// The instruction with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Mutable access to an instruction.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn instruction_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instructions[id.index()]
    }

    /// Looks up an instruction without panicking.
    #[must_use]
    pub fn get_instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id.index())
    }

    /// The location summary of an instruction.
    #[must_use]
    pub fn locations(&self, id: InstrId) -> &LocationSummary {
        &self.instructions[id.index()].locations
    }

    /// Mutable access to the location summary of an instruction.
    pub fn locations_mut(&mut self, id: InstrId) -> &mut LocationSummary {
        &mut self.instructions[id.index()].locations
    }

    fn new_instruction(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: ValueType,
        inputs: &[InstrId],
        locations: LocationSummary,
    ) -> InstrId {
        let id = InstrId::new(self.instructions.len());
        self.instructions.push(Instruction {
            id,
            block,
            kind,
            ty,
            inputs: inputs.to_vec(),
            locations,
            environment: None,
        });
        id
    }

    /// Appends an instruction to `block`.
    pub fn append(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: ValueType,
        inputs: &[InstrId],
        locations: LocationSummary,
    ) -> InstrId {
        let id = self.new_instruction(block, kind, ty, inputs, locations);
        self.blocks[block.index()].instructions.push(id);
        id
    }

    /// Adds a phi to `block`. Inputs accept any location and so does the
    /// output.
    pub fn add_phi(&mut self, block: BlockId, ty: ValueType, inputs: &[InstrId]) -> InstrId {
        let mut locations = LocationSummary::none().with_output(Location::any());
        for _ in inputs {
            locations = locations.with_input(Location::any());
        }
        let id = self.new_instruction(block, InstructionKind::Phi, ty, inputs, locations);
        self.blocks[block.index()].phis.push(id);
        id
    }

    /// Attaches an environment to an instruction.
    pub fn set_environment(&mut self, instruction: InstrId, environment: Environment) {
        self.instructions[instruction.index()].environment = Some(environment);
    }

    /// Inserts a new instruction at `index` in the instruction list of
    /// `block`.
    pub(crate) fn insert_instruction(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstructionKind,
    ) -> InstrId {
        let id = self.new_instruction(block, kind, ValueType::Void, &[], LocationSummary::none());
        self.blocks[block.index()].instructions.insert(index, id);
        id
    }

    /// Returns `true` if the edge `from -> to` is critical: `from` has several
    /// successors and `to` several predecessors.
    #[must_use]
    pub fn is_critical_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.blocks[from.index()].successors.len() > 1
            && self.blocks[to.index()].predecessors.len() > 1
    }

    /// Returns the first critical edge, in block order.
    #[must_use]
    pub fn find_critical_edge(&self) -> Option<(BlockId, BlockId)> {
        self.blocks.iter().find_map(|block| {
            block
                .successors
                .iter()
                .find(|&&succ| self.is_critical_edge(block.id, succ))
                .map(|&succ| (block.id, succ))
        })
    }

    /// Inserts a block holding a single `Goto` on every critical edge.
    ///
    /// The new block takes the place of the original predecessor in the
    /// target's predecessor list, so phi inputs stay aligned. Returns the
    /// blocks created.
    pub fn split_critical_edges(&mut self) -> Vec<BlockId> {
        let mut created = Vec::new();
        for index in 0..self.blocks.len() {
            let to = BlockId::new(index);
            if self.blocks[index].predecessors.len() < 2 {
                continue;
            }
            for pred_index in 0..self.blocks[index].predecessors.len() {
                let from = self.blocks[index].predecessors[pred_index];
                if self.blocks[from.index()].successors.len() < 2 {
                    continue;
                }
                let middle = self.add_block();
                self.append(
                    middle,
                    InstructionKind::Goto,
                    ValueType::Void,
                    &[],
                    LocationSummary::none(),
                );
                self.blocks[middle.index()].predecessors.push(from);
                self.blocks[middle.index()].successors.push(to);
                self.blocks[index].predecessors[pred_index] = middle;
                for succ in &mut self.blocks[from.index()].successors {
                    if *succ == to {
                        *succ = middle;
                        break;
                    }
                }
                created.push(middle);
            }
        }
        created
    }

    /// Checks the structural contract the analyses rely on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGraph`] for a missing entry, an edge that is
    /// not recorded on both ends, a block without terminator, a phi whose
    /// input count differs from its block's predecessor count, or an
    /// instruction consuming an unknown value.
    pub fn verify(&self) -> Result<()> {
        if self.entry.index() >= self.blocks.len() {
            return Err(Error::InvalidGraph(format!(
                "entry {} is not a block of the graph",
                self.entry
            )));
        }
        if !self.blocks[self.entry.index()].predecessors.is_empty() {
            return Err(Error::InvalidGraph(format!(
                "entry {} has predecessors",
                self.entry
            )));
        }

        for block in &self.blocks {
            for &succ in &block.successors {
                let known = self
                    .blocks
                    .get(succ.index())
                    .is_some_and(|s| s.predecessors.contains(&block.id));
                if !known {
                    return Err(Error::InvalidGraph(format!(
                        "edge {} -> {} is not recorded on both ends",
                        block.id, succ
                    )));
                }
            }
            if block.instructions.is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "{} has no terminator",
                    block.id
                )));
            }
            for &phi in &block.phis {
                let inputs = self.instructions[phi.index()].inputs.len();
                if inputs != block.predecessors.len() {
                    return Err(Error::InvalidGraph(format!(
                        "phi {} in {} has {} inputs for {} predecessors",
                        phi,
                        block.id,
                        inputs,
                        block.predecessors.len()
                    )));
                }
            }
        }

        for instruction in &self.instructions {
            if let Some(input) = instruction
                .inputs
                .iter()
                .find(|input| input.index() >= self.instructions.len())
            {
                return Err(Error::InvalidGraph(format!(
                    "{} uses unknown value {}",
                    instruction.id, input
                )));
            }
        }
        Ok(())
    }
}

impl GraphBase for Graph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.blocks.len()).map(NodeId::new)
    }
}

impl Successors for Graph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.blocks[node.index()].successors.iter().copied()
    }
}

impl Predecessors for Graph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.blocks[node.index()].predecessors.iter().copied()
    }
}

impl RootedGraph for Graph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            let preds: Vec<String> = block.predecessors.iter().map(ToString::to_string).collect();
            let succs: Vec<String> = block.successors.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "{}: pred [{}] succ [{}]",
                block.id,
                preds.join(", "),
                succs.join(", ")
            )?;
            for &id in block.phis.iter().chain(&block.instructions) {
                writeln!(f, "  {}", self.instructions[id.index()])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goto(graph: &mut Graph, block: BlockId) {
        graph.append(block, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());
    }

    #[test]
    fn test_split_critical_edges_keeps_phi_order() {
        // 0 -> {1, 2}, 1 -> 2: the edge 0 -> 2 is critical
        let mut graph = Graph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        let b2 = graph.add_block();
        graph.add_edge(b0, b1);
        graph.add_edge(b0, b2);
        graph.add_edge(b1, b2);
        graph.append(b0, InstructionKind::If, ValueType::Void, &[], LocationSummary::none());
        goto(&mut graph, b1);
        goto(&mut graph, b2);

        assert_eq!(graph.find_critical_edge(), Some((b0, b2)));
        let created = graph.split_critical_edges();
        assert_eq!(created.len(), 1);
        let middle = created[0];

        assert_eq!(graph.block(b0).successors(), &[b1, middle]);
        assert_eq!(graph.block(b2).predecessors(), &[middle, b1]);
        assert_eq!(graph.block(middle).predecessors(), &[b0]);
        assert_eq!(graph.block(middle).successors(), &[b2]);
        assert_eq!(graph.find_critical_edge(), None);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_phi_arity() {
        let mut graph = Graph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.add_edge(b0, b1);
        let c = graph.append(
            b0,
            InstructionKind::Constant(1),
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::any()),
        );
        goto(&mut graph, b0);
        graph.add_phi(b1, ValueType::Int, &[c, c]);
        graph.append(b1, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());

        assert!(matches!(graph.verify(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_verify_rejects_missing_terminator() {
        let mut graph = Graph::new();
        graph.add_block();
        assert!(matches!(graph.verify(), Err(Error::InvalidGraph(_))));
        assert!(matches!(Graph::new().verify(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_graph_traits() {
        let mut graph = Graph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.add_edge(b0, b1);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(RootedGraph::entry(&graph), b0);
        assert_eq!(graph.successors(b0).collect::<Vec<_>>(), vec![b1]);
        assert_eq!(graph.predecessors(b1).collect::<Vec<_>>(), vec![b0]);
    }
}
