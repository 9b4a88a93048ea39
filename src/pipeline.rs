//! Driving register allocation for whole compilation units.
//!
//! A compilation unit is one [`Graph`]. [`allocate_registers`] runs the full
//! per-unit pipeline on it:
//!
//! 1. the graph-rewriting [`Pass`]es that prepare it (critical edge splitting
//!    when [`AllocatorConfig::split_critical_edges`] is set)
//! 2. [`SsaLivenessAnalysis`]
//! 3. [`RegisterAllocator`] including resolution
//! 4. the validator when [`AllocatorConfig::validate`] is set
//!
//! [`allocate_units`] does the same for many units in parallel. Units share
//! nothing: every unit owns its graph, its liveness and its event log, so no
//! locking is involved.
//!
//! # Example
//!
//! ```rust
//! use linscan::ir::{Graph, InstructionKind, Location, LocationSummary, ValueType};
//! use linscan::pipeline::allocate_registers;
//! use linscan::regalloc::{AllocatorConfig, TargetConfig};
//!
//! let mut graph = Graph::new();
//! let entry = graph.add_block();
//! let exit = graph.add_block();
//! graph.add_edge(entry, exit);
//! let value = graph.append(
//!     entry,
//!     InstructionKind::Op("load"),
//!     ValueType::Int,
//!     &[],
//!     LocationSummary::none().with_output(Location::requires_register()),
//! );
//! graph.append(
//!     entry,
//!     InstructionKind::Return,
//!     ValueType::Void,
//!     &[value],
//!     LocationSummary::none().with_input(Location::Register(0)),
//! );
//! graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
//!
//! let target = TargetConfig::new(4, 4);
//! let allocation = allocate_registers(&mut graph, &target, &AllocatorConfig::new().with_validation(true))?;
//! assert!(graph.instruction(value).locations.out().is_register());
//! assert_eq!(allocation.frame.spill_slots(), 0);
//! # Ok::<(), linscan::Error>(())
//! ```

use std::time::{Duration, Instant};

use log::debug;
use rayon::prelude::*;

use crate::{
    analysis::SsaLivenessAnalysis,
    events::{DerivedStats, EventKind, EventLog},
    ir::Graph,
    regalloc::{AllocatorConfig, FrameLayout, RegisterAllocator, TargetConfig},
    Result,
};

/// A transformation of a compilation unit's graph run before allocation.
///
/// Passes must be thread-safe (Send + Sync): one pass instance is shared by
/// all units of a parallel run. Events go to the unit's own log.
pub trait Pass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this pass run on `graph`?
    ///
    /// Called before [`Pass::run`]. Override to skip graphs the pass has
    /// nothing to do for.
    fn should_run(&self, _graph: &Graph) -> bool {
        true
    }

    /// Runs the pass on one graph.
    ///
    /// Returns `true` if the graph was changed.
    ///
    /// # Arguments
    ///
    /// * `graph` - The graph to transform.
    /// * `events` - The unit's event log.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot process the graph.
    fn run(&self, graph: &mut Graph, events: &EventLog) -> Result<bool>;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}

/// Inserts an empty block on every critical edge.
///
/// The resolver needs a place for the moves of an edge that belongs to
/// neither end alone. Predecessor order of the targets is kept, so phi inputs
/// stay aligned with their edges.
#[derive(Debug, Default, Clone, Copy)]
pub struct CriticalEdgeSplittingPass;

impl Pass for CriticalEdgeSplittingPass {
    fn name(&self) -> &'static str {
        "critical-edge-splitting"
    }

    fn should_run(&self, graph: &Graph) -> bool {
        graph.find_critical_edge().is_some()
    }

    fn run(&self, graph: &mut Graph, events: &EventLog) -> Result<bool> {
        let created = graph.split_critical_edges();
        for &block in &created {
            events
                .record(EventKind::EdgeSplit)
                .block(block)
                .pass(self.name())
                .message(format!("inserted {block} on a critical edge"));
        }
        Ok(!created.is_empty())
    }

    fn description(&self) -> &'static str {
        "Splits edges from multi-successor blocks into multi-predecessor blocks"
    }
}

/// Runs `passes` over `graph` in order, recording start and completion.
///
/// # Returns
///
/// `true` if any pass changed the graph.
///
/// # Errors
///
/// Returns the first error a pass reports; later passes do not run.
pub fn run_passes(passes: &[Box<dyn Pass>], graph: &mut Graph, events: &EventLog) -> Result<bool> {
    let mut changed = false;
    for pass in passes {
        if !pass.should_run(graph) {
            continue;
        }
        events.record(EventKind::PassStarted).pass(pass.name());
        changed |= pass.run(graph, events)?;
        events.record(EventKind::PassCompleted).pass(pass.name());
    }
    Ok(changed)
}

/// Result of allocating one compilation unit.
#[derive(Debug)]
pub struct Allocation {
    /// The liveness of the final graph, with every interval assigned.
    pub liveness: SsaLivenessAnalysis,
    /// The frame code generation has to set up.
    pub frame: FrameLayout,
    /// Everything the pipeline did to this unit.
    pub events: EventLog,
    /// Wall-clock time spent on the unit.
    pub elapsed: Duration,
}

impl Allocation {
    /// Counters derived from the event log.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        DerivedStats::from_log(&self.events).with_time(self.elapsed)
    }
}

/// Allocates registers for one compilation unit.
///
/// On success every instruction's [`crate::ir::LocationSummary`] names final
/// locations, environments carry the locations of their values and parallel
/// moves have been spliced into the blocks.
///
/// # Arguments
///
/// * `graph` - The unit to allocate; rewritten in place.
/// * `target` - The machine description.
/// * `config` - Per-run switches.
///
/// # Errors
///
/// Returns an error if the graph is malformed or irreducible, if an
/// allocation invariant breaks, or if validation was requested and fails.
/// The graph is left partially rewritten in that case and must be dropped.
pub fn allocate_registers(
    graph: &mut Graph,
    target: &TargetConfig,
    config: &AllocatorConfig,
) -> Result<Allocation> {
    let started = Instant::now();
    let events = EventLog::new();

    let mut passes: Vec<Box<dyn Pass>> = Vec::new();
    if config.split_critical_edges {
        passes.push(Box::new(CriticalEdgeSplittingPass));
    }
    run_passes(&passes, graph, &events)?;

    events.record(EventKind::PassStarted).pass("liveness");
    let mut liveness = SsaLivenessAnalysis::analyze(graph, config.debuggable)?;
    events.record(EventKind::PassCompleted).pass("liveness").message(format!(
        "{} values, {} positions",
        liveness.number_of_ssa_values(),
        liveness.max_lifetime_position()
    ));

    events.record(EventKind::PassStarted).pass("linear-scan");
    let frame = {
        let mut allocator = RegisterAllocator::new(graph, &mut liveness, target, &events)?;
        allocator.allocate_registers()?;
        if config.validate {
            allocator.validate()?;
        }
        allocator.frame().cloned().unwrap_or_default()
    };
    events.record(EventKind::PassCompleted).pass("linear-scan").message(frame.to_string());

    let elapsed = started.elapsed();
    debug!("allocated unit in {elapsed:?}: {frame}; {}", events.summary());
    Ok(Allocation {
        liveness,
        frame,
        events,
        elapsed,
    })
}

/// Allocates registers for many compilation units in parallel.
///
/// Each unit runs the complete [`allocate_registers`] pipeline on a rayon
/// worker. A failing unit does not affect the others.
///
/// # Returns
///
/// One result per unit, in the order of `graphs`.
pub fn allocate_units(
    graphs: &mut [Graph],
    target: &TargetConfig,
    config: &AllocatorConfig,
) -> Vec<Result<Allocation>> {
    graphs
        .par_iter_mut()
        .map(|graph| allocate_registers(graph, target, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, InstructionKind, Location, LocationSummary, ValueType};

    /// `entry -> {left, join}`, `left -> join`: the edge `entry -> join` is
    /// critical.
    fn diamond_with_critical_edge() -> (Graph, BlockId) {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let left = graph.add_block();
        let join = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, left);
        graph.add_edge(entry, join);
        graph.add_edge(left, join);
        graph.add_edge(join, exit);

        let condition = graph.append(
            entry,
            InstructionKind::Parameter {
                index: 0,
                stack_slot: 0,
            },
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::Register(0)),
        );
        graph.append(
            entry,
            InstructionKind::If,
            ValueType::Void,
            &[condition],
            LocationSummary::none().with_input(Location::requires_register()),
        );
        graph.append(left, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());
        graph.append(
            join,
            InstructionKind::Return,
            ValueType::Void,
            &[condition],
            LocationSummary::none().with_input(Location::Register(0)),
        );
        graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());
        (graph, join)
    }

    #[test]
    fn test_critical_edge_pass_records_events() -> Result<()> {
        let (mut graph, join) = diamond_with_critical_edge();
        let events = EventLog::new();
        let passes: Vec<Box<dyn Pass>> = vec![Box::new(CriticalEdgeSplittingPass)];

        assert!(run_passes(&passes, &mut graph, &events)?);
        assert_eq!(events.count_kind(EventKind::EdgeSplit), 1);
        assert_eq!(events.count_kind(EventKind::PassCompleted), 1);
        assert!(graph.find_critical_edge().is_none());
        assert_eq!(graph.block(join).predecessors().len(), 2);

        // Nothing left to split.
        assert!(!run_passes(&passes, &mut graph, &events)?);
        Ok(())
    }

    #[test]
    fn test_allocate_registers_splits_and_validates() -> Result<()> {
        let (mut graph, _) = diamond_with_critical_edge();
        let config = AllocatorConfig::new().with_validation(true);
        let allocation = allocate_registers(&mut graph, &TargetConfig::new(4, 4), &config)?;

        let stats = allocation.stats();
        assert_eq!(stats.edges_split, 1);
        assert!(stats.intervals > 0);
        assert!(allocation.events.has(EventKind::PassCompleted));
        Ok(())
    }

    #[test]
    fn test_allocate_registers_rejects_critical_edge_without_pass() {
        let (mut graph, _) = diamond_with_critical_edge();
        let config = AllocatorConfig {
            split_critical_edges: false,
            ..AllocatorConfig::new()
        };
        let result = allocate_registers(&mut graph, &TargetConfig::new(4, 4), &config);
        assert!(matches!(result, Err(crate::Error::CriticalEdge { .. })));
    }

    #[test]
    fn test_allocate_units_keeps_order() {
        let mut graphs: Vec<Graph> = (0..4).map(|_| diamond_with_critical_edge().0).collect();
        graphs.push(Graph::new());
        let results = allocate_units(&mut graphs, &TargetConfig::new(4, 4), &AllocatorConfig::new());

        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(Result::is_ok));
        assert!(results[4].is_err());
    }
}
