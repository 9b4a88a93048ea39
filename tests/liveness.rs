//! Live ranges computed for small control-flow shapes, checked at exact
//! lifetime positions.

use linscan::{
    analysis::{IntervalId, SsaLivenessAnalysis},
    ir::{BlockId, Graph, InstrId, InstructionKind, Location, LocationSummary, ValueType},
    Error, Result,
};

fn constant(graph: &mut Graph, block: BlockId, value: i64) -> InstrId {
    graph.append(
        block,
        InstructionKind::Constant(value),
        ValueType::Int,
        &[],
        LocationSummary::none().with_output(Location::any()),
    )
}

fn use_value(graph: &mut Graph, block: BlockId, value: InstrId) -> InstrId {
    graph.append(
        block,
        InstructionKind::Op("use"),
        ValueType::Void,
        &[value],
        LocationSummary::none().with_input(Location::requires_register()),
    )
}

fn goto(graph: &mut Graph, block: BlockId) {
    graph.append(block, InstructionKind::Goto, ValueType::Void, &[], LocationSummary::none());
}

fn interval(liveness: &SsaLivenessAnalysis, value: InstrId) -> Result<IntervalId> {
    liveness
        .interval(value)
        .ok_or_else(|| Error::InvalidGraph(format!("{value} has no interval")))
}

fn ranges(liveness: &SsaLivenessAnalysis, value: InstrId) -> Result<Vec<(usize, usize)>> {
    let id = interval(liveness, value)?;
    Ok(liveness.intervals()[id]
        .ranges()
        .map(|range| (range.start, range.end))
        .collect())
}

/// ```text
/// B0: c0 = 0, c4 = 4, [extra = load], goto B1
/// B1: phi = Phi(c0, c4); if phi -> B2, B3
/// B2: [use extra]; goto B1
/// B3: return
/// B4: exit
/// ```
struct LoopGraph {
    graph: Graph,
    c0: InstrId,
    c4: InstrId,
    phi: InstrId,
    extra: Option<InstrId>,
}

fn loop_graph(with_body_use: bool) -> LoopGraph {
    let mut graph = Graph::new();
    let b0 = graph.add_block();
    let b1 = graph.add_block();
    let b2 = graph.add_block();
    let b3 = graph.add_block();
    let b4 = graph.add_block();
    graph.add_edge(b0, b1);
    graph.add_edge(b1, b2);
    graph.add_edge(b1, b3);
    graph.add_edge(b2, b1);
    graph.add_edge(b3, b4);

    let c0 = constant(&mut graph, b0, 0);
    let c4 = constant(&mut graph, b0, 4);
    let extra = with_body_use.then(|| {
        graph.append(
            b0,
            InstructionKind::Op("load"),
            ValueType::Int,
            &[],
            LocationSummary::none().with_output(Location::requires_register()),
        )
    });
    goto(&mut graph, b0);

    let phi = graph.add_phi(b1, ValueType::Int, &[c0, c4]);
    graph.append(
        b1,
        InstructionKind::If,
        ValueType::Void,
        &[phi],
        LocationSummary::none().with_input(Location::requires_register()),
    );

    if let Some(extra) = extra {
        use_value(&mut graph, b2, extra);
    }
    goto(&mut graph, b2);

    graph.append(b3, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());
    graph.append(b4, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

    LoopGraph {
        graph,
        c0,
        c4,
        phi,
        extra,
    }
}

#[test]
fn test_loop_constant_and_phi_ranges() -> Result<()> {
    let LoopGraph {
        graph, c0, c4, phi, ..
    } = loop_graph(false);
    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;

    // B0 [0, 8), B1 [8, 12), B2 [12, 16), B3 [16, 20), B4 [20, 24)
    assert_eq!(liveness.block_span(BlockId::new(1)), (8, 12));
    assert_eq!(liveness.block_span(BlockId::new(2)), (12, 16));

    // Flows into the phi on entry: dead at the loop header.
    assert_eq!(ranges(&liveness, c0)?, vec![(2, 8)]);
    // Flows into the phi along the back edge: live around the whole loop.
    assert_eq!(ranges(&liveness, c4)?, vec![(4, 16)]);
    // Read by the `if`, then dead until redefined by the back edge.
    assert_eq!(ranges(&liveness, phi)?, vec![(8, 11)]);
    assert_eq!(liveness.position(phi), Some(8));
    Ok(())
}

/// ```text
/// B0: c0 = 0, c4 = 4; goto B1
/// B1: phi = Phi(c0, add); if phi -> B2, B3
/// B2: add = phi + c4; goto B1
/// B3: return phi
/// B4: exit
/// ```
#[test]
fn test_phi_live_after_loop_has_hole() -> Result<()> {
    let mut graph = Graph::new();
    let b0 = graph.add_block();
    let b1 = graph.add_block();
    let b2 = graph.add_block();
    let b3 = graph.add_block();
    let b4 = graph.add_block();
    graph.add_edge(b0, b1);
    graph.add_edge(b1, b2);
    graph.add_edge(b1, b3);
    graph.add_edge(b2, b1);
    graph.add_edge(b3, b4);

    let c0 = constant(&mut graph, b0, 0);
    let c4 = constant(&mut graph, b0, 4);
    goto(&mut graph, b0);

    let phi = graph.add_phi(b1, ValueType::Int, &[c0, c0]);
    graph.append(
        b1,
        InstructionKind::If,
        ValueType::Void,
        &[phi],
        LocationSummary::none().with_input(Location::requires_register()),
    );

    let add = graph.append(
        b2,
        InstructionKind::Op("add"),
        ValueType::Int,
        &[phi, c4],
        LocationSummary::none()
            .with_input(Location::requires_register())
            .with_input(Location::requires_register())
            .with_output(Location::requires_register()),
    );
    goto(&mut graph, b2);
    graph.instruction_mut(phi).inputs[1] = add;

    graph.append(
        b3,
        InstructionKind::Return,
        ValueType::Void,
        &[phi],
        LocationSummary::none().with_input(Location::requires_register()),
    );
    graph.append(b4, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    // B0 [0, 8), B1 [8, 12), B2 [12, 18), B3 [18, 22), B4 [22, 24)
    assert_eq!(liveness.linear_order(), &[b0, b1, b2, b3, b4]);
    assert_eq!(liveness.block_span(b2), (12, 18));
    assert_eq!(liveness.block_span(b3), (18, 22));

    assert_eq!(ranges(&liveness, c0)?, vec![(2, 8)]);
    assert_eq!(ranges(&liveness, c4)?, vec![(4, 18)]);
    assert_eq!(ranges(&liveness, add)?, vec![(14, 18)]);

    // Dead from the add to the back edge, live again in the exit block.
    assert_eq!(ranges(&liveness, phi)?, vec![(8, 15), (18, 21)]);
    let id = interval(&liveness, phi)?;
    assert!(!liveness.intervals()[id].covers(16));
    assert!(liveness.intervals()[id].covers(19));
    Ok(())
}

#[test]
fn test_value_used_in_loop_lives_to_back_edge() -> Result<()> {
    let LoopGraph { graph, extra, .. } = loop_graph(true);
    let extra = extra.ok_or_else(|| Error::InvalidGraph("no body use".into()))?;
    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;

    // One more instruction in B0 and B2: B1 [10, 14), B2 [14, 20).
    let loop_end = liveness.block_end(BlockId::new(2));
    assert_eq!(loop_end, 20);

    // Last textual use at 17, yet live until the back edge.
    let id = interval(&liveness, extra)?;
    let current = &liveness.intervals()[id];
    assert_eq!(ranges(&liveness, extra)?, vec![(6, loop_end)]);
    assert!(current.covers(17));
    assert!(current.covers(19));
    assert!(current.is_dead_at(loop_end));

    let uses: Vec<usize> = current.uses().map(|u| u.position).collect();
    assert_eq!(uses, vec![17, loop_end]);
    assert!(current.uses().last().is_some_and(|u| u.is_synthesized()));
    Ok(())
}

/// ```text
/// B0: v = load, w = load; if v -> B1, B2
/// B1: use v; goto B3
/// B2: goto B3
/// B3: return w
/// B4: exit
/// ```
#[test]
fn test_if_else_holes() -> Result<()> {
    let mut graph = Graph::new();
    let b0 = graph.add_block();
    let b1 = graph.add_block();
    let b2 = graph.add_block();
    let b3 = graph.add_block();
    let b4 = graph.add_block();
    graph.add_edge(b0, b1);
    graph.add_edge(b0, b2);
    graph.add_edge(b1, b3);
    graph.add_edge(b2, b3);
    graph.add_edge(b3, b4);

    let load = || LocationSummary::none().with_output(Location::requires_register());
    let v = graph.append(b0, InstructionKind::Op("load"), ValueType::Int, &[], load());
    let w = graph.append(b0, InstructionKind::Op("load"), ValueType::Int, &[], load());
    graph.append(
        b0,
        InstructionKind::If,
        ValueType::Void,
        &[v],
        LocationSummary::none().with_input(Location::requires_register()),
    );
    use_value(&mut graph, b1, v);
    goto(&mut graph, b1);
    goto(&mut graph, b2);
    graph.append(
        b3,
        InstructionKind::Return,
        ValueType::Void,
        &[w],
        LocationSummary::none().with_input(Location::requires_register()),
    );
    graph.append(b4, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    // The second successor is placed first.
    assert_eq!(liveness.linear_order(), &[b0, b2, b1, b3, b4]);
    assert_eq!(liveness.block_span(b2), (8, 12));

    // One hole, exactly over the branch that does not read `v`.
    assert_eq!(ranges(&liveness, v)?, vec![(2, 8), (12, 15)]);
    let id = interval(&liveness, v)?;
    assert!(!liveness.intervals()[id].covers(10));

    // Alive on both paths up to the join: no hole.
    assert_eq!(ranges(&liveness, w)?, vec![(4, 21)]);
    Ok(())
}

#[test]
fn test_live_in_and_live_out_sets() -> Result<()> {
    let LoopGraph { graph, c4, phi, .. } = loop_graph(false);
    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    let c4_index = liveness.ssa_index(c4).ok_or_else(|| Error::InvalidGraph("no index".into()))?;
    let phi_index = liveness.ssa_index(phi).ok_or_else(|| Error::InvalidGraph("no index".into()))?;

    let header = liveness
        .block(BlockId::new(1))
        .ok_or_else(|| Error::InvalidGraph("header unreachable".into()))?;
    assert!(header.live_in.contains(c4_index));
    assert!(header.kill.contains(phi_index));
    assert!(!header.live_in.contains(phi_index));

    let entry = liveness
        .block(BlockId::new(0))
        .ok_or_else(|| Error::InvalidGraph("entry unreachable".into()))?;
    assert_eq!(entry.live_in.iter().count(), 0);
    assert!(entry.live_out.contains(c4_index));
    Ok(())
}

#[test]
fn test_split_reconstructs_ranges() -> Result<()> {
    let LoopGraph { graph, c4, .. } = loop_graph(false);
    let mut liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    let parent = interval(&liveness, c4)?;
    let before = ranges(&liveness, c4)?;

    let arena = liveness.intervals_mut();
    let sibling = arena
        .split_at(parent, 10)?
        .ok_or_else(|| Error::InvalidGraph("split produced nothing".into()))?;

    let first: Vec<(usize, usize)> = arena[parent].ranges().map(|r| (r.start, r.end)).collect();
    let second: Vec<(usize, usize)> = arena[sibling].ranges().map(|r| (r.start, r.end)).collect();
    assert_eq!(first, vec![(4, 10)]);
    assert_eq!(second, vec![(10, 16)]);
    assert_eq!((first[0].0, second[0].1), (before[0].0, before[0].1));

    assert_eq!(arena[parent].next_sibling(), Some(sibling));
    assert_eq!(arena[sibling].parent(), parent);
    assert!(arena[sibling].is_split());
    assert_eq!(arena.siblings(parent).collect::<Vec<_>>(), vec![parent, sibling]);
    assert_eq!(arena.sibling_at(parent, 12), Some(sibling));

    // Splitting at the end leaves nothing behind; splitting at the start is a bug.
    assert_eq!(arena.split_at(sibling, 16)?, None);
    assert!(matches!(
        arena.split_at(sibling, 10),
        Err(Error::InvariantViolation { .. })
    ));
    Ok(())
}

#[test]
fn test_ranges_are_ascending_and_non_empty() -> Result<()> {
    let LoopGraph { graph, .. } = loop_graph(true);
    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    for current in liveness.intervals().iter() {
        let spans: Vec<(usize, usize)> = current.ranges().map(|r| (r.start, r.end)).collect();
        for &(start, end) in &spans {
            assert!(start < end, "{current}");
        }
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].0, "{current}");
        }
    }
    Ok(())
}

#[test]
fn test_critical_edge_is_rejected() {
    let mut graph = Graph::new();
    let b0 = graph.add_block();
    let b1 = graph.add_block();
    let b2 = graph.add_block();
    graph.add_edge(b0, b1);
    graph.add_edge(b0, b2);
    graph.add_edge(b1, b2);
    let v = constant(&mut graph, b0, 1);
    graph.append(
        b0,
        InstructionKind::If,
        ValueType::Void,
        &[v],
        LocationSummary::none().with_input(Location::requires_register()),
    );
    goto(&mut graph, b1);
    graph.append(b2, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());

    let result = SsaLivenessAnalysis::analyze(&graph, false);
    assert!(matches!(result, Err(Error::CriticalEdge { from, to }) if from == b0 && to == b2));
}
