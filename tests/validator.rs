//! The conflict checker on hand-assigned intervals.

use linscan::{
    analysis::{IntervalId, SsaLivenessAnalysis},
    ir::{Graph, InstrId, InstructionKind, Location, LocationSummary, RegisterClass, ValueType},
    regalloc::{validate_intervals, TargetConfig},
    Error, Result,
};

fn interval(liveness: &SsaLivenessAnalysis, value: InstrId) -> Result<IntervalId> {
    liveness
        .interval(value)
        .ok_or_else(|| Error::InvalidGraph(format!("{value} has no interval")))
}

fn conflicts(result: Result<()>) -> Vec<String> {
    match result {
        Err(Error::ValidationFailed { conflicts, .. }) => conflicts,
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

/// `a = load; b = neg a; use b`, with `b` optionally allowed to take the
/// register `a` dies in.
fn negate(reuse_input: bool) -> Result<(Graph, SsaLivenessAnalysis, IntervalId, IntervalId)> {
    let mut graph = Graph::new();
    let entry = graph.add_block();
    let exit = graph.add_block();
    graph.add_edge(entry, exit);

    let a = graph.append(
        entry,
        InstructionKind::Op("load"),
        ValueType::Int,
        &[],
        LocationSummary::none().with_output(Location::requires_register()),
    );
    let mut summary = LocationSummary::none()
        .with_input(Location::requires_register())
        .with_output(Location::requires_register());
    if reuse_input {
        summary = summary.no_output_overlap();
    }
    let b = graph.append(entry, InstructionKind::Op("neg"), ValueType::Int, &[a], summary);
    graph.append(
        entry,
        InstructionKind::Op("use"),
        ValueType::Void,
        &[b],
        LocationSummary::none().with_input(Location::requires_register()),
    );
    graph.append(entry, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());
    graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    let ia = interval(&liveness, a)?;
    let ib = interval(&liveness, b)?;
    Ok((graph, liveness, ia, ib))
}

#[test]
fn test_output_may_reuse_dying_input_register() -> Result<()> {
    let (graph, mut liveness, a, b) = negate(true)?;
    liveness.intervals_mut()[a].set_register(0);
    liveness.intervals_mut()[b].set_register(0);
    validate_intervals(&graph, &liveness, &[a, b], 0, &TargetConfig::new(2, 2), RegisterClass::Core)
}

#[test]
fn test_overlapping_output_may_not_reuse_input_register() -> Result<()> {
    let (graph, mut liveness, a, b) = negate(false)?;
    liveness.intervals_mut()[a].set_register(0);
    liveness.intervals_mut()[b].set_register(0);
    let found = conflicts(validate_intervals(
        &graph,
        &liveness,
        &[a, b],
        0,
        &TargetConfig::new(2, 2),
        RegisterClass::Core,
    ));
    assert_eq!(found.len(), 1);
    assert!(found[0].contains("register 0"));
    Ok(())
}

#[test]
fn test_register_outside_class_is_reported() -> Result<()> {
    let (graph, mut liveness, a, b) = negate(false)?;
    liveness.intervals_mut()[a].set_register(0);
    liveness.intervals_mut()[b].set_register(7);
    let found = conflicts(validate_intervals(
        &graph,
        &liveness,
        &[a, b],
        0,
        &TargetConfig::new(2, 2),
        RegisterClass::Core,
    ));
    assert!(found.iter().any(|c| c.contains("does not exist")));
    Ok(())
}

/// `wide = load long; narrow = load int; use wide, narrow`
fn wide_and_narrow() -> Result<(Graph, SsaLivenessAnalysis, IntervalId, IntervalId)> {
    let mut graph = Graph::new();
    let entry = graph.add_block();
    let exit = graph.add_block();
    graph.add_edge(entry, exit);

    let load = |graph: &mut Graph, ty| {
        graph.append(
            entry,
            InstructionKind::Op("load"),
            ty,
            &[],
            LocationSummary::none().with_output(Location::requires_register()),
        )
    };
    let wide = load(&mut graph, ValueType::Long);
    let narrow = load(&mut graph, ValueType::Int);
    graph.append(
        entry,
        InstructionKind::Op("use"),
        ValueType::Void,
        &[wide, narrow],
        LocationSummary::none()
            .with_input(Location::any())
            .with_input(Location::any()),
    );
    graph.append(entry, InstructionKind::ReturnVoid, ValueType::Void, &[], LocationSummary::none());
    graph.append(exit, InstructionKind::Exit, ValueType::Void, &[], LocationSummary::none());

    let liveness = SsaLivenessAnalysis::analyze(&graph, false)?;
    let iw = interval(&liveness, wide)?;
    let inarrow = interval(&liveness, narrow)?;
    Ok((graph, liveness, iw, inarrow))
}

#[test]
fn test_double_slot_covers_two_slots() -> Result<()> {
    let (graph, mut liveness, wide, narrow) = wide_and_narrow()?;
    let target = TargetConfig::new(2, 2);

    liveness.intervals_mut()[wide].set_spill_slot(0);
    liveness.intervals_mut()[narrow].set_spill_slot(1);
    let found = conflicts(validate_intervals(
        &graph,
        &liveness,
        &[wide, narrow],
        3,
        &target,
        RegisterClass::Core,
    ));
    assert!(found.iter().all(|c| c.contains("spill slot 1")));

    liveness.intervals_mut()[narrow].set_spill_slot(2);
    validate_intervals(&graph, &liveness, &[wide, narrow], 3, &target, RegisterClass::Core)
}

#[test]
fn test_spill_slot_outside_frame_is_reported() -> Result<()> {
    let (graph, mut liveness, wide, narrow) = wide_and_narrow()?;
    let target = TargetConfig::new(2, 2).with_reserved_out_slots(1);

    // Slot 0 is the outgoing area, slot 3 is past the single spill slot.
    liveness.intervals_mut()[wide].set_spill_slot(0);
    liveness.intervals_mut()[narrow].set_spill_slot(3);
    let found = conflicts(validate_intervals(
        &graph,
        &liveness,
        &[wide, narrow],
        1,
        &target,
        RegisterClass::Core,
    ));
    assert!(found.iter().any(|c| c.contains("outside the frame")));
    Ok(())
}
