#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use linscan::ir::{Location, ParallelMove, ValueType};
use linscan::regalloc::{resolve_parallel_move, MoveOp};

/// Single locations 0..16 and wide locations 16..24; no two overlap.
fn location(index: u8) -> (Location, ValueType) {
    let index = usize::from(index % 24);
    match index {
        0..=7 => (Location::Register(index), ValueType::Int),
        8..=15 => (Location::StackSlot(index - 8), ValueType::Int),
        16..=19 => {
            let low = 8 + 2 * (index - 16);
            (Location::RegisterPair { low, high: low + 1 }, ValueType::Long)
        }
        _ => (Location::DoubleStackSlot(8 + 2 * (index - 20)), ValueType::Double),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut parallel_move = ParallelMove::new(0);
    for chunk in data.chunks_exact(2) {
        let (source, ty) = location(chunk[0]);
        let (destination, destination_ty) = location(chunk[1]);
        if ty.is_wide() != destination_ty.is_wide() {
            continue;
        }
        // Overlapping destinations are rejected; that is fine here.
        let _ = parallel_move.add_move(source, destination, ty, None);
    }

    let ops = resolve_parallel_move(&parallel_move).expect("well-formed moves must resolve");

    let mut machine: HashMap<Location, Location> = HashMap::new();
    let read = |machine: &HashMap<Location, Location>, at: Location| {
        machine.get(&at).copied().unwrap_or(at)
    };
    for op in &ops {
        match *op {
            MoveOp::Move { source, destination, .. } => {
                let value = read(&machine, source);
                machine.insert(destination, value);
            }
            MoveOp::Swap { first, second, .. } => {
                let a = read(&machine, first);
                let b = read(&machine, second);
                machine.insert(first, b);
                machine.insert(second, a);
            }
        }
    }

    for operands in parallel_move.moves() {
        assert_eq!(
            read(&machine, operands.destination),
            operands.source,
            "{parallel_move} resolved to {ops:?}"
        );
    }
});
