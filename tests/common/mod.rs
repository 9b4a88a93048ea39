//! A tiny machine model shared by the integration tests.
//!
//! Every register and stack slot is a cell holding one half of a value. A
//! value is identified by a token; wide values occupy two cells tagged with
//! the half they hold, so a pair reassembled the wrong way round reads as
//! garbage.

#![allow(dead_code)]

use std::collections::HashMap;

use linscan::{ir::Location, regalloc::MoveOp};

/// One indivisible piece of machine storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    Core(usize),
    Fpu(usize),
    Slot(usize),
}

/// The cells making up `location`, low half first.
pub fn cells(location: Location) -> Vec<Cell> {
    match location {
        Location::Register(reg) => vec![Cell::Core(reg)],
        Location::FpuRegister(reg) => vec![Cell::Fpu(reg)],
        Location::RegisterPair { low, high } => vec![Cell::Core(low), Cell::Core(high)],
        Location::FpuRegisterPair { low, high } => vec![Cell::Fpu(low), Cell::Fpu(high)],
        Location::StackSlot(slot) => vec![Cell::Slot(slot)],
        Location::DoubleStackSlot(slot) => vec![Cell::Slot(slot), Cell::Slot(slot + 1)],
        _ => Vec::new(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct Machine {
    cells: HashMap<Cell, (usize, usize)>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores value `token` in `location`.
    pub fn write(&mut self, location: Location, token: usize) {
        for (half, cell) in cells(location).into_iter().enumerate() {
            self.cells.insert(cell, (token, half));
        }
    }

    /// Forgets whatever `location` holds.
    pub fn clobber(&mut self, location: Location) {
        for cell in cells(location) {
            self.cells.remove(&cell);
        }
    }

    /// The value held by `location`, if all of its cells agree.
    pub fn read(&self, location: Location) -> Option<usize> {
        let cells = cells(location);
        let (token, _) = *self.cells.get(cells.first()?)?;
        cells
            .iter()
            .enumerate()
            .all(|(half, cell)| self.cells.get(cell) == Some(&(token, half)))
            .then_some(token)
    }

    fn set(&mut self, cell: Cell, content: Option<(usize, usize)>) {
        match content {
            Some(content) => self.cells.insert(cell, content),
            None => self.cells.remove(&cell),
        };
    }

    /// Executes one step of a sequentialized parallel move. Registers and
    /// slots are copied or exchanged cell by cell, like the hardware does.
    pub fn apply(&mut self, op: &MoveOp) {
        match *op {
            MoveOp::Move {
                source: Location::Constant(id),
                destination,
                ..
            } => self.write(destination, id.index()),
            MoveOp::Move {
                source,
                destination,
                ..
            } => {
                let contents: Vec<_> = cells(source)
                    .into_iter()
                    .map(|cell| self.cells.get(&cell).copied())
                    .collect();
                for (cell, content) in cells(destination).into_iter().zip(contents) {
                    self.set(cell, content);
                }
            }
            MoveOp::Swap { first, second, .. } => {
                for (a, b) in cells(first).into_iter().zip(cells(second)) {
                    let held_a = self.cells.get(&a).copied();
                    let held_b = self.cells.get(&b).copied();
                    self.set(a, held_b);
                    self.set(b, held_a);
                }
            }
        }
    }
}
