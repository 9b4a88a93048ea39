//! A fixed-capacity bit vector for dataflow sets.
//!
//! Liveness keeps three of these per block (live-in, live-out, kill) indexed by
//! SSA index, loop detection uses one per loop for its body, and the validator
//! uses one per register or spill slot indexed by lifetime position.
//!
//! # Example
//!
//! ```rust
//! use linscan::utils::BitSet;
//!
//! let mut live_in = BitSet::new(8);
//! let mut live_out = BitSet::new(8);
//! let mut kill = BitSet::new(8);
//!
//! live_out.insert(1);
//! live_out.insert(3);
//! kill.insert(3);
//!
//! assert!(live_in.union_if_not_in(&live_out, &kill));
//! assert_eq!(live_in.iter().collect::<Vec<_>>(), vec![1]);
//! ```

use std::fmt;

const WORD_BITS: usize = 64;

/// A bit vector with a fixed number of addressable bits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of addressable bits.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            len: capacity,
        }
    }

    /// Returns the number of addressable bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }

    /// Clears the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
    }

    /// Returns `true` if the bit at `index` is set. Out of range indices are
    /// reported as unset.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS))) != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Sets every bit in `from..to`.
    ///
    /// # Panics
    ///
    /// Panics if `to > self.len()`.
    pub fn insert_range(&mut self, from: usize, to: usize) {
        assert!(to <= self.len, "range out of bounds");
        for index in from..to {
            self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        }
    }

    /// Computes the union with another bit set in place.
    ///
    /// Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Adds every bit of `other` that is not set in `exclude`.
    ///
    /// This is the live-in transfer function: `self |= other & !exclude`.
    /// Returns `true` if `self` changed.
    pub fn union_if_not_in(&mut self, other: &Self, exclude: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        assert_eq!(self.len, exclude.len, "bit sets must have same length");
        let mut changed = false;
        for ((a, b), k) in self.words.iter_mut().zip(&other.words).zip(&exclude.words) {
            let old = *a;
            *a |= *b & !*k;
            changed |= old != *a;
        }
        changed
    }

    /// Removes every bit set in `other`.
    ///
    /// Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns an iterator over the indices of set bits, ascending.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * WORD_BITS + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());

        bs.insert(0);
        bs.insert(63);
        bs.insert(64);
        bs.insert(99);

        assert_eq!(bs.count(), 4);
        assert!(bs.contains(63));
        assert!(bs.contains(64));
        assert!(!bs.contains(1));
        assert!(!bs.contains(1000));

        bs.remove(63);
        assert!(!bs.contains(63));
    }

    #[test]
    fn test_bitset_iter_crosses_words() {
        let mut bs = BitSet::new(200);
        for i in [3, 64, 127, 128, 199] {
            bs.insert(i);
        }
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![3, 64, 127, 128, 199]);
        assert_eq!(BitSet::new(0).iter().count(), 0);
    }

    #[test]
    fn test_bitset_union_reports_change() {
        let mut a = BitSet::new(10);
        let mut b = BitSet::new(10);
        a.insert(1);
        b.insert(1);
        assert!(!a.union_with(&b));
        b.insert(2);
        assert!(a.union_with(&b));
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn test_bitset_union_if_not_in() {
        let mut live_in = BitSet::new(10);
        let mut live_out = BitSet::new(10);
        let mut kill = BitSet::new(10);
        live_out.insert(4);
        live_out.insert(5);
        kill.insert(5);

        assert!(live_in.union_if_not_in(&live_out, &kill));
        assert!(live_in.contains(4));
        assert!(!live_in.contains(5));
        assert!(!live_in.union_if_not_in(&live_out, &kill));
    }

    #[test]
    fn test_bitset_difference_and_range() {
        let mut a = BitSet::new(70);
        a.insert_range(60, 68);
        assert_eq!(a.count(), 8);

        let mut b = BitSet::new(70);
        b.insert(61);
        assert!(a.difference_with(&b));
        assert!(!a.contains(61));
        assert_eq!(a.count(), 7);

        a.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn test_bitset_debug() {
        let mut bs = BitSet::new(8);
        bs.insert(2);
        bs.insert(5);
        assert_eq!(format!("{bs:?}"), "{2, 5}");
    }
}
