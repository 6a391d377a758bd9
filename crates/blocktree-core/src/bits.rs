//! Bit-occupancy utilities
//!
//! Small bitmap helpers used for slot bookkeeping in the node cache.

use bitvec::prelude::*;
use std::ops::Range;

/// Number of set bits
pub fn pop_count(bits: &BitSlice) -> usize {
    bits.count_ones()
}

/// Index of the lowest clear bit
pub fn first_zero(bits: &BitSlice) -> Option<usize> {
    bits.first_zero()
}

/// Index of the lowest set bit
pub fn first_one(bits: &BitSlice) -> Option<usize> {
    bits.first_one()
}

/// Set every bit in `range`.
///
/// Panics if `range` is out of bounds, like slice indexing.
pub fn set_range(bits: &mut BitSlice, range: Range<usize>) {
    bits[range].fill(true);
}

/// Clear every bit in `range`.
///
/// Panics if `range` is out of bounds, like slice indexing.
pub fn clear_range(bits: &mut BitSlice, range: Range<usize>) {
    bits[range].fill(false);
}

/// Fixed-capacity occupancy bitmap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occupancy {
    bits: BitVec,
}

impl Occupancy {
    /// Create an empty bitmap with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, capacity),
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// Number of occupied slots
    pub fn count(&self) -> usize {
        pop_count(&self.bits)
    }

    /// Check if every slot is occupied
    pub fn is_full(&self) -> bool {
        first_zero(&self.bits).is_none()
    }

    /// Check if a slot is occupied
    pub fn is_set(&self, slot: usize) -> bool {
        self.bits.get(slot).is_some_and(|bit| *bit)
    }

    /// Occupy the lowest free slot and return it
    pub fn claim_first_free(&mut self) -> Option<usize> {
        let slot = first_zero(&self.bits)?;
        self.bits.set(slot, true);
        Some(slot)
    }

    /// Free a slot
    pub fn release(&mut self, slot: usize) {
        if slot < self.bits.len() {
            self.bits.set(slot, false);
        }
    }

    /// Free every slot
    pub fn release_all(&mut self) {
        let len = self.bits.len();
        clear_range(&mut self.bits, 0..len);
    }

    /// Iterate over occupied slots in ascending order
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}
