//! Decoded block cache
//!
//! A fixed-slot cache keyed by [`BlockId`] with CLOCK (second-chance)
//! eviction. Slot allocation is tracked by an [`Occupancy`] bitmap and recent
//! use by a reference bitmap, so lookups never touch the block store.

use crate::bits::{clear_range, Occupancy};
use bitvec::prelude::*;
use blocktree_store::BlockId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// Hit/miss counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Fixed-capacity CLOCK cache of decoded blocks
pub struct NodeCache<T> {
    inner: Mutex<CacheInner<T>>,
}

struct CacheInner<T> {
    slots: Vec<Option<(BlockId, T)>>,
    index: HashMap<BlockId, usize>,
    occupancy: Occupancy,
    referenced: BitVec,
    hand: usize,
    stats: CacheStats,
}

impl<T: Clone> NodeCache<T> {
    /// Create a cache holding at most `capacity` blocks (minimum one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                slots: (0..capacity).map(|_| None).collect(),
                index: HashMap::with_capacity(capacity),
                occupancy: Occupancy::new(capacity),
                referenced: BitVec::repeat(false, capacity),
                hand: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a block, marking it recently used
    pub fn get(&self, id: &BlockId) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.index.get(id).copied() {
            Some(slot) => {
                inner.referenced.set(slot, true);
                inner.stats.hits += 1;
                inner.slots[slot].as_ref().map(|(_, value)| value.clone())
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a block
    pub fn put(&self, id: BlockId, value: T) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.index.get(&id).copied() {
            inner.slots[slot] = Some((id, value));
            inner.referenced.set(slot, true);
            return;
        }

        let claimed = inner.occupancy.claim_first_free();
        let slot = match claimed {
            Some(slot) => slot,
            None => inner.evict(),
        };
        inner.index.insert(id.clone(), slot);
        inner.slots[slot] = Some((id, value));
        inner.referenced.set(slot, true);
    }

    /// Drop a block from the cache
    pub fn remove(&self, id: &BlockId) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.index.remove(id) {
            inner.slots[slot] = None;
            inner.occupancy.release(slot);
            inner.referenced.set(slot, false);
        }
    }

    /// Drop every block
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let capacity = inner.slots.len();
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.index.clear();
        inner.occupancy.release_all();
        clear_range(&mut inner.referenced, 0..capacity);
        inner.hand = 0;
    }

    /// Number of cached blocks
    pub fn len(&self) -> usize {
        self.inner.lock().occupancy.count()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached blocks
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Hit/miss counters since creation
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl<T> CacheInner<T> {
    /// Pick a victim slot, clearing reference bits as the hand passes.
    /// Only called when every slot is occupied.
    fn evict(&mut self) -> usize {
        let capacity = self.slots.len();
        loop {
            let hand = self.hand;
            self.hand = (hand + 1) % capacity;
            if self.referenced[hand] {
                self.referenced.set(hand, false);
                continue;
            }
            if let Some((id, _)) = self.slots[hand].take() {
                trace!(block = %id, slot = hand, "evicting cached block");
                self.index.remove(&id);
            }
            self.stats.evictions += 1;
            return hand;
        }
    }
}
