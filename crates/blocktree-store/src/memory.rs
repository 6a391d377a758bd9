//! In-memory block store for testing and caching

use crate::{BlockId, BlockOperation, BlockStore, BlockStoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// An in-memory block store
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<DashMap<BlockId, Value>>,
    applied: Arc<AtomicU64>,
}

impl MemoryBlockStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(DashMap::new()),
            applied: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Clear all blocks
    pub fn clear(&self) {
        self.blocks.clear();
    }

    /// List all block ids
    pub fn list_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of operations applied since creation
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn try_get_value(&self, id: &BlockId) -> Result<Option<Value>> {
        Ok(self.blocks.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert_value(&self, id: BlockId, block: Value) -> Result<()> {
        match self.blocks.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(BlockStoreError::AlreadyExists(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(block);
                Ok(())
            }
        }
    }

    async fn delete(&self, id: &BlockId) -> Result<()> {
        if self.blocks.remove(id).is_some() {
            trace!(block = %id, "deleted block");
        }
        Ok(())
    }

    async fn apply(&self, id: &BlockId, operation: &BlockOperation) -> Result<()> {
        let mut entry = self
            .blocks
            .get_mut(id)
            .ok_or_else(|| BlockStoreError::NotFound(id.clone()))?;
        operation.apply_to(entry.value_mut())?;
        self.applied.fetch_add(1, Ordering::Relaxed);
        trace!(block = %id, field = operation.field(), "applied operation");
        Ok(())
    }
}

/// LRU-cached wrapper around any block store.
///
/// Blocks change under `apply`, so a value read from the inner store is only
/// cached if no `apply` or `delete` completed while it was being read.
pub struct CachedBlockStore<S: BlockStore> {
    inner: S,
    cache: Arc<parking_lot::Mutex<CacheState>>,
}

struct CacheState {
    blocks: lru::LruCache<BlockId, Value>,
    /// Bumped after every completed `apply` or `delete`
    epoch: u64,
}

impl CacheState {
    fn put_if_current(&mut self, epoch: u64, id: BlockId, value: Value) {
        if self.epoch == epoch {
            self.blocks.put(id, value);
        }
    }

    fn invalidate(&mut self, id: &BlockId) {
        self.blocks.pop(id);
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl<S: BlockStore> CachedBlockStore<S> {
    /// Create a new cached store with the given capacity
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Arc::new(parking_lot::Mutex::new(CacheState {
                blocks: lru::LruCache::new(capacity),
                epoch: 0,
            })),
        }
    }

    /// Get the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.lock().blocks.clear();
    }

    /// Get cache statistics
    pub fn cache_len(&self) -> usize {
        self.cache.lock().blocks.len()
    }
}

#[async_trait]
impl<S: BlockStore> BlockStore for CachedBlockStore<S> {
    async fn try_get_value(&self, id: &BlockId) -> Result<Option<Value>> {
        let epoch = {
            let mut cache = self.cache.lock();
            if let Some(value) = cache.blocks.get(id) {
                return Ok(Some(value.clone()));
            }
            cache.epoch
        };

        let value = self.inner.try_get_value(id).await?;
        if let Some(value) = &value {
            self.cache.lock().put_if_current(epoch, id.clone(), value.clone());
        } else {
            trace!(block = %id, "cache miss on absent block");
        }
        Ok(value)
    }

    async fn insert_value(&self, id: BlockId, block: Value) -> Result<()> {
        let epoch = self.cache.lock().epoch;
        self.inner.insert_value(id.clone(), block.clone()).await?;
        self.cache.lock().put_if_current(epoch, id, block);
        Ok(())
    }

    async fn delete(&self, id: &BlockId) -> Result<()> {
        let result = self.inner.delete(id).await;
        self.cache.lock().invalidate(id);
        result
    }

    async fn apply(&self, id: &BlockId, operation: &BlockOperation) -> Result<()> {
        let result = self.inner.apply(id, operation).await;
        self.cache.lock().invalidate(id);
        result
    }
}
