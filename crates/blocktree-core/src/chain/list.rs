//! Chain implementation

use super::block::{
    register_chain_block_types, ChainDataBlock, ChainEntry, ChainHeaderBlock, CHAIN_DATA_TAG, CHAIN_HEADER_TAG,
    ENTRIES_FIELD, HEAD_FIELD, NEXT_FIELD, PRIOR_FIELD, TAIL_FIELD,
};
use crate::cache::NodeCache;
use crate::{ChainConfig, CoreError, Result};
use blocktree_store::{apply_set, apply_splice, Block, BlockId, BlockStore};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Position of one entry in a chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainPath {
    pub(crate) block_id: BlockId,
    pub(crate) index: usize,
}

impl ChainPath {
    /// The data block holding the entry
    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    /// Index within the block
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A double-ended sequence of entries stored as linked blocks.
///
/// Every data block other than a sole head/tail block holds at least one
/// entry.
pub struct Chain<E: ChainEntry, S: BlockStore> {
    store: Arc<S>,
    header: ChainHeaderBlock,
    config: ChainConfig,
    cache: NodeCache<ChainDataBlock<E>>,
}

impl<E, S> Chain<E, S>
where
    E: ChainEntry,
    S: BlockStore,
{
    /// Create an empty chain: one data block that is both head and tail
    pub async fn create(store: Arc<S>, config: ChainConfig) -> Result<Self> {
        config.validate()?;
        register_chain_block_types()?;

        let data = ChainDataBlock::<E>::new(
            store.create_block_header(ChainDataBlock::<E>::block_type(), None),
            None,
        );
        store.insert(&data).await?;

        let header = ChainHeaderBlock {
            header: store.create_block_header(ChainHeaderBlock::block_type(), config.header_id.clone()),
            head_id: data.header.id.clone(),
            tail_id: data.header.id.clone(),
        };
        store.insert(&header).await?;
        debug!(chain = %header.header.id, block = %data.header.id, "created chain");

        let chain = Self {
            cache: NodeCache::new(config.cache_capacity),
            store,
            header,
            config,
        };
        chain.cache.put(data.header.id.clone(), data);
        Ok(chain)
    }

    /// Open an existing chain by its header block
    pub async fn open(store: Arc<S>, header_id: &BlockId, config: ChainConfig) -> Result<Self> {
        config.validate()?;
        register_chain_block_types()?;

        let header: ChainHeaderBlock = store.get(header_id).await?;
        if header.header.block_type.tag() != CHAIN_HEADER_TAG {
            return Err(CoreError::corruption(format!(
                "block {header_id} is `{}`, not a chain header",
                header.header.block_type.tag()
            )));
        }
        Ok(Self {
            cache: NodeCache::new(config.cache_capacity),
            store,
            header,
            config,
        })
    }

    /// The header block id
    pub fn header_id(&self) -> &BlockId {
        self.header.id()
    }

    /// The chain's configuration
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // Mutation

    /// Append entries at the tail, opening new tail blocks as each fills.
    ///
    /// Returns the path of the last entry added, or `None` if `entries` was
    /// empty.
    #[instrument(skip(self, entries))]
    pub async fn add(&mut self, entries: impl IntoIterator<Item = E>) -> Result<Option<ChainPath>> {
        let entries: Vec<E> = entries.into_iter().collect();
        let mut entries = entries.into_iter().peekable();
        let capacity = self.config.entries_per_block;

        let mut tail = self.block(&self.header.tail_id.clone()).await?;
        let mut last = None;
        while entries.peek().is_some() {
            if tail.len() >= capacity {
                tail = self.open_tail(tail).await?;
            }
            let index = tail.len();
            let batch: Vec<E> = entries.by_ref().take(capacity - index).collect();
            let added = batch.len();
            self.splice_entries(&mut tail, index, 0, batch).await?;
            last = Some(ChainPath {
                block_id: tail.header.id.clone(),
                index: index + added - 1,
            });
        }
        Ok(last)
    }

    /// Remove up to `count` entries from the tail, returned in chain order
    #[instrument(skip(self))]
    pub async fn pop(&mut self, count: usize) -> Result<Vec<E>> {
        let mut removed = Vec::new();
        let mut remaining = count;
        while remaining > 0 {
            let mut tail = self.block(&self.header.tail_id.clone()).await?;
            let taken = remaining.min(tail.len());
            let start = tail.len() - taken;
            let mut batch = self.splice_entries(&mut tail, start, taken, Vec::new()).await?;
            remaining -= taken;
            batch.append(&mut removed);
            removed = batch;

            if !tail.is_empty() {
                break;
            }
            match tail.prior_id.clone() {
                Some(prior_id) => self.release_tail(&tail, prior_id).await?,
                None => break,
            }
        }
        Ok(removed)
    }

    /// Remove up to `count` entries from the head, returned in chain order
    #[instrument(skip(self))]
    pub async fn dequeue(&mut self, count: usize) -> Result<Vec<E>> {
        let mut removed = Vec::new();
        let mut remaining = count;
        while remaining > 0 {
            let mut head = self.block(&self.header.head_id.clone()).await?;
            let taken = remaining.min(head.len());
            removed.extend(self.splice_entries(&mut head, 0, taken, Vec::new()).await?);
            remaining -= taken;

            if !head.is_empty() {
                break;
            }
            match head.next_id.clone() {
                Some(next_id) => self.release_head(&head, next_id).await?,
                None => break,
            }
        }
        Ok(removed)
    }

    /// Replace the entry at `path`; `false` if no entry is there
    pub async fn update_at(&mut self, path: &ChainPath, entry: E) -> Result<bool> {
        let Some(mut block) = self.try_block(&path.block_id).await? else {
            return Ok(false);
        };
        if path.index >= block.len() {
            return Ok(false);
        }
        self.splice_entries(&mut block, path.index, 1, vec![entry]).await?;
        Ok(true)
    }

    async fn open_tail(&mut self, mut tail: ChainDataBlock<E>) -> Result<ChainDataBlock<E>> {
        let block = ChainDataBlock::new(
            self.store.create_block_header(ChainDataBlock::<E>::block_type(), None),
            Some(tail.header.id.clone()),
        );
        self.store.insert(&block).await?;
        self.cache.put(block.header.id.clone(), block.clone());

        self.set_link(&mut tail, NEXT_FIELD, Some(block.header.id.clone())).await?;
        apply_set(&*self.store, &self.header.header.id, TAIL_FIELD, &mut self.header.tail_id, block.header.id.clone())
            .await?;
        debug!(chain = %self.header.header.id, block = %block.header.id, "opened tail block");
        Ok(block)
    }

    async fn release_tail(&mut self, tail: &ChainDataBlock<E>, prior_id: BlockId) -> Result<()> {
        let mut prior = self.block(&prior_id).await?;
        self.set_link(&mut prior, NEXT_FIELD, None).await?;
        apply_set(&*self.store, &self.header.header.id, TAIL_FIELD, &mut self.header.tail_id, prior_id).await?;
        self.delete_block(&tail.header.id).await?;
        debug!(chain = %self.header.header.id, block = %tail.header.id, "released tail block");
        Ok(())
    }

    async fn release_head(&mut self, head: &ChainDataBlock<E>, next_id: BlockId) -> Result<()> {
        let mut next = self.block(&next_id).await?;
        self.set_link(&mut next, PRIOR_FIELD, None).await?;
        apply_set(&*self.store, &self.header.header.id, HEAD_FIELD, &mut self.header.head_id, next_id).await?;
        self.delete_block(&head.header.id).await?;
        debug!(chain = %self.header.header.id, block = %head.header.id, "released head block");
        Ok(())
    }

    // Navigation

    /// Path of the first entry
    pub async fn head(&self) -> Result<Option<ChainPath>> {
        let head = self.block(&self.header.head_id).await?;
        Ok((!head.is_empty()).then(|| ChainPath {
            block_id: head.header.id.clone(),
            index: 0,
        }))
    }

    /// Path of the last entry
    pub async fn tail(&self) -> Result<Option<ChainPath>> {
        let tail = self.block(&self.header.tail_id).await?;
        Ok(tail.len().checked_sub(1).map(|index| ChainPath {
            block_id: tail.header.id.clone(),
            index,
        }))
    }

    /// Check if the chain has no entries
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.head().await?.is_none())
    }

    /// The entry at `path`, or `None` if nothing is there
    pub async fn at(&self, path: &ChainPath) -> Result<Option<E>> {
        Ok(self
            .try_block(&path.block_id)
            .await?
            .and_then(|block| block.entries.get(path.index).cloned()))
    }

    /// The path one entry towards the tail, or `None` at the tail
    pub async fn next(&self, path: &ChainPath) -> Result<Option<ChainPath>> {
        let block = self.block(&path.block_id).await?;
        if path.index + 1 < block.len() {
            return Ok(Some(ChainPath {
                block_id: path.block_id.clone(),
                index: path.index + 1,
            }));
        }

        let mut next_id = block.next_id;
        while let Some(id) = next_id {
            let next = self.block(&id).await?;
            if !next.is_empty() {
                return Ok(Some(ChainPath { block_id: id, index: 0 }));
            }
            next_id = next.next_id;
        }
        Ok(None)
    }

    /// The path one entry towards the head, or `None` at the head
    pub async fn prev(&self, path: &ChainPath) -> Result<Option<ChainPath>> {
        let block = self.block(&path.block_id).await?;
        if let Some(index) = path.index.min(block.len()).checked_sub(1) {
            return Ok(Some(ChainPath {
                block_id: path.block_id.clone(),
                index,
            }));
        }

        let mut prior_id = block.prior_id;
        while let Some(id) = prior_id {
            let prior = self.block(&id).await?;
            if let Some(index) = prior.len().checked_sub(1) {
                return Ok(Some(ChainPath { block_id: id, index }));
            }
            prior_id = prior.prior_id;
        }
        Ok(None)
    }

    /// Paths from `start` (or the head/tail) in the given direction
    pub fn select(&self, start: Option<ChainPath>, forward: bool) -> impl Stream<Item = Result<ChainPath>> + '_ {
        stream::try_unfold((start, false), move |(cursor, started)| async move {
            let path = match (cursor, started) {
                (Some(path), true) if forward => self.next(&path).await?,
                (Some(path), true) => self.prev(&path).await?,
                (Some(path), false) => self.at(&path).await?.map(|_| path),
                (None, false) if forward => self.head().await?,
                (None, false) => self.tail().await?,
                (None, true) => None,
            };
            Ok::<_, CoreError>(path.map(|path| (path.clone(), (Some(path), true))))
        })
    }

    // Block access

    async fn try_block(&self, id: &BlockId) -> Result<Option<ChainDataBlock<E>>> {
        if let Some(block) = self.cache.get(id) {
            return Ok(Some(block));
        }
        let Some(block) = self.store.try_get::<ChainDataBlock<E>>(id).await? else {
            return Ok(None);
        };
        if block.header.block_type.tag() != CHAIN_DATA_TAG {
            return Err(CoreError::corruption(format!(
                "block {id} is `{}`, not chain data",
                block.header.block_type.tag()
            )));
        }
        self.cache.put(id.clone(), block.clone());
        Ok(Some(block))
    }

    async fn block(&self, id: &BlockId) -> Result<ChainDataBlock<E>> {
        self.try_block(id)
            .await?
            .ok_or_else(|| CoreError::corruption(format!("chain block {id} is missing")))
    }

    async fn splice_entries(
        &self,
        block: &mut ChainDataBlock<E>,
        index: usize,
        delete_count: usize,
        inserted: Vec<E>,
    ) -> Result<Vec<E>> {
        let removed = apply_splice(
            &*self.store,
            &block.header.id,
            ENTRIES_FIELD,
            &mut block.entries,
            index,
            delete_count,
            inserted,
        )
        .await?;
        self.cache.put(block.header.id.clone(), block.clone());
        Ok(removed)
    }

    async fn set_link(&self, block: &mut ChainDataBlock<E>, field: &str, target: Option<BlockId>) -> Result<()> {
        let slot = if field == NEXT_FIELD {
            &mut block.next_id
        } else {
            &mut block.prior_id
        };
        apply_set(&*self.store, &block.header.id, field, slot, target).await?;
        self.cache.put(block.header.id.clone(), block.clone());
        Ok(())
    }

    async fn delete_block(&self, id: &BlockId) -> Result<()> {
        self.store.delete(id).await?;
        self.cache.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocktree_store::MemoryBlockStore;
    use futures::TryStreamExt;

    async fn chain_with(per_block: usize, entries: &[&str]) -> Chain<String, MemoryBlockStore> {
        let store = Arc::new(MemoryBlockStore::new());
        let config = ChainConfig {
            entries_per_block: per_block,
            ..ChainConfig::default()
        };
        let mut chain = Chain::create(store, config).await.unwrap();
        chain.add(entries.iter().map(|s| s.to_string())).await.unwrap();
        chain
    }

    async fn contents(chain: &Chain<String, MemoryBlockStore>, forward: bool) -> Vec<String> {
        let paths: Vec<ChainPath> = chain.select(None, forward).try_collect().await.unwrap();
        let mut entries = Vec::new();
        for path in &paths {
            entries.push(chain.at(path).await.unwrap().unwrap());
        }
        entries
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = chain_with(4, &[]).await;
        assert!(chain.is_empty().await.unwrap());
        assert_eq!(chain.head().await.unwrap(), None);
        assert_eq!(chain.tail().await.unwrap(), None);
        assert!(contents(&chain, true).await.is_empty());
    }

    #[tokio::test]
    async fn test_pop_returns_chain_order() {
        let mut chain = chain_with(4, &["a", "b", "c"]).await;
        assert_eq!(chain.pop(2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(contents(&chain, true).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_dequeue_returns_chain_order() {
        let mut chain = chain_with(4, &["a", "b", "c"]).await;
        assert_eq!(chain.dequeue(2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(contents(&chain, true).await, vec!["c"]);
    }

    #[tokio::test]
    async fn test_pop_across_blocks() {
        let mut chain = chain_with(2, &["a", "b", "c", "d", "e"]).await;
        assert_eq!(chain.pop(4).await.unwrap(), vec!["b", "c", "d", "e"]);
        assert_eq!(contents(&chain, true).await, vec!["a"]);
        // Header plus the single remaining data block
        assert_eq!(chain.store.len(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_across_blocks() {
        let mut chain = chain_with(2, &["a", "b", "c", "d", "e"]).await;
        assert_eq!(chain.dequeue(3).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(contents(&chain, true).await, vec!["d", "e"]);
        assert_eq!(contents(&chain, false).await, vec!["e", "d"]);
    }

    #[tokio::test]
    async fn test_over_removal_empties_without_error() {
        let mut chain = chain_with(2, &["a", "b", "c"]).await;
        assert_eq!(chain.pop(10).await.unwrap(), vec!["a", "b", "c"]);
        assert!(chain.is_empty().await.unwrap());
        assert!(chain.dequeue(1).await.unwrap().is_empty());

        chain.add(["x".to_string()]).await.unwrap();
        assert_eq!(contents(&chain, true).await, vec!["x"]);
    }

    #[tokio::test]
    async fn test_select_from_middle() {
        let chain = chain_with(2, &["a", "b", "c", "d", "e"]).await;
        let head = chain.head().await.unwrap().unwrap();
        let second = chain.next(&head).await.unwrap().unwrap();
        let third = chain.next(&second).await.unwrap().unwrap();

        let forward: Vec<ChainPath> = chain.select(Some(third.clone()), true).try_collect().await.unwrap();
        assert_eq!(forward.len(), 3);
        let backward: Vec<ChainPath> = chain.select(Some(third), false).try_collect().await.unwrap();
        assert_eq!(backward.len(), 3);
        assert_eq!(backward.last(), Some(&head));
    }

    #[tokio::test]
    async fn test_next_and_prev_stop_at_edges() {
        let chain = chain_with(2, &["a", "b", "c"]).await;
        let tail = chain.tail().await.unwrap().unwrap();
        assert_eq!(chain.next(&tail).await.unwrap(), None);
        let head = chain.head().await.unwrap().unwrap();
        assert_eq!(chain.prev(&head).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_at() {
        let mut chain = chain_with(2, &["a", "b", "c"]).await;
        let tail = chain.tail().await.unwrap().unwrap();
        assert!(chain.update_at(&tail, "z".to_string()).await.unwrap());
        assert_eq!(contents(&chain, true).await, vec!["a", "b", "z"]);

        let past = ChainPath {
            block_id: tail.block_id.clone(),
            index: 5,
        };
        assert!(!chain.update_at(&past, "q".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen() {
        let store = Arc::new(MemoryBlockStore::new());
        let config = ChainConfig {
            entries_per_block: 3,
            ..ChainConfig::default()
        };
        let mut chain: Chain<u32, _> = Chain::create(Arc::clone(&store), config.clone()).await.unwrap();
        chain.add(0..10).await.unwrap();

        let reopened: Chain<u32, _> = Chain::open(store, chain.header_id(), config).await.unwrap();
        let paths: Vec<ChainPath> = reopened.select(None, true).try_collect().await.unwrap();
        assert_eq!(paths.len(), 10);
        assert_eq!(reopened.at(&paths[9]).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_open_rejects_non_header() {
        let store = Arc::new(MemoryBlockStore::new());
        let chain: Chain<u32, _> = Chain::create(Arc::clone(&store), ChainConfig::default()).await.unwrap();
        let head = chain.head().await.unwrap();
        assert!(head.is_none());

        let data_id = chain.header.head_id.clone();
        let result = Chain::<u32, _>::open(store, &data_id, ChainConfig::default()).await;
        assert!(result.is_err());
    }
}
