//! # Blocktree Store
//!
//! Block storage contract for the blocktree ordered collections.
//!
//! This crate provides:
//! - **Block identity**: Opaque block ids, typed headers and a block type registry
//! - **Deltas**: Splice and set operations against named block fields
//! - **BlockStore trait**: Get, insert, delete and apply over any backend
//! - **Reference stores**: In-memory store and an LRU read cache wrapper
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        B+Tree / Chain (core)            │
//! ├─────────────────────────────────────────┤
//! │   apply_splice / apply_set helpers      │
//! ├─────────────────────────────────────────┤
//! │           BlockStore Trait              │
//! ├───────────────────┬─────────────────────┤
//! │ CachedBlockStore  │  MemoryBlockStore   │
//! └───────────────────┴─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use blocktree_store::{BlockOperation, BlockStore, MemoryBlockStore};
//!
//! let store = MemoryBlockStore::new();
//! store.insert(&block).await?;
//! store.apply(block.id(), &BlockOperation::splice("entries", 0, 0, items)).await?;
//! ```

pub mod block;
pub mod error;
pub mod memory;
pub mod operation;

pub use block::{register_block_type, Block, BlockHeader, BlockId, BlockType};
pub use error::{BlockStoreError, Result};
pub use memory::{CachedBlockStore, MemoryBlockStore};
pub use operation::{apply_set, apply_splice, BlockOperation};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Trait for block storage backends
///
/// Blocks are held in their serialized form so a store can apply
/// [`BlockOperation`] deltas without knowing the block's Rust type.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Retrieve a block, or `None` if it does not exist
    async fn try_get_value(&self, id: &BlockId) -> Result<Option<Value>>;

    /// Register a new block under the given id
    async fn insert_value(&self, id: BlockId, block: Value) -> Result<()>;

    /// Delete a block
    async fn delete(&self, id: &BlockId) -> Result<()>;

    /// Apply a delta to a named field of a block
    async fn apply(&self, id: &BlockId, operation: &BlockOperation) -> Result<()>;

    /// Retrieve a block, failing if it does not exist
    async fn get_value(&self, id: &BlockId) -> Result<Value> {
        self.try_get_value(id)
            .await?
            .ok_or_else(|| BlockStoreError::NotFound(id.clone()))
    }

    /// Check if a block exists
    async fn has_block(&self, id: &BlockId) -> Result<bool> {
        Ok(self.try_get_value(id).await?.is_some())
    }

    /// Retrieve and deserialize a block
    async fn get<T: DeserializeOwned + Send>(&self, id: &BlockId) -> Result<T> {
        let value = self.get_value(id).await?;
        serde_json::from_value(value).map_err(|e| BlockStoreError::Deserialization(e.to_string()))
    }

    /// Retrieve and deserialize a block if it exists
    async fn try_get<T: DeserializeOwned + Send>(&self, id: &BlockId) -> Result<Option<T>> {
        match self.try_get_value(id).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BlockStoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Serialize and register a new block under its header id
    async fn insert<T: Block>(&self, block: &T) -> Result<()> {
        let value = serde_json::to_value(block)?;
        self.insert_value(block.id().clone(), value).await
    }

    /// Generate a fresh block id
    fn generate_id(&self) -> BlockId {
        BlockId::generate()
    }

    /// Allocate a header with the given or a generated id
    fn create_block_header(&self, block_type: BlockType, id: Option<BlockId>) -> BlockHeader {
        BlockHeader::new(id.unwrap_or_else(|| self.generate_id()), block_type)
    }
}
