//! Root pointer indirection
//!
//! A trunk names the block that is currently a tree's root. Keeping the
//! pointer outside the tree lets several trees share one container block,
//! each under its own field.

use crate::{CoreError, Result};
use async_trait::async_trait;
use blocktree_store::{apply_set, register_block_type, Block, BlockHeader, BlockId, BlockStore, BlockType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Block type tag for dedicated trunk blocks
pub const TRUNK_TAG: &str = "TRK";

/// Field holding the root id in a dedicated trunk block
pub const ROOT_FIELD: &str = "rootId";

/// Get/set access to a tree's root block id
#[async_trait]
pub trait TreeTrunk: Send + Sync {
    /// Current root block id
    async fn get_root(&self) -> Result<BlockId>;

    /// Repoint the tree at a new root block
    async fn set_root(&mut self, root: BlockId) -> Result<()>;
}

/// A block that only holds a root pointer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkBlock {
    pub header: BlockHeader,
    pub root_id: BlockId,
}

impl Block for TrunkBlock {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}

/// Trunk stored in a named field of a container block
pub struct BlockTrunk<S: BlockStore> {
    store: Arc<S>,
    container_id: BlockId,
    field: String,
    root: BlockId,
}

impl<S: BlockStore> BlockTrunk<S> {
    /// Allocate a dedicated trunk block pointing at `root`
    pub async fn create(store: Arc<S>, root: BlockId) -> Result<Self> {
        register_block_type(TRUNK_TAG, "TreeTrunk")?;
        let block = TrunkBlock {
            header: store.create_block_header(BlockType::new(TRUNK_TAG), None),
            root_id: root.clone(),
        };
        store.insert(&block).await?;
        debug!(trunk = %block.header.id, root = %root, "created trunk block");
        Ok(Self {
            container_id: block.header.id,
            field: ROOT_FIELD.to_string(),
            store,
            root,
        })
    }

    /// Bind a root pointer to a field of an existing container block
    pub async fn attach(
        store: Arc<S>,
        container_id: BlockId,
        field: impl Into<String>,
        root: BlockId,
    ) -> Result<Self> {
        let mut trunk = Self {
            store,
            container_id,
            field: field.into(),
            root: root.clone(),
        };
        trunk.set_root(root).await?;
        Ok(trunk)
    }

    /// Open the root pointer held in `field` of a container block
    pub async fn open(store: Arc<S>, container_id: BlockId, field: impl Into<String>) -> Result<Self> {
        let field = field.into();
        let container = store.get_value(&container_id).await?;
        let root = container
            .get(&field)
            .cloned()
            .and_then(|value| serde_json::from_value::<BlockId>(value).ok())
            .ok_or_else(|| {
                CoreError::corruption(format!("container {container_id} has no root in `{field}`"))
            })?;
        Ok(Self {
            store,
            container_id,
            field,
            root,
        })
    }

    /// The block holding the root pointer
    pub fn container_id(&self) -> &BlockId {
        &self.container_id
    }

    /// The field holding the root pointer
    pub fn field(&self) -> &str {
        &self.field
    }
}

#[async_trait]
impl<S: BlockStore> TreeTrunk for BlockTrunk<S> {
    async fn get_root(&self) -> Result<BlockId> {
        Ok(self.root.clone())
    }

    async fn set_root(&mut self, root: BlockId) -> Result<()> {
        apply_set(&*self.store, &self.container_id, &self.field, &mut self.root, root).await?;
        Ok(())
    }
}

/// Trunk held in process memory
#[derive(Clone, Debug)]
pub struct MemoryTrunk {
    root: BlockId,
}

impl MemoryTrunk {
    /// Create a trunk pointing at `root`
    pub fn new(root: BlockId) -> Self {
        Self { root }
    }
}

#[async_trait]
impl TreeTrunk for MemoryTrunk {
    async fn get_root(&self) -> Result<BlockId> {
        Ok(self.root.clone())
    }

    async fn set_root(&mut self, root: BlockId) -> Result<()> {
        self.root = root;
        Ok(())
    }
}
