//! Chain block types

use crate::Result;
use blocktree_store::{register_block_type, Block, BlockHeader, BlockId, BlockType};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// Block type tag for the chain header
pub const CHAIN_HEADER_TAG: &str = "CHH";

/// Block type tag for chain data blocks
pub const CHAIN_DATA_TAG: &str = "CHD";

pub(crate) const ENTRIES_FIELD: &str = "entries";
pub(crate) const PRIOR_FIELD: &str = "priorId";
pub(crate) const NEXT_FIELD: &str = "nextId";
pub(crate) const HEAD_FIELD: &str = "headId";
pub(crate) const TAIL_FIELD: &str = "tailId";

/// Register the chain's block types with the block type registry
pub fn register_chain_block_types() -> Result<()> {
    register_block_type(CHAIN_HEADER_TAG, "ChainHeader")?;
    register_block_type(CHAIN_DATA_TAG, "ChainData")?;
    Ok(())
}

/// A value stored in a chain
pub trait ChainEntry: Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

impl<E> ChainEntry for E where E: Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

/// Names the first and last data blocks of a chain
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHeaderBlock {
    pub header: BlockHeader,
    pub head_id: BlockId,
    pub tail_id: BlockId,
}

impl ChainHeaderBlock {
    pub(crate) fn block_type() -> BlockType {
        BlockType::new(CHAIN_HEADER_TAG)
    }
}

impl Block for ChainHeaderBlock {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}

/// A run of entries with links to its neighbours
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "E: ChainEntry")]
pub struct ChainDataBlock<E> {
    pub header: BlockHeader,
    pub entries: Vec<E>,
    pub prior_id: Option<BlockId>,
    pub next_id: Option<BlockId>,
}

impl<E: ChainEntry> ChainDataBlock<E> {
    pub fn new(header: BlockHeader, prior_id: Option<BlockId>) -> Self {
        Self {
            header,
            entries: Vec::new(),
            prior_id,
            next_id: None,
        }
    }

    pub(crate) fn block_type() -> BlockType {
        BlockType::new(CHAIN_DATA_TAG)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: ChainEntry> Block for ChainDataBlock<E> {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}
