//! Error types for the blocktree-store crate

use crate::BlockId;
use thiserror::Error;

/// Result type alias using `BlockStoreError`
pub type Result<T> = std::result::Result<T, BlockStoreError>;

/// Errors that can occur during block storage operations
#[derive(Error, Debug)]
pub enum BlockStoreError {
    /// Block not found
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// Block already exists
    #[error("block already exists: {0}")]
    AlreadyExists(BlockId),

    /// A delta could not be applied to the stored block
    #[error("invalid block operation: {0}")]
    InvalidOperation(String),

    /// A block type tag was registered twice under different names
    #[error("block type `{tag}` already registered as `{existing}`, cannot register as `{requested}`")]
    BlockTypeConflict {
        tag: String,
        existing: String,
        requested: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for BlockStoreError {
    fn from(err: serde_json::Error) -> Self {
        BlockStoreError::Serialization(err.to_string())
    }
}
