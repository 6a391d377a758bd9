//! Error types for the blocktree-core crate

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in tree and chain operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// A path was used after the tree it was drawn from changed
    #[error("invalid path: path version {path_version}, tree version {tree_version}")]
    InvalidPath { path_version: u64, tree_version: u64 },

    /// Structural corruption detected (malformed node, broken invariant)
    #[error("structure corruption: {0}")]
    Corruption(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Block store error
    #[error("block store error: {0}")]
    BlockStore(#[from] blocktree_store::BlockStoreError),
}

impl CoreError {
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        CoreError::Corruption(message.into())
    }
}
