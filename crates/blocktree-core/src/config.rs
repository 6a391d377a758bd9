//! Tree and chain configuration

use crate::{CoreError, Result};
use blocktree_store::BlockId;
use serde::{Deserialize, Serialize};

/// Default maximum entries per leaf node
pub const DEFAULT_LEAF_CAPACITY: usize = 64;

/// Default maximum partitions per branch node
pub const DEFAULT_BRANCH_CAPACITY: usize = 64;

/// Default number of decoded nodes kept in memory per tree
pub const DEFAULT_TREE_CACHE_CAPACITY: usize = 256;

/// Default maximum entries per chain block
pub const DEFAULT_ENTRIES_PER_BLOCK: usize = 32;

/// Default number of decoded chain blocks kept in memory
pub const DEFAULT_CHAIN_CACHE_CAPACITY: usize = 64;

/// Smallest capacity for which split and merge stay well-formed
const MIN_NODE_CAPACITY: usize = 3;

/// Configuration for B+Tree behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Maximum entries per leaf before it splits
    pub leaf_capacity: usize,
    /// Maximum partitions per branch before it splits
    pub branch_capacity: usize,
    /// Decoded nodes kept in the node cache
    pub cache_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            branch_capacity: DEFAULT_BRANCH_CAPACITY,
            cache_capacity: DEFAULT_TREE_CACHE_CAPACITY,
        }
    }
}

impl TreeConfig {
    /// Create a configuration using one capacity for leaves and branches
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            leaf_capacity: capacity,
            branch_capacity: capacity,
            ..Self::default()
        }
    }

    /// Check that the capacities can hold a well-formed tree
    pub fn validate(&self) -> Result<()> {
        if self.leaf_capacity < MIN_NODE_CAPACITY {
            return Err(CoreError::InvalidConfig(format!(
                "leaf_capacity must be at least {MIN_NODE_CAPACITY}, got {}",
                self.leaf_capacity
            )));
        }
        if self.branch_capacity < MIN_NODE_CAPACITY {
            return Err(CoreError::InvalidConfig(format!(
                "branch_capacity must be at least {MIN_NODE_CAPACITY}, got {}",
                self.branch_capacity
            )));
        }
        if self.cache_capacity == 0 {
            return Err(CoreError::InvalidConfig("cache_capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Fewest entries a non-root leaf may hold
    pub fn min_leaf_entries(&self) -> usize {
        self.leaf_capacity.div_ceil(2)
    }

    /// Fewest children a non-root branch may hold
    pub fn min_branch_nodes(&self) -> usize {
        self.branch_capacity.div_ceil(2)
    }
}

/// Configuration for chain behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Maximum entries per data block
    pub entries_per_block: usize,
    /// Decoded data blocks kept in the block cache
    pub cache_capacity: usize,
    /// Explicit id for the chain's header block
    pub header_id: Option<BlockId>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            entries_per_block: DEFAULT_ENTRIES_PER_BLOCK,
            cache_capacity: DEFAULT_CHAIN_CACHE_CAPACITY,
            header_id: None,
        }
    }
}

impl ChainConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.entries_per_block == 0 {
            return Err(CoreError::InvalidConfig("entries_per_block must be non-zero".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(CoreError::InvalidConfig("cache_capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}
