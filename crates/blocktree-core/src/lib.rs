//! # Blocktree Core
//!
//! Ordered collections whose every node is a block in a [`BlockStore`].
//!
//! This crate provides:
//! - **B+Tree**: sorted map with version-stamped cursors, range streams and
//!   split/merge rebalancing
//! - **Chain**: doubly linked sequence of blocks for queue and stack access
//! - **Trunks**: root pointer indirection so several trees share a container
//! - **Bit utilities** and a CLOCK block cache built on them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        BTree          │     Chain       │
//! ├─────────────────────────────────────────┤
//! │   TreeTrunk  │  NodeCache  │  bits      │
//! ├─────────────────────────────────────────┤
//! │      BlockStore (splice / set deltas)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`BlockStore`]: blocktree_store::BlockStore

pub mod bits;
pub mod btree;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;

pub use btree::{
    BTree, BlockTrunk, KeyBound, KeyRange, MemoryTrunk, Path, PathBranch, TreeEntry, TreeKey, TreeStats, TreeTrunk,
};
pub use cache::{CacheStats, NodeCache};
pub use chain::{Chain, ChainEntry, ChainPath};
pub use config::{ChainConfig, TreeConfig};
pub use error::{CoreError, Result};
