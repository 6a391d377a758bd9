//! B+Tree over a block store
//!
//! Every node is one block. Leaves hold sorted entries; branches hold
//! partition keys and child block ids. The tree's root id lives behind a
//! [`TreeTrunk`] so it can be kept inside another block.
//!
//! ```text
//!                 ┌──────────────┐
//!   TreeTrunk ──▶ │ branch  [40] │
//!                 └──┬────────┬──┘
//!            ┌───────┘        └───────┐
//!     ┌──────▼───────┐        ┌───────▼──────┐
//!     │ leaf 10 20 30│        │ leaf 40 50   │
//!     └──────────────┘        └──────────────┘
//! ```
//!
//! Positions are [`Path`]s: block ids and indices stamped with the tree's
//! version. Any committed mutation invalidates outstanding paths.

mod check;
mod entry;
mod node;
mod path;
mod range;
mod tree;
mod trunk;

pub use check::TreeStats;
pub use entry::{TreeEntry, TreeKey};
pub use node::{register_tree_block_types, BranchNode, LeafNode, NodeKind, TreeNode, BRANCH_TAG, LEAF_TAG};
pub use path::{Path, PathBranch};
pub use range::{KeyBound, KeyRange};
pub use tree::BTree;
pub use trunk::{BlockTrunk, MemoryTrunk, TreeTrunk, TrunkBlock, ROOT_FIELD, TRUNK_TAG};
