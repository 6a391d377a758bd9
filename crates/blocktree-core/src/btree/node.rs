//! B+Tree node types

use super::{TreeEntry, TreeKey};
use crate::{CoreError, Result};
use blocktree_store::{register_block_type, Block, BlockHeader, BlockId, BlockType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Block type tag for leaf nodes
pub const LEAF_TAG: &str = "BTL";

/// Block type tag for branch nodes
pub const BRANCH_TAG: &str = "BTB";

pub(crate) const ENTRIES_FIELD: &str = "entries";
pub(crate) const PARTITIONS_FIELD: &str = "partitions";
pub(crate) const NODES_FIELD: &str = "nodes";

/// Register the tree's block types with the block type registry
pub fn register_tree_block_types() -> Result<()> {
    register_block_type(LEAF_TAG, "BTreeLeaf")?;
    register_block_type(BRANCH_TAG, "BTreeBranch")?;
    Ok(())
}

/// Which shape a tree block has
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Branch,
}

impl NodeKind {
    /// Resolve a block type tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            LEAF_TAG => Some(NodeKind::Leaf),
            BRANCH_TAG => Some(NodeKind::Branch),
            _ => None,
        }
    }

    /// The block type for this kind
    pub fn block_type(self) -> BlockType {
        match self {
            NodeKind::Leaf => BlockType::new(LEAF_TAG),
            NodeKind::Branch => BlockType::new(BRANCH_TAG),
        }
    }
}

/// A leaf node holding sorted entries
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "E: TreeEntry")]
pub struct LeafNode<E> {
    pub header: BlockHeader,
    pub entries: Vec<E>,
}

impl<E: TreeEntry> LeafNode<E> {
    /// Create a leaf with the given entries
    pub fn new(header: BlockHeader, entries: Vec<E>) -> Self {
        Self { header, entries }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the leaf has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary search for a key: `(found, index)` where `index` is the
    /// entry's slot or the insertion point
    pub fn search(&self, key: &E::Key) -> (bool, usize) {
        match self.entries.binary_search_by(|entry| entry.key().cmp(key)) {
            Ok(index) => (true, index),
            Err(index) => (false, index),
        }
    }

    /// Key of the lowest entry
    pub fn first_key(&self) -> Option<E::Key> {
        self.entries.first().map(TreeEntry::key)
    }
}

impl<E: TreeEntry> Block for LeafNode<E> {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}

/// A branch node holding partitions and child ids.
///
/// `nodes[i]` holds keys in `[partitions[i - 1], partitions[i])`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "K: TreeKey")]
pub struct BranchNode<K> {
    pub header: BlockHeader,
    pub partitions: Vec<K>,
    pub nodes: Vec<BlockId>,
}

impl<K: TreeKey> BranchNode<K> {
    /// Create a branch
    pub fn new(header: BlockHeader, partitions: Vec<K>, nodes: Vec<BlockId>) -> Self {
        Self {
            header,
            partitions,
            nodes,
        }
    }

    /// Index of the child that covers `key`
    pub fn search(&self, key: &K) -> usize {
        self.partitions.partition_point(|partition| partition <= key)
    }

    /// Child id at `index`
    pub fn child(&self, index: usize) -> Result<&BlockId> {
        self.nodes.get(index).ok_or_else(|| {
            CoreError::corruption(format!(
                "branch {} has no child {index} ({} children)",
                self.header.id,
                self.nodes.len()
            ))
        })
    }

    /// Partition at `index`
    pub fn partition(&self, index: usize) -> Result<&K> {
        self.partitions.get(index).ok_or_else(|| {
            CoreError::corruption(format!(
                "branch {} has no partition {index} ({} partitions)",
                self.header.id,
                self.partitions.len()
            ))
        })
    }
}

impl<K: TreeKey> Block for BranchNode<K> {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}

/// A decoded tree block
#[derive(Clone, Debug)]
pub enum TreeNode<E: TreeEntry> {
    Leaf(LeafNode<E>),
    Branch(BranchNode<E::Key>),
}

impl<E: TreeEntry> TreeNode<E> {
    /// Decode a stored block by its type tag
    pub fn decode(value: Value) -> Result<Self> {
        let tag = value
            .pointer("/header/type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::corruption("tree block has no type tag"))?
            .to_string();

        let malformed = |e: serde_json::Error| CoreError::corruption(format!("malformed {tag} block: {e}"));
        match NodeKind::from_tag(&tag) {
            Some(NodeKind::Leaf) => serde_json::from_value(value).map(TreeNode::Leaf).map_err(malformed),
            Some(NodeKind::Branch) => serde_json::from_value(value).map(TreeNode::Branch).map_err(malformed),
            None => Err(CoreError::corruption(format!("unexpected block type `{tag}` in tree"))),
        }
    }

    /// The block id
    pub fn id(&self) -> &BlockId {
        match self {
            TreeNode::Leaf(leaf) => &leaf.header.id,
            TreeNode::Branch(branch) => &branch.header.id,
        }
    }

    /// The node kind
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Leaf(_) => NodeKind::Leaf,
            TreeNode::Branch(_) => NodeKind::Branch,
        }
    }
}
