//! Tree cursors

use blocktree_store::BlockId;

/// One step of a path through a branch node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathBranch {
    /// The branch block
    pub id: BlockId,
    /// Index of the child taken
    pub index: usize,
}

/// A position in a tree.
///
/// A path is `on` when it points at an existing entry. Otherwise it sits in
/// the crack before `leaf_index` (which may equal the leaf's length). Paths
/// hold only block ids and indices and are valid until the tree that issued
/// them is mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub(crate) branches: Vec<PathBranch>,
    pub(crate) leaf_id: BlockId,
    pub(crate) leaf_index: usize,
    pub(crate) on: bool,
    pub(crate) version: u64,
}

impl Path {
    /// Whether the path points at an existing entry
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The branches walked from the root, outermost first
    pub fn branches(&self) -> &[PathBranch] {
        &self.branches
    }

    /// The leaf block the path ends in
    pub fn leaf_id(&self) -> &BlockId {
        &self.leaf_id
    }

    /// Index within the leaf
    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    /// The tree version this path was issued at
    pub fn version(&self) -> u64 {
        self.version
    }
}
