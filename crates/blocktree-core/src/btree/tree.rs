//! B+Tree implementation

use super::node::{register_tree_block_types, ENTRIES_FIELD, NODES_FIELD, PARTITIONS_FIELD};
use super::{BlockTrunk, BranchNode, LeafNode, NodeKind, Path, PathBranch, TreeEntry, TreeNode, TreeTrunk};
use crate::cache::{CacheStats, NodeCache};
use crate::{CoreError, Result, TreeConfig};
use blocktree_store::{apply_splice, BlockId, BlockStore};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Where a descent should land in a leaf
enum Target<'a, K> {
    Key(&'a K),
    First,
    Last,
}

/// A sorted map whose nodes are individually stored blocks
pub struct BTree<E: TreeEntry, S: BlockStore, T: TreeTrunk = BlockTrunk<S>> {
    /// Block store holding every node
    store: Arc<S>,
    /// Root pointer
    trunk: T,
    /// Capacities
    config: TreeConfig,
    /// Decoded nodes
    cache: NodeCache<TreeNode<E>>,
    /// Bumped on every committed mutation
    version: u64,
}

impl<E: TreeEntry, S: BlockStore> BTree<E, S, BlockTrunk<S>> {
    /// Create an empty tree whose root pointer lives in a new trunk block
    pub async fn create_independent(store: Arc<S>, config: TreeConfig) -> Result<Self> {
        Self::create(store, config, BlockTrunk::create).await
    }
}

impl<E, S, T> BTree<E, S, T>
where
    E: TreeEntry,
    S: BlockStore,
    T: TreeTrunk,
{
    /// Create an empty tree.
    ///
    /// Allocates a root leaf and hands its id to `create_trunk`, which binds
    /// it to whatever trunk the caller wants the root pointer kept in.
    pub async fn create<F, Fut>(store: Arc<S>, config: TreeConfig, create_trunk: F) -> Result<Self>
    where
        F: FnOnce(Arc<S>, BlockId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        config.validate()?;
        register_tree_block_types()?;

        let root = LeafNode::<E>::new(
            store.create_block_header(NodeKind::Leaf.block_type(), None),
            Vec::new(),
        );
        store.insert(&root).await?;
        let trunk = create_trunk(Arc::clone(&store), root.header.id.clone()).await?;
        debug!(root = %root.header.id, "created tree");

        Ok(Self::from_parts(store, trunk, config))
    }

    /// Open an existing tree through its trunk
    pub fn open(store: Arc<S>, trunk: T, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        register_tree_block_types()?;
        Ok(Self::from_parts(store, trunk, config))
    }

    fn from_parts(store: Arc<S>, trunk: T, config: TreeConfig) -> Self {
        Self {
            cache: NodeCache::new(config.cache_capacity),
            store,
            trunk,
            config,
            version: 0,
        }
    }

    /// The block store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The trunk holding the root pointer
    pub fn trunk(&self) -> &T {
        &self.trunk
    }

    /// The tree's configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Current version; paths issued at another version are invalid
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Node cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current root block id
    pub async fn root_id(&self) -> Result<BlockId> {
        self.trunk.get_root().await
    }

    /// Check whether a path was issued at the current version
    pub fn is_valid(&self, path: &Path) -> bool {
        path.version == self.version
    }

    pub(crate) fn validate(&self, path: &Path) -> Result<()> {
        if self.is_valid(path) {
            Ok(())
        } else {
            Err(CoreError::InvalidPath {
                path_version: path.version,
                tree_version: self.version,
            })
        }
    }

    /// Number of levels from root to leaves
    pub async fn height(&self) -> Result<usize> {
        Ok(self.first().await?.branches.len() + 1)
    }

    // Lookup

    /// Find the path for a key; `on` if the key exists
    #[instrument(skip(self))]
    pub async fn find(&self, key: &E::Key) -> Result<Path> {
        let root = self.trunk.get_root().await?;
        self.descend(root, Vec::new(), Target::Key(key)).await
    }

    /// Path at the lowest entry (off when the tree is empty)
    pub async fn first(&self) -> Result<Path> {
        let root = self.trunk.get_root().await?;
        self.descend(root, Vec::new(), Target::First).await
    }

    /// Path at the highest entry (off when the tree is empty)
    pub async fn last(&self) -> Result<Path> {
        let root = self.trunk.get_root().await?;
        self.descend(root, Vec::new(), Target::Last).await
    }

    /// Get the entry for a key
    pub async fn get(&self, key: &E::Key) -> Result<Option<E>> {
        let path = self.find(key).await?;
        self.at(&path).await
    }

    /// Get the entry a path points at, or `None` if it is off
    pub async fn at(&self, path: &Path) -> Result<Option<E>> {
        self.validate(path)?;
        if !path.on {
            return Ok(None);
        }
        let leaf = self.leaf(&path.leaf_id).await?;
        Ok(leaf.entries.get(path.leaf_index).cloned())
    }

    async fn descend(
        &self,
        mut id: BlockId,
        mut branches: Vec<PathBranch>,
        target: Target<'_, E::Key>,
    ) -> Result<Path> {
        loop {
            match self.node(&id).await? {
                TreeNode::Branch(branch) => {
                    let index = match &target {
                        Target::Key(key) => branch.search(key),
                        Target::First => 0,
                        Target::Last => branch.nodes.len().saturating_sub(1),
                    };
                    let child = branch.child(index)?.clone();
                    branches.push(PathBranch { id, index });
                    id = child;
                }
                TreeNode::Leaf(leaf) => {
                    let (on, leaf_index) = match &target {
                        Target::Key(key) => leaf.search(key),
                        Target::First => (!leaf.is_empty(), 0),
                        Target::Last => (!leaf.is_empty(), leaf.len().saturating_sub(1)),
                    };
                    return Ok(Path {
                        branches,
                        leaf_id: id,
                        leaf_index,
                        on,
                        version: self.version,
                    });
                }
            }
        }
    }

    // Navigation

    /// Move a path to the next entry; past the last entry it goes off
    pub async fn move_next(&self, path: &mut Path) -> Result<()> {
        self.validate(path)?;
        let leaf = self.leaf(&path.leaf_id).await?;
        let target = if path.on { path.leaf_index + 1 } else { path.leaf_index };
        if target < leaf.len() {
            path.leaf_index = target;
            path.on = true;
            return Ok(());
        }

        match self.adjacent_leaf(path, true).await? {
            Some(next) => *path = next,
            None => {
                path.leaf_index = leaf.len();
                path.on = false;
            }
        }
        Ok(())
    }

    /// Move a path to the previous entry; before the first entry it goes off
    pub async fn move_prior(&self, path: &mut Path) -> Result<()> {
        self.validate(path)?;
        if let Some(target) = path.leaf_index.checked_sub(1) {
            path.leaf_index = target;
            path.on = true;
            return Ok(());
        }

        match self.adjacent_leaf(path, false).await? {
            Some(prior) => *path = prior,
            None => {
                path.leaf_index = 0;
                path.on = false;
            }
        }
        Ok(())
    }

    /// A copy of `path` moved to the next entry
    pub async fn next(&self, path: &Path) -> Result<Path> {
        let mut next = path.clone();
        self.move_next(&mut next).await?;
        Ok(next)
    }

    /// A copy of `path` moved to the previous entry
    pub async fn prior(&self, path: &Path) -> Result<Path> {
        let mut prior = path.clone();
        self.move_prior(&mut prior).await?;
        Ok(prior)
    }

    /// Path into the neighbouring leaf, climbing to the nearest ancestor
    /// that has a sibling in the requested direction
    pub(crate) async fn adjacent_leaf(&self, path: &Path, forward: bool) -> Result<Option<Path>> {
        for (depth, step) in path.branches.iter().enumerate().rev() {
            let sibling = if forward {
                step.index + 1
            } else {
                match step.index.checked_sub(1) {
                    Some(sibling) => sibling,
                    None => continue,
                }
            };
            let branch = self.branch(&step.id).await?;
            if sibling >= branch.nodes.len() {
                continue;
            }

            let mut branches = path.branches[..depth].to_vec();
            branches.push(PathBranch {
                id: step.id.clone(),
                index: sibling,
            });
            let child = branch.child(sibling)?.clone();
            let target = if forward { Target::First } else { Target::Last };
            return self.descend(child, branches, target).await.map(Some);
        }
        Ok(None)
    }

    // Mutation

    /// Insert an entry.
    ///
    /// Returns a path at the new entry. If the key already exists nothing
    /// changes and the returned path is off, positioned at the existing key.
    #[instrument(skip(self, entry))]
    pub async fn insert(&mut self, entry: E) -> Result<Path> {
        let mut path = self.find(&entry.key()).await?;
        if path.on {
            path.on = false;
            return Ok(path);
        }
        let path = self.insert_at(path, entry).await?;
        Ok(self.commit(path))
    }

    /// Replace the entry a path points at.
    ///
    /// A key-preserving update replaces the slot. A key-changing update
    /// deletes the old entry and inserts the new one as one logical
    /// operation; if the new key is already present nothing changes and the
    /// returned path is off at that key. An off path is returned unchanged.
    #[instrument(skip(self, path, entry))]
    pub async fn update_at(&mut self, path: &Path, entry: E) -> Result<Path> {
        self.validate(path)?;
        if !path.on {
            return Ok(path.clone());
        }

        let mut leaf = self.leaf(&path.leaf_id).await?;
        let existing = leaf
            .entries
            .get(path.leaf_index)
            .map(TreeEntry::key)
            .ok_or_else(|| CoreError::corruption(format!("path past end of leaf {}", leaf.header.id)))?;
        let key = entry.key();

        if existing == key {
            self.splice_entries(&mut leaf, path.leaf_index, 1, vec![entry]).await?;
            return Ok(self.commit(path.clone()));
        }

        let target = self.find(&key).await?;
        if target.on {
            return Ok(Path { on: false, ..target });
        }
        self.remove_at(path).await?;
        let target = self.find(&key).await?;
        let path = self.insert_at(target, entry).await?;
        Ok(self.commit(path))
    }

    /// Insert if absent, otherwise replace with `get_updated(&existing)`.
    ///
    /// Returns the resulting path and whether an existing entry was updated.
    /// A replacement whose key belongs to another entry is refused like
    /// [`update_at`](Self::update_at): the path comes back off at that entry
    /// and the flag is `false`.
    #[instrument(skip(self, entry, get_updated))]
    pub async fn merge<F>(&mut self, entry: E, get_updated: F) -> Result<(Path, bool)>
    where
        F: FnOnce(&E) -> E,
    {
        let path = self.find(&entry.key()).await?;
        if path.on {
            let existing = self
                .at(&path)
                .await?
                .ok_or_else(|| CoreError::corruption("found path has no entry"))?;
            let updated = get_updated(&existing);
            let path = self.update_at(&path, updated).await?;
            let updated = path.on;
            return Ok((path, updated));
        }
        let path = self.insert_at(path, entry).await?;
        Ok((self.commit(path), false))
    }

    /// Insert or replace by key
    pub async fn upsert(&mut self, entry: E) -> Result<Path> {
        let replacement = entry.clone();
        let (path, _) = self.merge(entry, move |_| replacement).await?;
        Ok(path)
    }

    /// Delete the entry a path points at; `false` if the path is off
    #[instrument(skip(self, path))]
    pub async fn delete_at(&mut self, path: &Path) -> Result<bool> {
        self.validate(path)?;
        if !path.on {
            return Ok(false);
        }
        self.remove_at(path).await?;
        self.version += 1;
        Ok(true)
    }

    /// Delete the entry for a key; `false` if absent
    pub async fn delete(&mut self, key: &E::Key) -> Result<bool> {
        let path = self.find(key).await?;
        self.delete_at(&path).await
    }

    fn commit(&mut self, mut path: Path) -> Path {
        self.version += 1;
        path.version = self.version;
        path
    }

    /// Splice `entry` in at an off path, splitting upward on overflow
    async fn insert_at(&mut self, mut path: Path, entry: E) -> Result<Path> {
        let key = entry.key();
        let mut leaf = self.leaf(&path.leaf_id).await?;
        self.splice_entries(&mut leaf, path.leaf_index, 0, vec![entry]).await?;
        if leaf.len() <= self.config.leaf_capacity {
            path.on = true;
            return Ok(path);
        }

        self.split(&path, leaf).await?;
        self.find(&key).await
    }

    async fn split(&mut self, path: &Path, mut leaf: LeafNode<E>) -> Result<()> {
        let (mut key, mut right_id) = self.split_leaf(&mut leaf).await?;
        let mut left_id = leaf.header.id.clone();

        for step in path.branches.iter().rev() {
            let mut branch = self.branch(&step.id).await?;
            self.splice_partitions(&mut branch, step.index, 0, vec![key]).await?;
            self.splice_nodes(&mut branch, step.index + 1, 0, vec![right_id]).await?;
            if branch.partitions.len() <= self.config.branch_capacity {
                return Ok(());
            }
            (key, right_id) = self.split_branch(&mut branch).await?;
            left_id = step.id.clone();
        }

        self.grow_root(left_id, key, right_id).await
    }

    /// Move the upper half of a leaf into a new block
    async fn split_leaf(&self, leaf: &mut LeafNode<E>) -> Result<(E::Key, BlockId)> {
        let mid = leaf.len() / 2;
        let upper = leaf.entries[mid..].to_vec();
        let key = upper
            .first()
            .map(TreeEntry::key)
            .ok_or_else(|| CoreError::corruption("split of an empty leaf"))?;

        let sibling = LeafNode::new(
            self.store.create_block_header(NodeKind::Leaf.block_type(), None),
            upper,
        );
        let sibling_id = sibling.header.id.clone();
        self.insert_node(TreeNode::Leaf(sibling)).await?;

        let moved = leaf.len() - mid;
        self.splice_entries(leaf, mid, moved, Vec::new()).await?;
        debug!(leaf = %leaf.header.id, sibling = %sibling_id, "split leaf");
        Ok((key, sibling_id))
    }

    /// Move the upper half of a branch into a new block, returning the
    /// promoted middle partition
    async fn split_branch(&self, branch: &mut BranchNode<E::Key>) -> Result<(E::Key, BlockId)> {
        let mid = branch.partitions.len() / 2;
        let key = branch.partition(mid)?.clone();

        let sibling = BranchNode::new(
            self.store.create_block_header(NodeKind::Branch.block_type(), None),
            branch.partitions[mid + 1..].to_vec(),
            branch.nodes[mid + 1..].to_vec(),
        );
        let sibling_id = sibling.header.id.clone();
        self.insert_node(TreeNode::Branch(sibling)).await?;

        let partitions = branch.partitions.len() - mid;
        self.splice_partitions(branch, mid, partitions, Vec::new()).await?;
        let nodes = branch.nodes.len() - (mid + 1);
        self.splice_nodes(branch, mid + 1, nodes, Vec::new()).await?;
        debug!(branch = %branch.header.id, sibling = %sibling_id, "split branch");
        Ok((key, sibling_id))
    }

    async fn grow_root(&mut self, left: BlockId, key: E::Key, right: BlockId) -> Result<()> {
        let root = BranchNode::new(
            self.store.create_block_header(NodeKind::Branch.block_type(), None),
            vec![key],
            vec![left, right],
        );
        let root_id = root.header.id.clone();
        self.insert_node(TreeNode::Branch(root)).await?;
        self.trunk.set_root(root_id.clone()).await?;
        debug!(root = %root_id, "grew new root");
        Ok(())
    }

    /// Remove the entry at an on path and restore occupancy
    async fn remove_at(&mut self, path: &Path) -> Result<()> {
        let mut leaf = self.leaf(&path.leaf_id).await?;
        if path.leaf_index >= leaf.len() {
            return Err(CoreError::corruption(format!(
                "path index {} past end of leaf {}",
                path.leaf_index, leaf.header.id
            )));
        }
        self.splice_entries(&mut leaf, path.leaf_index, 1, Vec::new()).await?;

        if path.leaf_index == 0 {
            if let Some(key) = leaf.first_key() {
                self.update_partition(&path.branches, key).await?;
            }
        }
        self.rebalance(path, TreeNode::Leaf(leaf)).await
    }

    /// Rewrite the partition that bounds a leaf from below
    async fn update_partition(&self, branches: &[PathBranch], key: E::Key) -> Result<()> {
        for step in branches.iter().rev() {
            if let Some(partition) = step.index.checked_sub(1) {
                let mut branch = self.branch(&step.id).await?;
                self.set_partition(&mut branch, partition, key).await?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Borrow or merge bottom-up until every node on the path is at least
    /// half full, then collapse an empty root branch
    async fn rebalance(&mut self, path: &Path, mut node: TreeNode<E>) -> Result<()> {
        for step in path.branches.iter().rev() {
            if !self.is_underflow(&node) {
                return Ok(());
            }
            let mut parent = self.branch(&step.id).await?;
            let merged = match node {
                TreeNode::Leaf(leaf) => self.rebalance_leaf(&mut parent, step.index, leaf).await?,
                TreeNode::Branch(branch) => self.rebalance_branch(&mut parent, step.index, branch).await?,
            };
            if !merged {
                return Ok(());
            }
            node = TreeNode::Branch(parent);
        }

        if let TreeNode::Branch(root) = node {
            if root.partitions.is_empty() {
                self.collapse_root(root).await?;
            }
        }
        Ok(())
    }

    fn is_underflow(&self, node: &TreeNode<E>) -> bool {
        match node {
            TreeNode::Leaf(leaf) => leaf.len() < self.config.min_leaf_entries(),
            TreeNode::Branch(branch) => branch.nodes.len() < self.config.min_branch_nodes(),
        }
    }

    /// Returns `true` if the leaf was merged away (the parent lost a child)
    async fn rebalance_leaf(
        &self,
        parent: &mut BranchNode<E::Key>,
        index: usize,
        mut leaf: LeafNode<E>,
    ) -> Result<bool> {
        let min = self.config.min_leaf_entries();

        let mut right = match parent.nodes.get(index + 1) {
            Some(id) => Some(self.leaf(id).await?),
            None => None,
        };
        if let Some(right) = right.as_mut().filter(|right| right.len() > min) {
            let moved = self.splice_entries(right, 0, 1, Vec::new()).await?;
            let end = leaf.len();
            self.splice_entries(&mut leaf, end, 0, moved).await?;
            let key = right
                .first_key()
                .ok_or_else(|| CoreError::corruption("right sibling emptied by borrow"))?;
            self.set_partition(parent, index, key).await?;
            debug!(leaf = %leaf.header.id, "borrowed from right leaf");
            return Ok(false);
        }

        let mut left = match index.checked_sub(1) {
            Some(left) => Some(self.leaf(parent.child(left)?).await?),
            None => None,
        };
        if let Some(left) = left.as_mut().filter(|left| left.len() > min) {
            let last = left.len() - 1;
            let moved = self.splice_entries(left, last, 1, Vec::new()).await?;
            self.splice_entries(&mut leaf, 0, 0, moved).await?;
            let key = leaf
                .first_key()
                .ok_or_else(|| CoreError::corruption("leaf empty after borrow"))?;
            self.set_partition(parent, index - 1, key).await?;
            debug!(leaf = %leaf.header.id, "borrowed from left leaf");
            return Ok(false);
        }

        if let Some(right) = right {
            let end = leaf.len();
            self.splice_entries(&mut leaf, end, 0, right.entries.clone()).await?;
            self.delete_node(&right.header.id).await?;
            self.remove_child(parent, index, index + 1).await?;
            debug!(leaf = %leaf.header.id, merged = %right.header.id, "merged right leaf");
            return Ok(true);
        }

        if let Some(mut left) = left {
            let end = left.len();
            self.splice_entries(&mut left, end, 0, leaf.entries.clone()).await?;
            self.delete_node(&leaf.header.id).await?;
            self.remove_child(parent, index - 1, index).await?;
            debug!(leaf = %left.header.id, merged = %leaf.header.id, "merged into left leaf");
            return Ok(true);
        }

        Err(CoreError::corruption(format!("leaf {} has no siblings", leaf.header.id)))
    }

    /// Returns `true` if the branch was merged away (the parent lost a child)
    async fn rebalance_branch(
        &self,
        parent: &mut BranchNode<E::Key>,
        index: usize,
        mut branch: BranchNode<E::Key>,
    ) -> Result<bool> {
        let min = self.config.min_branch_nodes();

        let mut right = match parent.nodes.get(index + 1) {
            Some(id) => Some(self.branch(id).await?),
            None => None,
        };
        if let Some(right) = right.as_mut().filter(|right| right.nodes.len() > min) {
            let separator = parent.partition(index)?.clone();
            let mut promoted = self.splice_partitions(right, 0, 1, Vec::new()).await?;
            let moved = self.splice_nodes(right, 0, 1, Vec::new()).await?;

            let end = branch.partitions.len();
            self.splice_partitions(&mut branch, end, 0, vec![separator]).await?;
            let end = branch.nodes.len();
            self.splice_nodes(&mut branch, end, 0, moved).await?;

            let key = promoted
                .pop()
                .ok_or_else(|| CoreError::corruption("right branch had no partition to lend"))?;
            self.set_partition(parent, index, key).await?;
            debug!(branch = %branch.header.id, "borrowed from right branch");
            return Ok(false);
        }

        let mut left = match index.checked_sub(1) {
            Some(left) => Some(self.branch(parent.child(left)?).await?),
            None => None,
        };
        if let Some(left) = left.as_mut().filter(|left| left.nodes.len() > min) {
            let separator = parent.partition(index - 1)?.clone();
            let last = left.partitions.len() - 1;
            let mut promoted = self.splice_partitions(left, last, 1, Vec::new()).await?;
            let last = left.nodes.len() - 1;
            let moved = self.splice_nodes(left, last, 1, Vec::new()).await?;

            self.splice_partitions(&mut branch, 0, 0, vec![separator]).await?;
            self.splice_nodes(&mut branch, 0, 0, moved).await?;

            let key = promoted
                .pop()
                .ok_or_else(|| CoreError::corruption("left branch had no partition to lend"))?;
            self.set_partition(parent, index - 1, key).await?;
            debug!(branch = %branch.header.id, "borrowed from left branch");
            return Ok(false);
        }

        if let Some(right) = right {
            let mut partitions = vec![parent.partition(index)?.clone()];
            partitions.extend(right.partitions.iter().cloned());
            let end = branch.partitions.len();
            self.splice_partitions(&mut branch, end, 0, partitions).await?;
            let end = branch.nodes.len();
            self.splice_nodes(&mut branch, end, 0, right.nodes.clone()).await?;

            self.delete_node(&right.header.id).await?;
            self.remove_child(parent, index, index + 1).await?;
            debug!(branch = %branch.header.id, merged = %right.header.id, "merged right branch");
            return Ok(true);
        }

        if let Some(mut left) = left {
            let mut partitions = vec![parent.partition(index - 1)?.clone()];
            partitions.extend(branch.partitions.iter().cloned());
            let end = left.partitions.len();
            self.splice_partitions(&mut left, end, 0, partitions).await?;
            let end = left.nodes.len();
            self.splice_nodes(&mut left, end, 0, branch.nodes.clone()).await?;

            self.delete_node(&branch.header.id).await?;
            self.remove_child(parent, index - 1, index).await?;
            debug!(branch = %left.header.id, merged = %branch.header.id, "merged into left branch");
            return Ok(true);
        }

        Err(CoreError::corruption(format!("branch {} has no siblings", branch.header.id)))
    }

    /// Promote the sole child of an empty root branch
    async fn collapse_root(&mut self, root: BranchNode<E::Key>) -> Result<()> {
        let child = root.child(0)?.clone();
        self.trunk.set_root(child.clone()).await?;
        self.delete_node(&root.header.id).await?;
        debug!(old_root = %root.header.id, root = %child, "collapsed root");
        Ok(())
    }

    async fn remove_child(
        &self,
        parent: &mut BranchNode<E::Key>,
        partition: usize,
        node: usize,
    ) -> Result<()> {
        self.splice_partitions(parent, partition, 1, Vec::new()).await?;
        self.splice_nodes(parent, node, 1, Vec::new()).await?;
        Ok(())
    }

    // Node access

    pub(crate) async fn node(&self, id: &BlockId) -> Result<TreeNode<E>> {
        if let Some(node) = self.cache.get(id) {
            return Ok(node);
        }
        let value = self.store.get_value(id).await?;
        let node = TreeNode::decode(value)?;
        self.cache.put(id.clone(), node.clone());
        Ok(node)
    }

    pub(crate) async fn leaf(&self, id: &BlockId) -> Result<LeafNode<E>> {
        match self.node(id).await? {
            TreeNode::Leaf(leaf) => Ok(leaf),
            TreeNode::Branch(_) => Err(CoreError::corruption(format!("expected leaf at {id}, found branch"))),
        }
    }

    pub(crate) async fn branch(&self, id: &BlockId) -> Result<BranchNode<E::Key>> {
        match self.node(id).await? {
            TreeNode::Branch(branch) => Ok(branch),
            TreeNode::Leaf(_) => Err(CoreError::corruption(format!("expected branch at {id}, found leaf"))),
        }
    }

    async fn insert_node(&self, node: TreeNode<E>) -> Result<()> {
        match &node {
            TreeNode::Leaf(leaf) => self.store.insert(leaf).await?,
            TreeNode::Branch(branch) => self.store.insert(branch).await?,
        }
        self.cache.put(node.id().clone(), node);
        Ok(())
    }

    async fn delete_node(&self, id: &BlockId) -> Result<()> {
        self.store.delete(id).await?;
        self.cache.remove(id);
        Ok(())
    }

    async fn splice_entries(
        &self,
        leaf: &mut LeafNode<E>,
        index: usize,
        delete_count: usize,
        inserted: Vec<E>,
    ) -> Result<Vec<E>> {
        let removed = apply_splice(
            &*self.store,
            &leaf.header.id,
            ENTRIES_FIELD,
            &mut leaf.entries,
            index,
            delete_count,
            inserted,
        )
        .await?;
        self.cache.put(leaf.header.id.clone(), TreeNode::Leaf(leaf.clone()));
        Ok(removed)
    }

    async fn splice_partitions(
        &self,
        branch: &mut BranchNode<E::Key>,
        index: usize,
        delete_count: usize,
        inserted: Vec<E::Key>,
    ) -> Result<Vec<E::Key>> {
        let removed = apply_splice(
            &*self.store,
            &branch.header.id,
            PARTITIONS_FIELD,
            &mut branch.partitions,
            index,
            delete_count,
            inserted,
        )
        .await?;
        self.cache.put(branch.header.id.clone(), TreeNode::Branch(branch.clone()));
        Ok(removed)
    }

    async fn splice_nodes(
        &self,
        branch: &mut BranchNode<E::Key>,
        index: usize,
        delete_count: usize,
        inserted: Vec<BlockId>,
    ) -> Result<Vec<BlockId>> {
        let removed = apply_splice(
            &*self.store,
            &branch.header.id,
            NODES_FIELD,
            &mut branch.nodes,
            index,
            delete_count,
            inserted,
        )
        .await?;
        self.cache.put(branch.header.id.clone(), TreeNode::Branch(branch.clone()));
        Ok(removed)
    }

    async fn set_partition(&self, branch: &mut BranchNode<E::Key>, index: usize, key: E::Key) -> Result<()> {
        self.splice_partitions(branch, index, 1, vec![key]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::MemoryTrunk;
    use blocktree_store::MemoryBlockStore;
    use proptest::prelude::*;
    use rstest::rstest;

    type TestTree = BTree<i64, MemoryBlockStore>;

    async fn tree_with(capacity: usize, keys: impl IntoIterator<Item = i64>) -> TestTree {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree = TestTree::create_independent(store, TreeConfig::with_capacity(capacity))
            .await
            .unwrap();
        for key in keys {
            tree.insert(key).await.unwrap();
        }
        tree
    }

    async fn forward(tree: &TestTree) -> Vec<i64> {
        let mut path = tree.first().await.unwrap();
        let mut keys = Vec::new();
        while path.is_on() {
            keys.push(tree.at(&path).await.unwrap().unwrap());
            tree.move_next(&mut path).await.unwrap();
        }
        keys
    }

    async fn backward(tree: &TestTree) -> Vec<i64> {
        let mut path = tree.last().await.unwrap();
        let mut keys = Vec::new();
        while path.is_on() {
            keys.push(tree.at(&path).await.unwrap().unwrap());
            tree.move_prior(&mut path).await.unwrap();
        }
        keys
    }

    #[tokio::test]
    async fn test_empty_tree() {
        let tree = tree_with(4, []).await;
        assert!(!tree.first().await.unwrap().is_on());
        assert!(!tree.last().await.unwrap().is_on());
        assert_eq!(tree.get(&1).await.unwrap(), None);
        assert_eq!(tree.height().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let mut tree = tree_with(4, []).await;
        let path = tree.insert(7).await.unwrap();
        assert!(path.is_on());
        assert_eq!(tree.at(&path).await.unwrap(), Some(7));
        assert_eq!(tree.get(&7).await.unwrap(), Some(7));
        assert_eq!(tree.get(&8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_reported() {
        let mut tree = tree_with(4, [1, 2, 3]).await;
        let version = tree.version();

        let path = tree.insert(2).await.unwrap();
        assert!(!path.is_on());
        assert_eq!(path.leaf_index(), 1);
        assert_eq!(tree.version(), version);
        assert!(tree.is_valid(&path));
        assert_eq!(forward(&tree).await, vec![1, 2, 3]);
    }

    #[rstest]
    #[case(3)]
    #[case(4)]
    #[case(5)]
    #[tokio::test]
    async fn test_splits_keep_order(#[case] capacity: usize) {
        let keys: Vec<i64> = (0..60).map(|i| (i * 37) % 61).collect();
        let tree = tree_with(capacity, keys.iter().copied()).await;

        let mut expected = keys.clone();
        expected.sort_unstable();
        assert_eq!(forward(&tree).await, expected);
        expected.reverse();
        assert_eq!(backward(&tree).await, expected);
        assert!(tree.height().await.unwrap() > 2);
    }

    #[tokio::test]
    async fn test_find_missing_key_sits_in_crack() {
        let tree = tree_with(4, [10, 20, 30, 40, 50, 60]).await;

        let path = tree.find(&35).await.unwrap();
        assert!(!path.is_on());
        assert_eq!(tree.at(&path).await.unwrap(), None);

        let next = tree.next(&path).await.unwrap();
        assert_eq!(tree.at(&next).await.unwrap(), Some(40));
        let prior = tree.prior(&path).await.unwrap();
        assert_eq!(tree.at(&prior).await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn test_navigation_off_the_ends() {
        let tree = tree_with(4, [1, 2, 3, 4, 5, 6, 7]).await;

        let last = tree.last().await.unwrap();
        let past = tree.next(&last).await.unwrap();
        assert!(!past.is_on());
        let back = tree.prior(&past).await.unwrap();
        assert_eq!(tree.at(&back).await.unwrap(), Some(7));

        let first = tree.first().await.unwrap();
        let before = tree.prior(&first).await.unwrap();
        assert!(!before.is_on());
        let again = tree.next(&before).await.unwrap();
        assert_eq!(tree.at(&again).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_delete_at_off_path() {
        let mut tree = tree_with(4, [1, 3]).await;
        let version = tree.version();
        let path = tree.find(&2).await.unwrap();
        assert!(!tree.delete_at(&path).await.unwrap());
        assert_eq!(tree.version(), version);
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_everything_collapses_to_leaf() {
        let mut tree = tree_with(3, 0..40).await;
        assert!(tree.height().await.unwrap() > 2);

        for key in 0..40 {
            assert!(tree.delete(&key).await.unwrap(), "key {key} missing");
            assert_eq!(tree.get(&key).await.unwrap(), None);
        }
        assert_eq!(tree.height().await.unwrap(), 1);
        assert!(!tree.first().await.unwrap().is_on());
        assert_eq!(tree.store().len(), 2, "only the root leaf and trunk remain");
    }

    #[tokio::test]
    async fn test_delete_from_the_back() {
        let mut tree = tree_with(4, 0..50).await;
        for key in (10..50).rev() {
            assert!(tree.delete(&key).await.unwrap());
        }
        assert_eq!(forward(&tree).await, (0..10).collect::<Vec<_>>());
        let stats = tree.check_invariants().await.unwrap();
        assert_eq!(stats.entry_count, 10);
    }

    #[tokio::test]
    async fn test_stale_path_is_rejected() {
        let mut tree = tree_with(4, [1, 2, 3]).await;
        let path = tree.find(&2).await.unwrap();
        tree.insert(4).await.unwrap();

        assert!(!tree.is_valid(&path));
        assert!(matches!(tree.next(&path).await, Err(CoreError::InvalidPath { .. })));
        assert!(matches!(tree.prior(&path).await, Err(CoreError::InvalidPath { .. })));
        assert!(matches!(tree.delete_at(&path).await, Err(CoreError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_update_in_place_keeps_key() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<(String, u32), _> =
            BTree::create_independent(store, TreeConfig::with_capacity(4)).await.unwrap();
        tree.insert(("a".to_string(), 1)).await.unwrap();
        let path = tree.find(&"a".to_string()).await.unwrap();

        let updated = tree.update_at(&path, ("a".to_string(), 2)).await.unwrap();
        assert!(updated.is_on());
        assert_eq!(tree.at(&updated).await.unwrap(), Some(("a".to_string(), 2)));
        assert!(tree.version() > path.version());
    }

    #[tokio::test]
    async fn test_update_with_new_key_moves_entry() {
        let mut tree = tree_with(3, 0..20).await;
        let path = tree.find(&5).await.unwrap();

        let moved = tree.update_at(&path, 100).await.unwrap();
        assert_eq!(tree.at(&moved).await.unwrap(), Some(100));
        assert_eq!(tree.get(&5).await.unwrap(), None);
        assert_eq!(tree.check_invariants().await.unwrap().entry_count, 20);
    }

    #[tokio::test]
    async fn test_update_onto_existing_key_is_refused() {
        let mut tree = tree_with(4, [1, 2, 3]).await;
        let version = tree.version();
        let path = tree.find(&1).await.unwrap();

        let result = tree.update_at(&path, 3).await.unwrap();
        assert!(!result.is_on());
        assert_eq!(tree.version(), version);
        assert_eq!(forward(&tree).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_merge_inserts_then_updates() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<(String, u32), _> =
            BTree::create_independent(store, TreeConfig::default()).await.unwrap();

        let (_, updated) = tree
            .merge(("votes".to_string(), 1), |existing| (existing.0.clone(), existing.1 + 1))
            .await
            .unwrap();
        assert!(!updated);

        let (path, updated) = tree
            .merge(("votes".to_string(), 1), |existing| (existing.0.clone(), existing.1 + 1))
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(tree.at(&path).await.unwrap(), Some(("votes".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_merge_refuses_key_collision() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<(u32, u32), _> =
            BTree::create_independent(store, TreeConfig::default()).await.unwrap();
        tree.insert((1, 10)).await.unwrap();
        tree.insert((2, 20)).await.unwrap();
        let version = tree.version();

        let (path, updated) = tree.merge((1, 0), |existing| (2, existing.1)).await.unwrap();
        assert!(!updated);
        assert!(!path.is_on());
        assert_eq!(tree.version(), version);
        assert_eq!(tree.get(&1).await.unwrap(), Some((1, 10)));
        assert_eq!(tree.get(&2).await.unwrap(), Some((2, 20)));

        let (path, updated) = tree.merge((1, 0), |existing| (3, existing.1)).await.unwrap();
        assert!(updated);
        assert_eq!(tree.at(&path).await.unwrap(), Some((3, 10)));
        assert_eq!(tree.get(&1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<(u32, String), _> =
            BTree::create_independent(store, TreeConfig::default()).await.unwrap();
        tree.upsert((1, "a".to_string())).await.unwrap();
        tree.upsert((1, "b".to_string())).await.unwrap();
        assert_eq!(tree.get(&1).await.unwrap(), Some((1, "b".to_string())));
    }

    #[tokio::test]
    async fn test_memory_trunk_tree() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<i64, _, MemoryTrunk> = BTree::create(store, TreeConfig::with_capacity(3), |_, root| async move {
            Ok(MemoryTrunk::new(root))
        })
        .await
        .unwrap();

        for key in 0..10 {
            tree.insert(key).await.unwrap();
        }
        assert_eq!(tree.height().await.unwrap(), 3);
        assert_eq!(tree.get(&9).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_reopen_through_trunk() {
        let store = Arc::new(MemoryBlockStore::new());
        let container = {
            let mut tree: TestTree = BTree::create_independent(Arc::clone(&store), TreeConfig::with_capacity(4))
                .await
                .unwrap();
            for key in 0..30 {
                tree.insert(key).await.unwrap();
            }
            tree.trunk().container_id().clone()
        };

        let trunk = BlockTrunk::open(Arc::clone(&store), container, crate::btree::ROOT_FIELD)
            .await
            .unwrap();
        let tree: TestTree = BTree::open(store, trunk, TreeConfig::with_capacity(4)).unwrap();
        assert_eq!(forward(&tree).await, (0..30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let store = Arc::new(MemoryBlockStore::new());
        let result = TestTree::create_independent(store, TreeConfig::with_capacity(1)).await;
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_small_cache_still_consistent() {
        let store = Arc::new(MemoryBlockStore::new());
        let config = TreeConfig {
            cache_capacity: 2,
            ..TreeConfig::with_capacity(3)
        };
        let mut tree: TestTree = BTree::create_independent(store, config).await.unwrap();
        for key in (0..50).rev() {
            tree.insert(key).await.unwrap();
        }
        for key in (0..50).step_by(3) {
            tree.delete(&key).await.unwrap();
        }
        let expected: Vec<i64> = (0..50).filter(|key| key % 3 != 0).collect();
        assert_eq!(forward(&tree).await, expected);
        assert!(tree.cache_stats().evictions > 0);
        tree.check_invariants().await.unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_deletes_keep_structure(
            keys in proptest::collection::btree_set(0i64..500, 1..150),
            capacity in 3usize..6,
        ) {
            let remaining = tokio_test::block_on(async {
                let mut tree = tree_with(capacity, keys.iter().copied()).await;
                for key in keys.iter().step_by(3) {
                    assert!(tree.delete(key).await.unwrap());
                }
                tree.check_invariants().await.unwrap();
                forward(&tree).await
            });

            let expected: Vec<i64> = keys
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 3 != 0)
                .map(|(_, key)| *key)
                .collect();
            prop_assert_eq!(remaining, expected);
        }
    }
}
