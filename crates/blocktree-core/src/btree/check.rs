//! Structural verification

use super::{BTree, TreeEntry, TreeNode, TreeTrunk};
use crate::{CoreError, Result};
use blocktree_store::{BlockId, BlockStore};
use tracing::debug;

/// Shape of a verified tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub leaf_count: usize,
    pub branch_count: usize,
    pub entry_count: usize,
}

fn violation(id: &BlockId, message: impl std::fmt::Display) -> CoreError {
    CoreError::corruption(format!("block {id}: {message}"))
}

impl<E, S, T> BTree<E, S, T>
where
    E: TreeEntry,
    S: BlockStore,
    T: TreeTrunk,
{
    /// Walk every node and verify ordering, partition bounds, fan-out,
    /// minimum occupancy of non-root nodes and uniform leaf depth.
    pub async fn check_invariants(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut leaf_depth = None;
        let mut pending = vec![(self.root_id().await?, 0usize, None::<E::Key>, None::<E::Key>)];

        while let Some((id, depth, lower, upper)) = pending.pop() {
            let in_bounds = |key: &E::Key| {
                lower.as_ref().map_or(true, |lower| key >= lower) && upper.as_ref().map_or(true, |upper| key < upper)
            };

            match self.node(&id).await? {
                TreeNode::Leaf(leaf) => {
                    if leaf.len() > self.config().leaf_capacity {
                        return Err(violation(&id, format!("{} entries over capacity", leaf.len())));
                    }
                    if depth > 0 && leaf.len() < self.config().min_leaf_entries() {
                        return Err(violation(&id, format!("underfull leaf with {} entries", leaf.len())));
                    }
                    let keys: Vec<E::Key> = leaf.entries.iter().map(TreeEntry::key).collect();
                    if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                        return Err(violation(&id, "entries out of order"));
                    }
                    if !keys.iter().all(in_bounds) {
                        return Err(violation(&id, "entry outside parent partitions"));
                    }
                    match leaf_depth {
                        None => leaf_depth = Some(depth),
                        Some(expected) if expected != depth => {
                            return Err(violation(&id, format!("leaf at depth {depth}, expected {expected}")));
                        }
                        Some(_) => {}
                    }
                    stats.leaf_count += 1;
                    stats.entry_count += leaf.len();
                }
                TreeNode::Branch(branch) => {
                    if branch.nodes.len() != branch.partitions.len() + 1 {
                        return Err(violation(
                            &id,
                            format!("{} partitions for {} children", branch.partitions.len(), branch.nodes.len()),
                        ));
                    }
                    if branch.partitions.len() > self.config().branch_capacity {
                        return Err(violation(&id, "partitions over capacity"));
                    }
                    let min = if depth == 0 { 2 } else { self.config().min_branch_nodes() };
                    if branch.nodes.len() < min {
                        return Err(violation(&id, format!("underfull branch with {} children", branch.nodes.len())));
                    }
                    if branch.partitions.windows(2).any(|pair| pair[0] >= pair[1]) {
                        return Err(violation(&id, "partitions out of order"));
                    }
                    if !branch.partitions.iter().all(in_bounds) {
                        return Err(violation(&id, "partition outside parent partitions"));
                    }

                    for (index, child) in branch.nodes.iter().enumerate() {
                        let child_lower = match index.checked_sub(1) {
                            Some(prior) => Some(branch.partitions[prior].clone()),
                            None => lower.clone(),
                        };
                        let child_upper = branch.partitions.get(index).cloned().or_else(|| upper.clone());
                        pending.push((child.clone(), depth + 1, child_lower, child_upper));
                    }
                    stats.branch_count += 1;
                }
            }
        }

        stats.height = leaf_depth.map_or(1, |depth| depth + 1);
        debug!(?stats, "verified tree");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{BlockTrunk, ROOT_FIELD};
    use crate::TreeConfig;
    use blocktree_store::MemoryBlockStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stats_of_grown_tree() {
        let store = Arc::new(MemoryBlockStore::new());
        let mut tree: BTree<u32, _> = BTree::create_independent(store, TreeConfig::with_capacity(4)).await.unwrap();
        for key in 0..100 {
            tree.insert(key).await.unwrap();
        }
        let stats = tree.check_invariants().await.unwrap();
        assert_eq!(stats.entry_count, 100);
        assert_eq!(stats.height, tree.height().await.unwrap());
        assert!(stats.leaf_count >= 25);
        assert!(stats.branch_count >= 1);
    }

    #[tokio::test]
    async fn test_detects_unordered_leaf() {
        let store = Arc::new(MemoryBlockStore::new());
        let tree: BTree<u32, _> = BTree::create_independent(Arc::clone(&store), TreeConfig::default())
            .await
            .unwrap();
        let root = tree.root_id().await.unwrap();
        store.delete(&root).await.unwrap();
        store
            .insert_value(root.clone(), json!({ "header": { "id": root, "type": "BTL" }, "entries": [3, 1] }))
            .await
            .unwrap();

        let trunk = BlockTrunk::open(Arc::clone(&store), tree.trunk().container_id().clone(), ROOT_FIELD)
            .await
            .unwrap();
        let reopened: BTree<u32, _> = BTree::open(store, trunk, TreeConfig::default()).unwrap();
        assert!(matches!(reopened.check_invariants().await, Err(CoreError::Corruption(_))));
    }
}
