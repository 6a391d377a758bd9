//! Several trees sharing one container block
//!
//! Each tree keeps its root pointer in its own field of the container, so a
//! collection and its secondary index can live side by side.
//!
//! Run with: cargo run --example shared_container

use blocktree_core::{BTree, BlockTrunk, TreeConfig};
use blocktree_store::{BlockId, BlockStore, MemoryBlockStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("🌳 Blocktree - Shared Container Example\n");

    let store = Arc::new(MemoryBlockStore::new());
    let container = BlockId::new("users");
    store
        .insert_value(container.clone(), json!({ "header": { "id": "users", "type": "COL" } }))
        .await?;

    let config = TreeConfig::with_capacity(4);
    let mut by_id: BTree<(u32, String), _> = BTree::create(Arc::clone(&store), config.clone(), |store, root| {
        BlockTrunk::attach(store, container.clone(), "primaryRoot", root)
    })
    .await?;
    let mut by_name: BTree<(String, u32), _> = BTree::create(Arc::clone(&store), config.clone(), |store, root| {
        BlockTrunk::attach(store, container.clone(), "nameRoot", root)
    })
    .await?;

    for (id, name) in [(3, "carol"), (1, "alice"), (2, "bob"), (5, "eve"), (4, "dave")] {
        by_id.insert((id, name.to_string())).await?;
        by_name.insert((name.to_string(), id)).await?;
    }

    println!("📦 Container fields:");
    let stored = store.get_value(&container).await?;
    println!("   - primaryRoot = {}", stored["primaryRoot"]);
    println!("   - nameRoot    = {}", stored["nameRoot"]);

    println!("\n🔄 Reopening the name index from the container...");
    let trunk = BlockTrunk::open(Arc::clone(&store), container.clone(), "nameRoot").await?;
    let reopened: BTree<(String, u32), _> = BTree::open(Arc::clone(&store), trunk, config)?;
    if let Some((name, id)) = reopened.get(&"dave".to_string()).await? {
        println!("   ✅ {} has id {}", name, id);
    }

    let stats = reopened.check_invariants().await?;
    println!("\n📊 Name index: {:?}", stats);
    Ok(())
}
