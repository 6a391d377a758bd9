//! Basic usage example for blocktree
//!
//! This example demonstrates:
//! - Creating a B+Tree over an in-memory block store
//! - Inserting, updating and deleting entries
//! - Range scans in both directions
//! - Using a chain as a queue
//!
//! Run with: cargo run --example basic_usage

use blocktree_core::{BTree, Chain, ChainConfig, KeyBound, KeyRange, TreeConfig};
use blocktree_store::MemoryBlockStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("🌳 Blocktree - Basic Usage Example\n");

    let store = Arc::new(MemoryBlockStore::new());

    // ==================== Tree Operations ====================

    println!("📦 Creating a tree with 8 entries per node...");
    let mut tree: BTree<(String, u32), _> =
        BTree::create_independent(Arc::clone(&store), TreeConfig::with_capacity(8)).await?;

    for (i, fruit) in ["apple", "cherry", "banana", "grape", "fig", "kiwi", "lemon", "mango", "date", "elderberry"]
        .iter()
        .enumerate()
    {
        tree.insert((fruit.to_string(), i as u32)).await?;
    }
    println!("   ✅ Inserted 10 entries, height {}", tree.height().await?);

    println!("\n🔍 Looking up 'fig'...");
    match tree.get(&"fig".to_string()).await? {
        Some((name, rank)) => println!("   - {} => {}", name, rank),
        None => println!("   ⚠️  not found"),
    }

    println!("\n➕ Merging a vote into 'fig'...");
    let (_, updated) = tree
        .merge(("fig".to_string(), 1), |(name, rank)| (name.clone(), rank + 100))
        .await?;
    println!("   ✅ updated existing entry: {}", updated);

    println!("\n📋 Entries from 'c' up to (not including) 'g'...");
    let range = KeyRange::new(
        Some(KeyBound::inclusive("c".to_string())),
        Some(KeyBound::exclusive("g".to_string())),
        true,
    );
    for (name, rank) in tree.range_entries(range).await? {
        println!("   - {} => {}", name, rank);
    }

    println!("\n📋 Everything, descending...");
    for (name, _) in tree.range_entries(KeyRange::all(false)).await? {
        println!("   - {}", name);
    }

    println!("\n🗑️  Deleting 'apple'...");
    let deleted = tree.delete(&"apple".to_string()).await?;
    println!("   ✅ deleted: {}, {} entries left", deleted, tree.get_count(None, true).await?);

    // ==================== Chain Operations ====================

    println!("\n🔗 Using a chain as a work queue...");
    let mut queue: Chain<String, _> = Chain::create(Arc::clone(&store), ChainConfig::default()).await?;
    queue
        .add(["resize", "thumbnail", "upload"].map(String::from))
        .await?;
    let next = queue.dequeue(1).await?;
    println!("   - dequeued {:?}", next);
    let last = queue.pop(1).await?;
    println!("   - popped {:?}", last);

    println!("\n📊 Store holds {} blocks", store.len());
    println!("\n✨ Done!");
    Ok(())
}
