//! Block identity and header types

use crate::{BlockStoreError, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Opaque handle to a persisted block
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Short tag discriminating the payload shape of a block
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(String);

impl BlockType {
    /// Create a block type from its short tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the short tag
    pub fn tag(&self) -> &str {
        &self.0
    }

    /// Get the registered descriptive name, if any
    pub fn name(&self) -> Option<String> {
        REGISTRY.get(&self.0).map(|entry| entry.value().clone())
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static REGISTRY: LazyLock<DashMap<String, String>> = LazyLock::new(DashMap::new);

/// Register a block type tag under a descriptive name.
///
/// Registering the same tag/name pair again is a no-op; reusing a tag for a
/// different name fails with [`BlockStoreError::BlockTypeConflict`].
pub fn register_block_type(tag: &str, name: &str) -> Result<BlockType> {
    let entry = REGISTRY
        .entry(tag.to_string())
        .or_insert_with(|| name.to_string());
    if entry.value() != name {
        return Err(BlockStoreError::BlockTypeConflict {
            tag: tag.to_string(),
            existing: entry.value().clone(),
            requested: name.to_string(),
        });
    }
    tracing::trace!(tag, name, "registered block type");
    Ok(BlockType::new(tag))
}

/// Header carried by every block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// The block's identifier
    pub id: BlockId,
    /// The payload discriminator
    #[serde(rename = "type")]
    pub block_type: BlockType,
}

impl BlockHeader {
    /// Create a new header
    pub fn new(id: BlockId, block_type: BlockType) -> Self {
        Self { id, block_type }
    }
}

/// A typed block that can be stored in a [`crate::BlockStore`]
pub trait Block: Serialize + DeserializeOwned + Send + Sync {
    /// The block's header
    fn header(&self) -> &BlockHeader;

    /// Shortcut for the header id
    fn id(&self) -> &BlockId {
        &self.header().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = BlockId::generate();
        let b = BlockId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_block_id_serializes_as_string() {
        let id = BlockId::new("abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc"));
    }

    #[test]
    fn test_header_field_names() {
        let header = BlockHeader::new(BlockId::new("x"), BlockType::new("TST"));
        let value = serde_json::to_value(&header).unwrap();
        assert_eq!(value, serde_json::json!({ "id": "x", "type": "TST" }));
    }

    #[test]
    fn test_register_block_type_is_idempotent() {
        let first = register_block_type("RT1", "RegistryTestOne").unwrap();
        let again = register_block_type("RT1", "RegistryTestOne").unwrap();
        assert_eq!(first, again);
        assert_eq!(first.name().as_deref(), Some("RegistryTestOne"));
    }

    #[test]
    fn test_register_block_type_conflict() {
        register_block_type("RT2", "RegistryTestTwo").unwrap();
        let result = register_block_type("RT2", "SomethingElse");
        assert!(matches!(result, Err(BlockStoreError::BlockTypeConflict { .. })));
    }
}
