//! Positional deltas applied to named block fields
//!
//! A [`BlockOperation`] is the only way an engine mutates a stored block. The
//! store can apply it to its own copy, log it, or replicate it. The
//! [`apply_splice`] and [`apply_set`] helpers send the operation to the store
//! and then mirror it on the caller's typed copy of the block.

use crate::{BlockId, BlockStore, BlockStoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A delta against one named field of a block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BlockOperation {
    /// Replace `delete_count` items at `index` of an array field with `inserted`
    #[serde(rename_all = "camelCase")]
    Splice {
        field: String,
        index: usize,
        delete_count: usize,
        inserted: Vec<Value>,
    },
    /// Replace the value of a field
    Set { field: String, value: Value },
}

impl BlockOperation {
    /// Create a splice operation
    pub fn splice(
        field: impl Into<String>,
        index: usize,
        delete_count: usize,
        inserted: Vec<Value>,
    ) -> Self {
        BlockOperation::Splice {
            field: field.into(),
            index,
            delete_count,
            inserted,
        }
    }

    /// Create a set operation
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        BlockOperation::Set {
            field: field.into(),
            value,
        }
    }

    /// The field this operation targets
    pub fn field(&self) -> &str {
        match self {
            BlockOperation::Splice { field, .. } | BlockOperation::Set { field, .. } => field,
        }
    }

    /// Apply this operation to a block's serialized form
    pub fn apply_to(&self, block: &mut Value) -> Result<()> {
        let object = block.as_object_mut().ok_or_else(|| {
            BlockStoreError::InvalidOperation("block is not an object".to_string())
        })?;

        match self {
            BlockOperation::Splice {
                field,
                index,
                delete_count,
                inserted,
            } => {
                let array = object
                    .get_mut(field)
                    .and_then(Value::as_array_mut)
                    .ok_or_else(|| {
                        BlockStoreError::InvalidOperation(format!("field `{field}` is not an array"))
                    })?;
                let end = checked_splice_end(array.len(), *index, *delete_count)?;
                array.splice(*index..end, inserted.iter().cloned());
            }
            BlockOperation::Set { field, value } => {
                object.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }
}

fn checked_splice_end(len: usize, index: usize, delete_count: usize) -> Result<usize> {
    index
        .checked_add(delete_count)
        .filter(|end| *end <= len)
        .ok_or_else(|| {
            BlockStoreError::InvalidOperation(format!(
                "splice of {delete_count} at {index} out of bounds for length {len}"
            ))
        })
}

/// Splice an array field of a stored block and mirror the change locally.
///
/// `items` is the caller's copy of the field. The store is updated first, so
/// a failed store write leaves `items` untouched. Returns the removed items.
pub async fn apply_splice<S, T>(
    store: &S,
    id: &BlockId,
    field: &str,
    items: &mut Vec<T>,
    index: usize,
    delete_count: usize,
    inserted: Vec<T>,
) -> Result<Vec<T>>
where
    S: BlockStore + ?Sized,
    T: Serialize,
{
    let end = checked_splice_end(items.len(), index, delete_count)?;
    let values = inserted
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    store
        .apply(id, &BlockOperation::splice(field, index, delete_count, values))
        .await?;

    Ok(items.splice(index..end, inserted).collect())
}

/// Set a field of a stored block and mirror the change locally.
///
/// Returns the previous local value.
pub async fn apply_set<S, T>(store: &S, id: &BlockId, field: &str, slot: &mut T, value: T) -> Result<T>
where
    S: BlockStore + ?Sized,
    T: Serialize,
{
    let serialized = serde_json::to_value(&value)?;
    store.apply(id, &BlockOperation::set(field, serialized)).await?;
    Ok(std::mem::replace(slot, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_splice_insert_and_delete() {
        let mut block = json!({ "entries": [1, 2, 3] });
        BlockOperation::splice("entries", 1, 1, vec![json!(7), json!(8)])
            .apply_to(&mut block)
            .unwrap();
        assert_eq!(block, json!({ "entries": [1, 7, 8, 3] }));
    }

    #[test]
    fn test_splice_append_at_end() {
        let mut block = json!({ "entries": [] });
        BlockOperation::splice("entries", 0, 0, vec![json!("a")])
            .apply_to(&mut block)
            .unwrap();
        assert_eq!(block["entries"], json!(["a"]));
    }

    #[test]
    fn test_splice_out_of_bounds() {
        let mut block = json!({ "entries": [1] });
        let result = BlockOperation::splice("entries", 1, 1, vec![]).apply_to(&mut block);
        assert!(matches!(result, Err(BlockStoreError::InvalidOperation(_))));
        assert_eq!(block, json!({ "entries": [1] }));
    }

    #[test]
    fn test_splice_non_array_field() {
        let mut block = json!({ "rootId": "x" });
        let result = BlockOperation::splice("rootId", 0, 0, vec![]).apply_to(&mut block);
        assert!(matches!(result, Err(BlockStoreError::InvalidOperation(_))));
    }

    #[test]
    fn test_set_creates_or_replaces() {
        let mut block = json!({ "rootId": "a" });
        BlockOperation::set("rootId", json!("b")).apply_to(&mut block).unwrap();
        BlockOperation::set("otherRoot", json!("c")).apply_to(&mut block).unwrap();
        assert_eq!(block, json!({ "rootId": "b", "otherRoot": "c" }));
    }

    #[test]
    fn test_operation_wire_format() {
        let op = BlockOperation::splice("nodes", 2, 0, vec![json!("id")]);
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({ "op": "splice", "field": "nodes", "index": 2, "deleteCount": 0, "inserted": ["id"] })
        );
    }

    proptest! {
        /// A stored splice agrees with `Vec::splice` on the same array
        #[test]
        fn prop_splice_matches_vec(
            items in proptest::collection::vec(any::<i32>(), 0..20),
            index in 0usize..24,
            delete_count in 0usize..6,
            inserted in proptest::collection::vec(any::<i32>(), 0..5),
        ) {
            let mut block = json!({ "entries": items });
            let values = inserted.iter().map(|v| json!(v)).collect();
            let result = BlockOperation::splice("entries", index, delete_count, values).apply_to(&mut block);

            if index + delete_count <= items.len() {
                prop_assert!(result.is_ok());
                let mut expected = items.clone();
                expected.splice(index..index + delete_count, inserted.iter().copied());
                prop_assert_eq!(&block["entries"], &json!(expected));
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(&block["entries"], &json!(items));
            }
        }
    }
}
