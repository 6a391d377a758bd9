//! Entry and key traits

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// An ordered key
pub trait TreeKey: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

impl<K> TreeKey for K where K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

/// A value stored in a tree, ordered by the key derived from it.
///
/// The key type's `Ord` is the tree's comparator; wrap keys in a newtype
/// (for example [`std::cmp::Reverse`]) for a different order.
pub trait TreeEntry: Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static {
    type Key: TreeKey;

    /// Derive the entry's key
    fn key(&self) -> Self::Key;
}

macro_rules! self_keyed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TreeEntry for $ty {
                type Key = $ty;

                fn key(&self) -> Self::Key {
                    self.clone()
                }
            }
        )*
    };
}

self_keyed!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, String);

/// Key/value pairs are ordered by their first element
impl<K, V> TreeEntry for (K, V)
where
    K: TreeKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + Debug + 'static,
{
    type Key = K;

    fn key(&self) -> Self::Key {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_keyed_entries() {
        assert_eq!(42i64.key(), 42);
        assert_eq!("abc".to_string().key(), "abc");
    }

    #[test]
    fn test_pair_entries_key_on_first() {
        let entry = ("k".to_string(), vec![1u8, 2]);
        assert_eq!(entry.key(), "k");
    }
}
