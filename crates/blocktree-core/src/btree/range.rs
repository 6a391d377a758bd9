//! Ordered iteration and counting

use super::{BTree, Path, TreeEntry, TreeTrunk};
use crate::{CoreError, Result};
use blocktree_store::BlockStore;
use futures::stream::{self, Stream, TryStreamExt};

/// One end of a key range
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBound<K> {
    pub key: K,
    pub inclusive: bool,
}

impl<K> KeyBound<K> {
    /// Bound that includes `key`
    pub fn inclusive(key: K) -> Self {
        Self { key, inclusive: true }
    }

    /// Bound that excludes `key`
    pub fn exclusive(key: K) -> Self {
        Self { key, inclusive: false }
    }
}

/// A key interval and an iteration direction.
///
/// `first` is the low end and `last` the high end in key order regardless of
/// direction; a descending range starts at `last`. A missing bound is open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange<K> {
    pub first: Option<KeyBound<K>>,
    pub last: Option<KeyBound<K>>,
    pub ascending: bool,
}

impl<K: Ord> KeyRange<K> {
    pub fn new(first: Option<KeyBound<K>>, last: Option<KeyBound<K>>, ascending: bool) -> Self {
        Self { first, last, ascending }
    }

    /// Every key, in the given direction
    pub fn all(ascending: bool) -> Self {
        Self::new(None, None, ascending)
    }

    /// Bound the iteration starts from
    fn start(&self) -> Option<&KeyBound<K>> {
        if self.ascending {
            self.first.as_ref()
        } else {
            self.last.as_ref()
        }
    }

    /// Whether `key` has not yet passed the bound the iteration ends at
    fn before_end(&self, key: &K) -> bool {
        let (end, passed) = if self.ascending {
            match &self.last {
                Some(end) => (end, key > &end.key),
                None => return true,
            }
        } else {
            match &self.first {
                Some(end) => (end, key < &end.key),
                None => return true,
            }
        };
        !passed && (end.inclusive || key != &end.key)
    }
}

impl<E, S, T> BTree<E, S, T>
where
    E: TreeEntry,
    S: BlockStore,
    T: TreeTrunk,
{
    /// Paths from `from` towards the last entry.
    ///
    /// An off `from` starts at the entry after its crack. The stream fails
    /// with [`CoreError::InvalidPath`] if the tree is mutated while it is
    /// being consumed.
    pub fn ascending(&self, from: Path) -> impl Stream<Item = Result<Path>> + '_ {
        self.walk(from, true)
    }

    /// Paths from `from` towards the first entry
    pub fn descending(&self, from: Path) -> impl Stream<Item = Result<Path>> + '_ {
        self.walk(from, false)
    }

    fn walk(&self, from: Path, ascending: bool) -> impl Stream<Item = Result<Path>> + '_ {
        stream::try_unfold((from, false), move |(mut path, started)| async move {
            if started || !path.on {
                self.step(&mut path, ascending).await?;
            } else {
                self.validate(&path)?;
            }
            if !path.on {
                return Ok(None);
            }
            Ok::<_, CoreError>(Some((path.clone(), (path, true))))
        })
    }

    /// Paths of the entries within `range`, in its direction
    pub fn range(&self, range: KeyRange<E::Key>) -> impl Stream<Item = Result<Path>> + '_ {
        stream::try_unfold((range, None::<Path>), move |(range, cursor)| async move {
            let path = match cursor {
                None => self.range_start(&range).await?,
                Some(mut path) => {
                    self.step(&mut path, range.ascending).await?;
                    path
                }
            };
            let entry = match self.at(&path).await? {
                Some(entry) => entry,
                None => return Ok(None),
            };
            if !range.before_end(&entry.key()) {
                return Ok(None);
            }
            Ok::<_, CoreError>(Some((path.clone(), (range, Some(path)))))
        })
    }

    /// Collect the entries within `range`
    pub async fn range_entries(&self, range: KeyRange<E::Key>) -> Result<Vec<E>> {
        let paths: Vec<Path> = self.range(range).try_collect().await?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(entry) = self.at(path).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn range_start(&self, range: &KeyRange<E::Key>) -> Result<Path> {
        let Some(bound) = range.start() else {
            return if range.ascending { self.first().await } else { self.last().await };
        };
        let mut path = self.find(&bound.key).await?;
        if !path.on || !bound.inclusive {
            self.step(&mut path, range.ascending).await?;
        }
        Ok(path)
    }

    async fn step(&self, path: &mut Path, ascending: bool) -> Result<()> {
        if ascending {
            self.move_next(path).await
        } else {
            self.move_prior(path).await
        }
    }

    /// Count entries from `from` (or the first/last entry) to the end in the
    /// given direction, including `from` when it is on.
    ///
    /// Walks the leaves, summing their lengths.
    pub async fn get_count(&self, from: Option<&Path>, ascending: bool) -> Result<usize> {
        let path = match from {
            Some(path) => {
                self.validate(path)?;
                path.clone()
            }
            None if ascending => self.first().await?,
            None => self.last().await?,
        };

        let leaf = self.leaf(&path.leaf_id).await?;
        let mut count = if ascending {
            leaf.len().saturating_sub(path.leaf_index)
        } else if path.on {
            path.leaf_index + 1
        } else {
            path.leaf_index
        };

        let mut current = path;
        while let Some(adjacent) = self.adjacent_leaf(&current, ascending).await? {
            count += self.leaf(&adjacent.leaf_id).await?.len();
            current = adjacent;
        }
        Ok(count)
    }
}
