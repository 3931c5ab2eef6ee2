//! In-memory index of committed values in the log file.

use crate::types::{KeySpace, ObjectKey};
use std::collections::HashMap;

/// Where a committed value lives in the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValueLocation {
    pub(crate) offset: u64,
    pub(crate) len: u32,
}

/// One operation of a committed transaction, ready to be applied.
#[derive(Debug, Clone)]
pub(crate) enum IndexOp {
    Put {
        space: KeySpace,
        key: ObjectKey,
        location: ValueLocation,
    },
    Clear(KeySpace),
}

impl IndexOp {
    /// Shifts a put location recorded relative to a transaction image to
    /// its absolute file offset.
    pub(crate) fn rebased(self, base: u64) -> Self {
        match self {
            Self::Put {
                space,
                key,
                location,
            } => Self::Put {
                space,
                key,
                location: ValueLocation {
                    offset: base + location.offset,
                    len: location.len,
                },
            },
            clear @ Self::Clear(_) => clear,
        }
    }
}

/// Per key space map from key to value location.
#[derive(Debug, Default)]
pub(crate) struct Index {
    spaces: [HashMap<ObjectKey, ValueLocation>; KeySpace::COUNT],
}

impl Index {
    pub(crate) fn get(&self, space: KeySpace, key: &ObjectKey) -> Option<ValueLocation> {
        self.spaces[space.index()].get(key).copied()
    }

    pub(crate) fn contains(&self, space: KeySpace, key: &ObjectKey) -> bool {
        self.spaces[space.index()].contains_key(key)
    }

    pub(crate) fn keys(&self, space: KeySpace) -> Vec<ObjectKey> {
        self.spaces[space.index()].keys().cloned().collect()
    }

    pub(crate) fn entries(
        &self,
        space: KeySpace,
    ) -> impl Iterator<Item = (&ObjectKey, &ValueLocation)> {
        self.spaces[space.index()].iter()
    }

    pub(crate) fn len(&self, space: KeySpace) -> usize {
        self.spaces[space.index()].len()
    }

    pub(crate) fn bytes(&self, space: KeySpace) -> u64 {
        self.spaces[space.index()]
            .values()
            .map(|location| u64::from(location.len))
            .sum()
    }

    pub(crate) fn total_entries(&self) -> usize {
        self.spaces.iter().map(HashMap::len).sum()
    }

    /// Applies the operations of one committed transaction, in order.
    pub(crate) fn apply(&mut self, ops: impl IntoIterator<Item = IndexOp>) {
        for op in ops {
            match op {
                IndexOp::Put {
                    space,
                    key,
                    location,
                } => {
                    // Equal keys carry equal payloads; the first copy stays.
                    self.spaces[space.index()].entry(key).or_insert(location);
                }
                IndexOp::Clear(space) => self.spaces[space.index()].clear(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(space: KeySpace, key: &[u8], offset: u64) -> IndexOp {
        IndexOp::Put {
            space,
            key: ObjectKey::from_bytes(key).unwrap(),
            location: ValueLocation { offset, len: 4 },
        }
    }

    #[test]
    fn first_location_wins() {
        let mut index = Index::default();
        index.apply([put(KeySpace::Blob, b"k", 10), put(KeySpace::Blob, b"k", 99)]);
        let key = ObjectKey::from_bytes(b"k").unwrap();
        assert_eq!(index.get(KeySpace::Blob, &key).unwrap().offset, 10);
        assert_eq!(index.total_entries(), 1);
    }

    #[test]
    fn clear_then_put_in_one_transaction() {
        let mut index = Index::default();
        index.apply([put(KeySpace::Tree, b"old", 10)]);
        index.apply([IndexOp::Clear(KeySpace::Tree), put(KeySpace::Tree, b"new", 20)]);

        assert_eq!(index.len(KeySpace::Tree), 1);
        assert!(index.contains(KeySpace::Tree, &ObjectKey::from_bytes(b"new").unwrap()));
        assert_eq!(index.bytes(KeySpace::Tree), 4);
    }
}
