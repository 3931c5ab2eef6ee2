//! In-memory backend for tests and ephemeral stores.

use crate::backend::{Backend, BackendKind, KeyIter};
use crate::error::{StoreError, StoreResult};
use crate::types::{KeySpace, ObjectKey, StoredObject};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

type SpaceMap = HashMap<ObjectKey, StoredObject>;

/// An in-memory backend.
///
/// Holds one map per key space, each behind its own coarse lock. Nothing is
/// durable: the contents vanish with the instance.
///
/// # Example
///
/// ```rust
/// use objstore_core::{Backend, KeySpace, MemoryBackend, ObjectKey};
///
/// let backend = MemoryBackend::new();
/// let key = ObjectKey::digest(b"hello");
/// backend.put(KeySpace::Blob, &key, b"hello").unwrap();
/// assert_eq!(&backend.get(KeySpace::Blob, &key).unwrap()[..], b"hello");
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    spaces: [Mutex<SpaceMap>; KeySpace::COUNT],
    closed: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            spaces: std::array::from_fn(|_| Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in `space`.
    #[must_use]
    pub fn len(&self, space: KeySpace) -> usize {
        self.spaces[space.index()].lock().len()
    }

    /// Returns `true` if no key space holds any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.iter().all(|space| space.lock().is_empty())
    }

    /// Total payload bytes across all key spaces.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.spaces
            .iter()
            .map(|space| {
                space
                    .lock()
                    .values()
                    .map(|payload| payload.len() as u64)
                    .sum::<u64>()
            })
            .sum()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("memory backend is closed"));
        }
        Ok(())
    }

    fn space(&self, space: KeySpace) -> &Mutex<SpaceMap> {
        &self.spaces[space.index()]
    }
}

impl Backend for MemoryBackend {
    fn get(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<StoredObject> {
        self.ensure_open()?;
        self.space(space)
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(space, key.clone()))
    }

    fn put(&self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        self.space(space)
            .lock()
            .entry(key.clone())
            .or_insert_with(|| StoredObject::copy_from_slice(payload));
        Ok(())
    }

    fn has(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.space(space).lock().contains_key(key))
    }

    fn put_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()> {
        self.ensure_open()?;
        // One lock acquisition for the whole batch keeps it atomic for readers.
        let mut map = self.space(space).lock();
        for (key, payload) in entries {
            map.entry(key.clone()).or_insert_with(|| payload.clone());
        }
        Ok(())
    }

    fn enumerate(&self, space: KeySpace) -> StoreResult<KeyIter> {
        self.ensure_open()?;
        let keys: Vec<ObjectKey> = self.space(space).lock().keys().cloned().collect();
        Ok(Box::new(keys.into_iter()))
    }

    fn clear(&self, space: KeySpace) -> StoreResult<()> {
        self.ensure_open()?;
        self.space(space).lock().clear();
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(data: &[u8]) -> ObjectKey {
        ObjectKey::digest(data)
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.total_bytes(), 0);
        assert_eq!(backend.kind(), BackendKind::Memory);
    }

    #[test]
    fn memory_put_then_get() {
        let backend = MemoryBackend::new();
        let k = key(b"hello");
        backend.put(KeySpace::Blob, &k, b"hello").unwrap();

        assert_eq!(&backend.get(KeySpace::Blob, &k).unwrap()[..], b"hello");
        assert!(backend.has(KeySpace::Blob, &k).unwrap());
        assert_eq!(backend.len(KeySpace::Blob), 1);
    }

    #[test]
    fn memory_missing_key_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get(KeySpace::Tree, &key(b"nope")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!backend.has(KeySpace::Tree, &key(b"nope")).unwrap());
    }

    #[test]
    fn memory_spaces_are_independent() {
        let backend = MemoryBackend::new();
        let k = key(b"shared");
        backend.put(KeySpace::Blob, &k, b"blob bytes").unwrap();
        backend.put(KeySpace::Tree, &k, b"tree bytes").unwrap();

        assert_eq!(&backend.get(KeySpace::Blob, &k).unwrap()[..], b"blob bytes");
        assert_eq!(&backend.get(KeySpace::Tree, &k).unwrap()[..], b"tree bytes");

        backend.clear(KeySpace::Blob).unwrap();
        assert!(!backend.has(KeySpace::Blob, &k).unwrap());
        assert!(backend.has(KeySpace::Tree, &k).unwrap());
    }

    #[test]
    fn memory_put_is_idempotent() {
        let backend = MemoryBackend::new();
        let k = key(b"same");
        backend.put(KeySpace::Blob, &k, b"same").unwrap();
        backend.put(KeySpace::Blob, &k, b"same").unwrap();
        assert_eq!(backend.len(KeySpace::Blob), 1);
        assert_eq!(backend.total_bytes(), 4);
    }

    #[test]
    fn memory_batch_and_enumerate() {
        let backend = MemoryBackend::new();
        let entries: Vec<_> = (0..5u8)
            .map(|i| (key(&[i]), StoredObject::from(vec![i; 3])))
            .collect();
        backend.put_batch(KeySpace::BlobMetadata, &entries).unwrap();

        let mut keys: Vec<_> = backend.enumerate(KeySpace::BlobMetadata).unwrap().collect();
        keys.sort();
        let mut expected: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn memory_enumerate_is_a_snapshot() {
        let backend = MemoryBackend::new();
        backend.put(KeySpace::Blob, &key(b"a"), b"a").unwrap();
        let iter = backend.enumerate(KeySpace::Blob).unwrap();
        backend.put(KeySpace::Blob, &key(b"b"), b"b").unwrap();
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn memory_closed_backend_is_unavailable() {
        let backend = MemoryBackend::new();
        backend.close().unwrap();
        let err = backend.has(KeySpace::Blob, &key(b"x")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BackendUnavailable);
    }
}
