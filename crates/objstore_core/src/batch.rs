//! Buffered writes across key spaces.

use crate::error::StoreResult;
use crate::store::LocalStore;
use crate::types::{KeySpace, ObjectKey, StoredObject};
use std::collections::BTreeMap;
use tracing::warn;

/// A buffer of puts that is written with one `put_batch` per key space.
///
/// Created by [`LocalStore::begin_write`]. Dropping a batch with unflushed
/// entries discards them.
///
/// ```rust
/// use objstore_core::{KeySpace, LocalStore, MemoryBackend};
///
/// let store = LocalStore::new(MemoryBackend::new());
/// let mut batch = store.begin_write(0);
/// let blob = batch.put_content(KeySpace::Blob, b"contents").unwrap();
/// let tree = batch.put_content(KeySpace::Tree, b"listing").unwrap();
/// assert!(!store.has(KeySpace::Blob, &blob).unwrap());
///
/// batch.flush().unwrap();
/// assert!(store.has(KeySpace::Blob, &blob).unwrap());
/// assert!(store.has(KeySpace::Tree, &tree).unwrap());
/// ```
#[must_use = "buffered writes are discarded unless flushed"]
pub struct WriteBatch<'a> {
    store: &'a LocalStore,
    buffer_size: usize,
    pending: BTreeMap<KeySpace, Vec<(ObjectKey, StoredObject)>>,
    pending_bytes: usize,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(store: &'a LocalStore, buffer_size: usize) -> Self {
        Self {
            store,
            buffer_size,
            pending: BTreeMap::new(),
            pending_bytes: 0,
        }
    }

    /// Buffers a put, flushing if the buffer limit is exceeded.
    ///
    /// # Errors
    ///
    /// Returns the error of an automatic flush.
    pub fn put(&mut self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()> {
        self.pending
            .entry(space)
            .or_default()
            .push((key.clone(), StoredObject::copy_from_slice(payload)));
        self.pending_bytes += payload.len();
        if self.buffer_size > 0 && self.pending_bytes > self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Buffers `payload` under its digest and returns the key.
    ///
    /// # Errors
    ///
    /// Returns the error of an automatic flush.
    pub fn put_content(&mut self, space: KeySpace, payload: &[u8]) -> StoreResult<ObjectKey> {
        let key = ObjectKey::digest(payload);
        self.put(space, &key, payload)?;
        Ok(key)
    }

    /// Writes every buffered entry, one batch per key space in tag order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing key space. Spaces written before it stay
    /// written; the failing space and those after it stay buffered.
    pub fn flush(&mut self) -> StoreResult<()> {
        while let Some((space, entries)) = self.pending.pop_first() {
            let bytes: usize = entries.iter().map(|(_, p)| p.len()).sum();
            if let Err(e) = self.store.put_batch(space, &entries) {
                self.pending.insert(space, entries);
                return Err(e);
            }
            self.pending_bytes -= bytes;
        }
        Ok(())
    }

    /// Drops every buffered entry without writing it.
    pub fn discard(mut self) {
        self.pending.clear();
        self.pending_bytes = 0;
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffered payload bytes.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }
}

impl Drop for WriteBatch<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                entries = self.len(),
                bytes = self.pending_bytes,
                "discarding unflushed write batch"
            );
        }
    }
}

impl std::fmt::Debug for WriteBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("buffer_size", &self.buffer_size)
            .field("entries", &self.len())
            .field("pending_bytes", &self.pending_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultInjector, FaultKind, FaultOp, KeyMatch};
    use crate::memory::MemoryBackend;
    use crate::store::open_memory_store;
    use std::sync::Arc;

    #[test]
    fn nothing_visible_before_flush() {
        let store = LocalStore::new(MemoryBackend::new());
        let mut batch = store.begin_write(0);
        let key = batch.put_content(KeySpace::Blob, b"buffered").unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.pending_bytes(), 8);
        assert!(!store.has(KeySpace::Blob, &key).unwrap());

        batch.flush().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.pending_bytes(), 0);
        assert!(store.has(KeySpace::Blob, &key).unwrap());
    }

    #[test]
    fn auto_flush_past_buffer_size() {
        let store = LocalStore::new(MemoryBackend::new());
        let mut batch = store.begin_write(10);
        let first = batch.put_content(KeySpace::Blob, b"123456").unwrap();
        assert!(!store.has(KeySpace::Blob, &first).unwrap());

        // 12 buffered bytes exceed the limit of 10.
        let second = batch.put_content(KeySpace::Blob, b"abcdef").unwrap();
        assert!(batch.is_empty());
        assert!(store.has(KeySpace::Blob, &first).unwrap());
        assert!(store.has(KeySpace::Blob, &second).unwrap());
        assert_eq!(store.stats().batches, 1);
    }

    #[test]
    fn one_batch_per_key_space() {
        let store = LocalStore::new(MemoryBackend::new());
        let mut batch = store.begin_write(0);
        batch.put_content(KeySpace::Tree, b"t1").unwrap();
        batch.put_content(KeySpace::Blob, b"b1").unwrap();
        batch.put_content(KeySpace::Tree, b"t2").unwrap();
        batch.flush().unwrap();

        let stats = store.stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.puts, 3);
    }

    #[test]
    fn failed_flush_keeps_unwritten_spaces() {
        let faults = Arc::new(FaultInjector::new(true));
        let store = open_memory_store(Arc::clone(&faults));
        let mut batch = store.begin_write(0);
        let blob = batch.put_content(KeySpace::Blob, b"blob").unwrap();
        let tree = batch.put_content(KeySpace::Tree, b"tree").unwrap();

        faults.inject_error(
            FaultOp::Write,
            KeyMatch::Exact(tree.clone()),
            FaultKind::BackendUnavailable,
            Some(1),
        );
        assert!(batch.flush().is_err());
        assert!(store.has(KeySpace::Blob, &blob).unwrap());
        assert!(!store.has(KeySpace::Tree, &tree).unwrap());
        assert_eq!(batch.len(), 1);

        batch.flush().unwrap();
        assert!(store.has(KeySpace::Tree, &tree).unwrap());
    }

    #[test]
    fn dropped_batch_is_discarded() {
        let store = LocalStore::new(MemoryBackend::new());
        let key = {
            let mut batch = store.begin_write(0);
            batch.put_content(KeySpace::Blob, b"lost").unwrap()
        };
        assert!(!store.has(KeySpace::Blob, &key).unwrap());

        let mut batch = store.begin_write(0);
        batch.put_content(KeySpace::Blob, b"also lost").unwrap();
        batch.discard();
        assert!(store.enumerate(KeySpace::Blob).unwrap().next().is_none());
    }
}
