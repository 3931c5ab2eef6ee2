//! The local object store facade.

use crate::backend::{Backend, BackendKind, KeyIter};
use crate::batch::WriteBatch;
use crate::cancel::{termination_point, CancelGuard};
use crate::config::StoreConfig;
use crate::error::{ErrorKind, StoreResult};
use crate::fault::{FaultInjector, FaultOp};
use crate::log::LogBackend;
use crate::memory::MemoryBackend;
use crate::stats::{StatsSnapshot, StoreStats};
use crate::types::{KeySpace, ObjectKey, StoredObject};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Content-addressed object store over a [`Backend`].
///
/// Every operation passes a termination point, then the fault injector, then
/// reaches the backend. Mutations run inside a [`CancelGuard`] so a worker
/// asked to terminate never stops halfway through a write.
///
/// `LocalStore` is `Send + Sync`; share it through an `Arc`.
///
/// # Example
///
/// ```rust
/// use objstore_core::{KeySpace, LocalStore, MemoryBackend};
///
/// let store = LocalStore::new(MemoryBackend::new());
/// let key = store.put_content(KeySpace::Tree, b"tree entries").unwrap();
/// assert!(store.has(KeySpace::Tree, &key).unwrap());
/// assert!(store.get(KeySpace::Blob, &key).unwrap_err().is_not_found());
/// ```
pub struct LocalStore {
    backend: Box<dyn Backend>,
    faults: Arc<FaultInjector>,
    stats: StoreStats,
}

impl LocalStore {
    /// Creates a store with a disabled fault injector.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_fault_injector(backend, Arc::new(FaultInjector::new(false)))
    }

    /// Creates a store that consults `faults` before every backend call.
    pub fn with_fault_injector(
        backend: impl Backend + 'static,
        faults: Arc<FaultInjector>,
    ) -> Self {
        Self::from_boxed(Box::new(backend), faults)
    }

    /// Creates a store over an already boxed backend.
    pub fn from_boxed(backend: Box<dyn Backend>, faults: Arc<FaultInjector>) -> Self {
        Self {
            backend,
            faults,
            stats: StoreStats::new(),
        }
    }

    /// Returns the payload stored under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `BackendUnavailable` or `Cancelled` from the
    /// backend, the fault injector or a pending termination.
    pub fn get(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<StoredObject> {
        let result = termination_point()
            .and_then(|()| self.faults.check(FaultOp::Read, Some(space), Some(key)))
            .and_then(|()| self.backend.get(space, key));
        match &result {
            Ok(payload) => self.stats.record_hit(payload.len() as u64),
            Err(e) if e.is_not_found() => self.stats.record_miss(),
            Err(e) => self.record_error(e.kind()),
        }
        result
    }

    /// Looks up several keys independently.
    ///
    /// Each key gets its own outcome, in input order; one failing key does
    /// not affect the others.
    pub fn get_multiple(
        &self,
        space: KeySpace,
        keys: &[ObjectKey],
    ) -> Vec<(ObjectKey, StoreResult<StoredObject>)> {
        keys.iter()
            .map(|key| (key.clone(), self.get(space, key)))
            .collect()
    }

    /// Stores `payload` under `key`. Writing an existing key is a no-op.
    ///
    /// # Errors
    ///
    /// On error the key is not visible to readers.
    pub fn put(&self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()> {
        let result = self.guarded(FaultOp::Write, space, Some(key), || {
            self.backend.put(space, key, payload)
        });
        if result.is_ok() {
            self.stats.record_put(payload.len() as u64);
        }
        result
    }

    /// Stores `payload` under its SHA-256 digest and returns the key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::put`].
    pub fn put_content(&self, space: KeySpace, payload: &[u8]) -> StoreResult<ObjectKey> {
        let key = ObjectKey::digest(payload);
        self.put(space, &key, payload)?;
        Ok(key)
    }

    /// Returns whether `key` is present.
    ///
    /// # Errors
    ///
    /// Fails on backend, injected or termination errors.
    pub fn has(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<bool> {
        let result = termination_point()
            .and_then(|()| self.faults.check(FaultOp::Has, Some(space), Some(key)))
            .and_then(|()| self.backend.has(space, key));
        match &result {
            Ok(_) => self.stats.record_has(),
            Err(e) => self.record_error(e.kind()),
        }
        result
    }

    /// Stores every entry as one atomic unit.
    ///
    /// The fault injector sees the batch as one `Write` call: the first rule
    /// matching any entry key applies once. If it fails, the backend is not
    /// called and nothing is written.
    ///
    /// # Errors
    ///
    /// On error no entry of the batch is visible.
    pub fn put_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()> {
        let result = termination_point()
            .and_then(|()| self.check_batch(space, entries))
            .and_then(|()| {
                let _guard = CancelGuard::enter();
                self.backend.put_batch(space, entries)
            });
        match &result {
            Ok(()) => {
                let bytes = entries.iter().map(|(_, p)| p.len() as u64).sum();
                self.stats.record_batch(entries.len() as u64, bytes);
            }
            Err(e) => self.record_error(e.kind()),
        }
        result
    }

    /// Returns a snapshot of the keys in `space`, in no particular order.
    ///
    /// # Errors
    ///
    /// Fails on backend, injected or termination errors.
    pub fn enumerate(&self, space: KeySpace) -> StoreResult<KeyIter> {
        let result = termination_point()
            .and_then(|()| self.faults.check(FaultOp::Enumerate, Some(space), None))
            .and_then(|()| self.backend.enumerate(space));
        match &result {
            Ok(_) => self.stats.record_enumeration(),
            Err(e) => self.record_error(e.kind()),
        }
        result
    }

    /// Starts a buffered write batch.
    ///
    /// The batch flushes itself once its buffered payload bytes exceed
    /// `buffer_size`; `0` disables the automatic flush.
    pub fn begin_write(&self, buffer_size: usize) -> WriteBatch<'_> {
        WriteBatch::new(self, buffer_size)
    }

    /// Removes every key of `space`.
    ///
    /// # Errors
    ///
    /// On error the space keeps its previous contents.
    pub fn clear_key_space(&self, space: KeySpace) -> StoreResult<()> {
        let result = self.guarded(FaultOp::Write, space, None, || self.backend.clear(space));
        if result.is_ok() {
            self.stats.record_clear();
            debug!(%space, "cleared key space");
        }
        result
    }

    /// Clears every ephemeral key space, leaving persistent ones intact.
    ///
    /// # Errors
    ///
    /// Stops at the first space that fails to clear.
    pub fn clear_caches(&self) -> StoreResult<()> {
        for space in KeySpace::ALL.into_iter().filter(|s| s.is_ephemeral()) {
            self.clear_key_space(space)?;
        }
        info!(backend = %self.backend.kind(), "cleared caches");
        Ok(())
    }

    /// Reclaims space held by removed entries.
    ///
    /// # Errors
    ///
    /// On error the backend keeps its previous contents.
    pub fn compact(&self) -> StoreResult<()> {
        let result = termination_point()
            .and_then(|()| self.faults.check(FaultOp::Write, None, None))
            .and_then(|()| {
                let _guard = CancelGuard::enter();
                self.backend.compact()
            });
        match &result {
            Ok(()) => self.stats.record_compaction(),
            Err(e) => self.record_error(e.kind()),
        }
        result
    }

    /// Clears every ephemeral key space, then compacts.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn clear_caches_and_compact_all(&self) -> StoreResult<()> {
        self.clear_caches()?;
        self.compact()
    }

    /// Flushes and closes the backend. Later operations fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(&self) -> StoreResult<()> {
        let _guard = CancelGuard::enter();
        self.backend.close()
    }

    /// Returns a snapshot of the store's counters.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.faults_injected = self.faults.fired_count();
        snapshot
    }

    /// Which backend implementation serves this store.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The injector consulted by this store.
    pub fn fault_injector(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    fn guarded(
        &self,
        op: FaultOp,
        space: KeySpace,
        key: Option<&ObjectKey>,
        mutation: impl FnOnce() -> StoreResult<()>,
    ) -> StoreResult<()> {
        let result = termination_point()
            .and_then(|()| self.faults.check(op, Some(space), key))
            .and_then(|()| {
                let _guard = CancelGuard::enter();
                mutation()
            });
        if let Err(e) = &result {
            self.record_error(e.kind());
        }
        result
    }

    fn check_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()> {
        let keys: Vec<&ObjectKey> = entries.iter().map(|(key, _)| key).collect();
        self.faults.check_keys(FaultOp::Write, Some(space), &keys)
    }

    fn record_error(&self, kind: ErrorKind) {
        self.stats.record_error(kind == ErrorKind::Cancelled);
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("backend", &self.backend.kind())
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

/// Opens a store over a fresh [`MemoryBackend`].
pub fn open_memory_store(faults: Arc<FaultInjector>) -> LocalStore {
    LocalStore::with_fault_injector(MemoryBackend::new(), faults)
}

/// Opens a store over a [`LogBackend`] at `path`.
///
/// # Errors
///
/// Returns `BackendUnavailable` if the file cannot be opened or is corrupt.
pub fn open_log_store(
    path: impl AsRef<Path>,
    config: StoreConfig,
    faults: Arc<FaultInjector>,
) -> StoreResult<LocalStore> {
    let backend = LogBackend::open(path, config)?;
    Ok(LocalStore::with_fault_injector(backend, faults))
}
