//! Backend trait definition.

use crate::error::StoreResult;
use crate::types::{KeySpace, ObjectKey, StoredObject};
use std::fmt;

/// Lazy sequence of keys produced by [`Backend::enumerate`].
pub type KeyIter = Box<dyn Iterator<Item = ObjectKey> + Send>;

/// Which implementation sits behind a [`Backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Process-local, non-durable maps.
    Memory,
    /// Durable append-only log file with atomic transactions.
    Log,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Log => f.write_str("log"),
        }
    }
}

/// A key/value backend for the object store.
///
/// Backends are opaque byte stores scoped by [`KeySpace`]. Payloads are
/// immutable: because a key is derived from its payload, writing an existing
/// key again never changes what readers observe.
///
/// # Invariants
///
/// - `has` agrees with whether `get` would succeed at the same instant
/// - `put` and `put_batch` are idempotent
/// - `put_batch` is all-or-nothing for concurrent readers of the space
/// - `enumerate` yields a point-in-time snapshot of the space
/// - Errors are always returned to the caller; backends never retry
///
/// # Implementors
///
/// - [`crate::MemoryBackend`] - For tests and ephemeral stores
/// - [`crate::LogBackend`] - For durable storage
pub trait Backend: Send + Sync {
    /// Returns the payload stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent, `BackendUnavailable` on I/O
    /// failure.
    fn get(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<StoredObject>;

    /// Stores `payload` under `key`. A no-op if the key is already present.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the write cannot be made durable.
    fn put(&self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()>;

    /// Returns whether `key` is present.
    ///
    /// # Errors
    ///
    /// Fails only on unrecoverable backend errors.
    fn has(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<bool>;

    /// Stores every entry of `entries` as one atomic unit.
    ///
    /// # Errors
    ///
    /// On error no entry of the batch is visible.
    fn put_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()>;

    /// Returns the keys currently present in `space`.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the backend is closed.
    fn enumerate(&self, space: KeySpace) -> StoreResult<KeyIter>;

    /// Removes every key in `space` as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the removal cannot be made durable.
    fn clear(&self, space: KeySpace) -> StoreResult<()>;

    /// Reclaims space held by removed entries.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` on I/O failure; the backend keeps its
    /// previous contents.
    fn compact(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Flushes and releases backend resources.
    ///
    /// Operations after `close` fail with `BackendUnavailable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&self) -> StoreResult<()>;

    /// Identifies the implementation.
    fn kind(&self) -> BackendKind;
}
