//! # objstore core
//!
//! A content-addressed local object store with pluggable backends.
//!
//! Objects are immutable byte payloads identified by an [`ObjectKey`],
//! usually the SHA-256 digest of the payload, and partitioned into
//! [`KeySpace`]s. The [`LocalStore`] facade fronts one [`Backend`]:
//!
//! - [`MemoryBackend`] - process-local maps for tests and ephemeral stores
//! - [`LogBackend`] - a durable append-only log file with atomic batches
//!
//! The store cooperates with two test-oriented mechanisms:
//!
//! - a [`FaultInjector`] that can delay, fail or park calls before they
//!   reach the backend
//! - the [`cancel`] module, which defers termination of worker threads
//!   while a mutation is in flight
//!
//! ## Example
//!
//! ```rust
//! use objstore_core::{KeySpace, LocalStore, MemoryBackend};
//!
//! let store = LocalStore::new(MemoryBackend::new());
//! let key = store.put_content(KeySpace::Blob, b"hello world").unwrap();
//! assert_eq!(&store.get(KeySpace::Blob, &key).unwrap()[..], b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
pub mod cancel;
mod config;
mod error;
mod fault;
pub mod log;
mod memory;
mod stats;
mod store;
mod types;

pub use backend::{Backend, BackendKind, KeyIter};
pub use batch::WriteBatch;
pub use config::StoreConfig;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use fault::{
    BlockedCall, BlockedId, FaultAction, FaultId, FaultInjector, FaultKind, FaultOp, FaultRule,
    KeyMatch,
};
pub use log::{LogBackend, SpaceStats, VerifyReport};
pub use memory::MemoryBackend;
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{open_log_store, open_memory_store, LocalStore};
pub use types::{KeySpace, ObjectKey, Persistence, StoredObject};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
