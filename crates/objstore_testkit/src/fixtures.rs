//! Store fixtures with automatic cleanup.
//!
//! Every factory returns a [`StoreParts`]: the store plus the temporary
//! directory backing it, if any. Dropping the parts removes the directory.

use objstore_core::{
    open_log_store, open_memory_store, BackendKind, FaultInjector, LocalStore, StoreConfig,
    StoreError, StoreResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// File name of the log store inside its temporary directory.
pub const LOG_FILE_NAME: &str = "objects.log";

/// Builds a store wired to the given fault injector.
pub type StoreFactory = fn(Arc<FaultInjector>) -> StoreResult<StoreParts>;

/// A store and the resources that keep it alive.
pub struct StoreParts {
    /// Directory holding the backing file; `None` for in-memory stores.
    pub temp_dir: Option<TempDir>,
    /// The store under test.
    pub store: LocalStore,
    pub(crate) path: Option<PathBuf>,
}

impl StoreParts {
    /// Path of the backing file, if the store is durable.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` if the store survives [`Self::reopen`].
    pub fn is_durable(&self) -> bool {
        self.store.backend_kind() == BackendKind::Log
    }

    /// Closes the store and opens the same file again with the same
    /// fault injector.
    ///
    /// # Errors
    ///
    /// Fails for in-memory stores, or if the file cannot be reopened.
    pub fn reopen(self) -> StoreResult<Self> {
        let Some(path) = self.path else {
            return Err(StoreError::unavailable("in-memory stores cannot be reopened"));
        };
        let faults = Arc::clone(self.store.fault_injector());
        self.store.close()?;
        drop(self.store);

        let config = StoreConfig::default().create_if_missing(false);
        let store = open_log_store(&path, config, faults)?;
        Ok(Self {
            temp_dir: self.temp_dir,
            store,
            path: Some(path),
        })
    }
}

impl std::ops::Deref for StoreParts {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::fmt::Debug for StoreParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreParts")
            .field("store", &self.store)
            .field("path", &self.path)
            .finish()
    }
}

/// Creates an in-memory store.
pub fn make_memory_store(faults: Arc<FaultInjector>) -> StoreResult<StoreParts> {
    Ok(StoreParts {
        temp_dir: None,
        store: open_memory_store(faults),
        path: None,
    })
}

/// Creates a log store in a fresh temporary directory.
pub fn make_log_store(faults: Arc<FaultInjector>) -> StoreResult<StoreParts> {
    make_log_store_with(StoreConfig::default(), faults)
}

/// Creates a log store with a custom configuration.
pub fn make_log_store_with(
    config: StoreConfig,
    faults: Arc<FaultInjector>,
) -> StoreResult<StoreParts> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(LOG_FILE_NAME);
    let store = open_log_store(&path, config, faults)?;
    Ok(StoreParts {
        temp_dir: Some(temp_dir),
        store,
        path: Some(path),
    })
}

/// Every factory, paired with a name for reporting.
pub fn all_factories() -> [(&'static str, StoreFactory); 2] {
    [
        ("memory", make_memory_store as StoreFactory),
        ("log", make_log_store as StoreFactory),
    ]
}

/// A fault injector that is switched on.
pub fn enabled_faults() -> Arc<FaultInjector> {
    Arc::new(FaultInjector::new(true))
}
