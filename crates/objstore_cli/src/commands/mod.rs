//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod keys;
pub mod verify;

use objstore_core::{open_log_store, FaultInjector, LocalStore, StoreConfig, StoreResult};
use std::path::Path;
use std::sync::Arc;

/// Opens an existing log file; never creates one.
pub fn open_existing(path: &Path) -> StoreResult<LocalStore> {
    open_log_store(
        path,
        StoreConfig::default().create_if_missing(false),
        Arc::new(FaultInjector::new(false)),
    )
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
