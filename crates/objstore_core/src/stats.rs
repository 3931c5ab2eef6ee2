//! Store statistics.
//!
//! Counters are updated by [`crate::LocalStore`] on every operation and can
//! be read while operations are in progress.
//!
//! ```rust
//! use objstore_core::{KeySpace, LocalStore, MemoryBackend};
//!
//! let store = LocalStore::new(MemoryBackend::new());
//! store.put_content(KeySpace::Blob, b"payload").unwrap();
//!
//! let stats = store.stats();
//! assert_eq!(stats.puts, 1);
//! assert_eq!(stats.bytes_written, 7);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of one store instance.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Reads
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_read: AtomicU64,
    has_checks: AtomicU64,
    enumerations: AtomicU64,

    // Writes
    puts: AtomicU64,
    batches: AtomicU64,
    bytes_written: AtomicU64,
    clears: AtomicU64,
    compactions: AtomicU64,

    // Failures
    errors: AtomicU64,
    cancellations: AtomicU64,
}

impl StoreStats {
    /// Creates a zeroed stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self, bytes: u64) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_has(&self) {
        self.has_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enumeration(&self) {
        self.enumerations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self, bytes: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a batch of `entries` puts totalling `bytes`.
    pub(crate) fn record_batch(&self, entries: u64, bytes: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(entries, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed operation; cancellations are also counted apart.
    pub(crate) fn record_error(&self, cancelled: bool) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if cancelled {
            self.cancellations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the number of `get` calls that reached the backend.
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Returns the number of successful gets.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of gets that found no entry.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the total number of failed operations, misses excluded.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    ///
    /// `faults_injected` is filled in by the store from its injector.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets(),
            hits: self.hits(),
            misses: self.misses(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            has_checks: self.has_checks.load(Ordering::Relaxed),
            enumerations: self.enumerations.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            errors: self.errors(),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            faults_injected: 0,
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Gets that reached the backend.
    pub gets: u64,
    /// Gets that returned a payload.
    pub hits: u64,
    /// Gets that found no entry.
    pub misses: u64,
    /// Payload bytes returned by gets.
    pub bytes_read: u64,
    /// `has` calls.
    pub has_checks: u64,
    /// Enumerations started.
    pub enumerations: u64,
    /// Entries written, batched or not.
    pub puts: u64,
    /// Batches written.
    pub batches: u64,
    /// Payload bytes handed to the backend.
    pub bytes_written: u64,
    /// Key spaces cleared.
    pub clears: u64,
    /// Compactions run.
    pub compactions: u64,
    /// Failed operations, misses excluded.
    pub errors: u64,
    /// Failed operations that were cancellations.
    pub cancellations: u64,
    /// Faults fired by the store's injector.
    pub faults_injected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StoreStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn hits_and_misses_both_count_as_gets() {
        let stats = StoreStats::new();
        stats.record_hit(10);
        stats.record_hit(5);
        stats.record_miss();

        let snap = stats.snapshot();
        assert_eq!(snap.gets, 3);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.bytes_read, 15);
    }

    #[test]
    fn batches_count_their_entries() {
        let stats = StoreStats::new();
        stats.record_put(4);
        stats.record_batch(3, 30);

        let snap = stats.snapshot();
        assert_eq!(snap.puts, 4);
        assert_eq!(snap.batches, 1);
        assert_eq!(snap.bytes_written, 34);
    }

    #[test]
    fn cancellations_are_errors() {
        let stats = StoreStats::new();
        stats.record_error(false);
        stats.record_error(true);

        let snap = stats.snapshot();
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.cancellations, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_put(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().puts, 800);
    }
}
