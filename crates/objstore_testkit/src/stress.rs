//! Stress tests for concurrent store access.
//!
//! Writers commit batches while readers check random batches key by key.
//! Because a batch becomes visible all at once, a reader walking its keys
//! in order may see absent keys followed by present ones, never a present
//! key followed by an absent one.

use objstore_core::{KeySpace, LocalStore, ObjectKey, StoreError, StoreResult, StoredObject};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Batches observed partially visible.
    pub atomicity_violations: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    fn new(successful: usize, failed: usize, violations: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            atomicity_violations: violations,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Atomicity violations: {}", self.atomicity_violations);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writer threads.
    pub writers: usize,
    /// Number of reader threads.
    pub readers: usize,
    /// Batches committed by each writer.
    pub batches_per_writer: usize,
    /// Entries per batch.
    pub batch_size: usize,
    /// Payload size in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            readers: 4,
            batches_per_writer: 50,
            batch_size: 16,
            payload_size: 128,
        }
    }
}

fn make_batch(writer: usize, batch: usize, config: &StressConfig) -> Vec<(ObjectKey, StoredObject)> {
    (0..config.batch_size)
        .map(|entry| {
            let mut payload = format!("w{writer}-b{batch}-e{entry}-").into_bytes();
            payload.resize(config.payload_size.max(payload.len()), b'.');
            (ObjectKey::digest(&payload), StoredObject::from(payload))
        })
        .collect()
}

/// Returns `true` if the walk proves the batch was partially visible.
///
/// Keys never disappear during a run, so a present key followed by an
/// absent one is torn. An absent key followed by present ones is torn
/// unless the batch committed during the walk, which re-reading the first
/// key settles.
fn batch_is_torn(store: &LocalStore, keys: &[ObjectKey]) -> StoreResult<bool> {
    let mut seen_present = false;
    for key in keys {
        let present = store.has(KeySpace::Blob, key)?;
        if seen_present && !present {
            return Ok(true);
        }
        seen_present |= present;
    }
    match keys.first() {
        Some(first) if seen_present => Ok(!store.has(KeySpace::Blob, first)?),
        _ => Ok(false),
    }
}

/// Runs concurrent writers and readers and checks batch atomicity.
///
/// # Errors
///
/// Fails if a thread panics.
pub fn stress_batch_atomicity(
    store: Arc<LocalStore>,
    config: &StressConfig,
) -> StoreResult<StressTestResult> {
    // Batches in write order; readers check any of them, written or not.
    let planned: Arc<RwLock<Vec<Vec<ObjectKey>>>> = Arc::new(RwLock::new(Vec::new()));
    let writers_done = Arc::new(AtomicBool::new(false));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let writer_handles: Vec<_> = (0..config.writers)
        .map(|writer| {
            let store = Arc::clone(&store);
            let planned = Arc::clone(&planned);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();
            thread::spawn(move || {
                for batch in 0..config.batches_per_writer {
                    let entries = make_batch(writer, batch, &config);
                    planned
                        .write()
                        .push(entries.iter().map(|(key, _)| key.clone()).collect());
                    match store.put_batch(KeySpace::Blob, &entries) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    let reader_handles: Vec<_> = (0..config.readers)
        .map(|_| {
            let store = Arc::clone(&store);
            let planned = Arc::clone(&planned);
            let writers_done = Arc::clone(&writers_done);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !writers_done.load(Ordering::Acquire) {
                    let keys = {
                        let planned = planned.read();
                        if planned.is_empty() {
                            None
                        } else {
                            Some(planned[rng.gen_range(0..planned.len())].clone())
                        }
                    };
                    let Some(keys) = keys else {
                        thread::yield_now();
                        continue;
                    };
                    match batch_is_torn(&store, &keys) {
                        Ok(torn) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                            if torn {
                                violations.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    let panicked = || StoreError::unavailable("stress thread panicked");
    for handle in writer_handles {
        handle.join().map_err(|_| panicked())?;
    }
    writers_done.store(true, Ordering::Release);
    for handle in reader_handles {
        handle.join().map_err(|_| panicked())?;
    }

    Ok(StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        violations.load(Ordering::Relaxed),
        start.elapsed(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enabled_faults, make_memory_store};

    #[test]
    fn small_run_on_memory_store() {
        let parts = make_memory_store(enabled_faults()).unwrap();
        let store = Arc::new(parts.store);
        let config = StressConfig {
            writers: 2,
            readers: 2,
            batches_per_writer: 10,
            batch_size: 4,
            payload_size: 32,
        };

        let result = stress_batch_atomicity(Arc::clone(&store), &config).unwrap();
        assert_eq!(result.atomicity_violations, 0);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.enumerate(KeySpace::Blob).unwrap().count(), 2 * 10 * 4);
    }

    #[test]
    fn torn_batches_are_caught_in_either_order() {
        let parts = make_memory_store(enabled_faults()).unwrap();
        let config = StressConfig {
            batch_size: 3,
            ..StressConfig::default()
        };
        let keys: Vec<ObjectKey> = make_batch(0, 0, &config)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert!(!batch_is_torn(&parts, &keys).unwrap());

        // Only the last key is visible: absent keys come first.
        parts.put(KeySpace::Blob, &keys[2], b"x").unwrap();
        assert!(batch_is_torn(&parts, &keys).unwrap());

        // Only the first key is visible: the absent keys come last.
        let parts = make_memory_store(enabled_faults()).unwrap();
        parts.put(KeySpace::Blob, &keys[0], b"x").unwrap();
        assert!(batch_is_torn(&parts, &keys).unwrap());

        for key in &keys {
            parts.put(KeySpace::Blob, key, b"x").unwrap();
        }
        assert!(!batch_is_torn(&parts, &keys).unwrap());
    }
}
