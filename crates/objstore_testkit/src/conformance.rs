//! Backend conformance suite.
//!
//! Each check builds a fresh store from a [`StoreFactory`] and asserts one
//! property every backend must satisfy. [`conformance_tests!`] instantiates
//! the whole suite as `#[test]` functions for one factory, so both backends
//! run identical checks.
//!
//! ```rust,ignore
//! objstore_testkit::conformance_tests!(memory, objstore_testkit::make_memory_store);
//! ```
//!
//! [`conformance_tests!`]: crate::conformance_tests

use crate::fixtures::{enabled_faults, StoreFactory};
use objstore_core::{
    ErrorKind, FaultKind, FaultOp, KeyMatch, KeySpace, ObjectKey, StoreError, StoreResult,
    StoredObject,
};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn error_kind<T>(result: StoreResult<T>) -> Option<ErrorKind> {
    result.err().map(|e| e.kind())
}

fn batch(prefix: &str, n: usize) -> Vec<(ObjectKey, StoredObject)> {
    (0..n)
        .map(|i| {
            let payload = format!("{prefix}-{i}").into_bytes();
            (ObjectKey::digest(&payload), StoredObject::from(payload))
        })
        .collect()
}

/// A key that was never written reads as `NotFound` and `has` is false.
pub fn check_miss_before_write(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let key = ObjectKey::digest(b"never written");
    for space in KeySpace::ALL {
        assert_eq!(
            error_kind(parts.get(space, &key)),
            Some(ErrorKind::NotFound),
            "space {space}"
        );
        assert!(!parts.has(space, &key)?);
    }
    Ok(())
}

/// A successful put is immediately readable with the same bytes.
pub fn check_read_your_write(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let payload = b"read your own write";
    let key = parts.put_content(KeySpace::Blob, payload)?;
    assert!(parts.has(KeySpace::Blob, &key)?);
    assert_eq!(&parts.get(KeySpace::Blob, &key)?[..], payload);

    let empty = parts.put_content(KeySpace::BlobMetadata, b"")?;
    assert!(parts.get(KeySpace::BlobMetadata, &empty)?.is_empty());
    Ok(())
}

/// Writing the same key twice leaves one entry with the original bytes.
pub fn check_idempotent_put(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let key = parts.put_content(KeySpace::Tree, b"same payload")?;
    parts.put(KeySpace::Tree, &key, b"same payload")?;
    parts.put_batch(
        KeySpace::Tree,
        &[(key.clone(), StoredObject::from_static(b"same payload"))],
    )?;

    assert_eq!(parts.enumerate(KeySpace::Tree)?.count(), 1);
    assert_eq!(&parts.get(KeySpace::Tree, &key)?[..], b"same payload");
    Ok(())
}

/// Equal keys in different key spaces are unrelated.
pub fn check_key_spaces_are_disjoint(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let key = ObjectKey::digest(b"shared key");
    parts.put(KeySpace::Blob, &key, b"blob bytes")?;
    parts.put(KeySpace::Tree, &key, b"tree bytes")?;

    assert_eq!(&parts.get(KeySpace::Blob, &key)?[..], b"blob bytes");
    assert_eq!(&parts.get(KeySpace::Tree, &key)?[..], b"tree bytes");
    assert!(!parts.has(KeySpace::CommitToTree, &key)?);
    Ok(())
}

/// Every entry of a batch is visible after it returns; empty batches are
/// no-ops.
pub fn check_batch_visibility(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    parts.put_batch(KeySpace::Blob, &[])?;
    assert_eq!(parts.enumerate(KeySpace::Blob)?.count(), 0);

    let entries = batch("batch", 20);
    parts.put_batch(KeySpace::Blob, &entries)?;
    for (key, payload) in &entries {
        assert_eq!(&parts.get(KeySpace::Blob, key)?, payload);
    }
    Ok(())
}

/// Enumeration returns exactly the written keys of one space.
pub fn check_enumerate(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let entries = batch("enumerate", 10);
    parts.put_batch(KeySpace::TreeMetadata, &entries)?;
    parts.put_content(KeySpace::Blob, b"other space")?;

    let listed: HashSet<ObjectKey> = parts.enumerate(KeySpace::TreeMetadata)?.collect();
    let expected: HashSet<ObjectKey> = entries.into_iter().map(|(key, _)| key).collect();
    assert_eq!(listed, expected);
    Ok(())
}

/// Clearing a space removes its keys and nothing else.
pub fn check_clear_is_scoped(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    let blob = parts.put_content(KeySpace::Blob, b"cached blob")?;
    let proxy = parts.put_content(KeySpace::ProxyHash, b"proxy mapping")?;

    parts.clear_key_space(KeySpace::Blob)?;
    assert!(!parts.has(KeySpace::Blob, &blob)?);
    assert!(parts.has(KeySpace::ProxyHash, &proxy)?);

    // The space is usable again after a clear.
    parts.put_content(KeySpace::Blob, b"cached blob")?;
    assert!(parts.has(KeySpace::Blob, &blob)?);

    parts.clear_caches_and_compact_all()?;
    assert!(!parts.has(KeySpace::Blob, &blob)?);
    assert_eq!(&parts.get(KeySpace::ProxyHash, &proxy)?[..], b"proxy mapping");
    Ok(())
}

/// Injected errors reach the caller unchanged and leave no state behind.
pub fn check_fault_passthrough(factory: StoreFactory) -> StoreResult<()> {
    let faults = enabled_faults();
    let parts = factory(Arc::clone(&faults))?;
    let key = ObjectKey::digest(b"faulty");
    let entries = batch("faulty-batch", 4);

    let id = faults.inject_error(
        FaultOp::Write,
        KeyMatch::Any,
        FaultKind::BackendUnavailable,
        None,
    );
    assert_eq!(
        error_kind(parts.put(KeySpace::Blob, &key, b"faulty")),
        Some(ErrorKind::BackendUnavailable)
    );
    assert_eq!(
        error_kind(parts.put_batch(KeySpace::Blob, &entries)),
        Some(ErrorKind::BackendUnavailable)
    );
    assert!(faults.remove(id));
    assert!(!parts.has(KeySpace::Blob, &key)?);
    for (entry, _) in &entries {
        assert!(!parts.has(KeySpace::Blob, entry)?);
    }

    let id = faults.inject_error(FaultOp::Write, KeyMatch::Any, FaultKind::Cancelled, None);
    assert_eq!(
        error_kind(parts.put_batch(KeySpace::Blob, &entries)),
        Some(ErrorKind::Cancelled)
    );
    assert!(faults.remove(id));
    assert_eq!(parts.enumerate(KeySpace::Blob)?.count(), 0);

    faults.inject_error(
        FaultOp::Read,
        KeyMatch::Exact(key.clone()),
        FaultKind::BackendUnavailable,
        None,
    );
    parts.put(KeySpace::Blob, &key, b"faulty")?;
    assert_eq!(
        error_kind(parts.get(KeySpace::Blob, &key)),
        Some(ErrorKind::BackendUnavailable)
    );
    // `has` is a separate operation and is not affected.
    assert!(parts.has(KeySpace::Blob, &key)?);
    Ok(())
}

/// A batch is one call to the injector: a delay applies once and a block
/// parks one call that one release lets through.
pub fn check_batch_fault_applies_once(factory: StoreFactory) -> StoreResult<()> {
    let faults = enabled_faults();
    let parts = Arc::new(factory(Arc::clone(&faults))?);
    let delay = Duration::from_millis(40);

    let id = faults.inject_delay(FaultOp::Write, KeyMatch::Any, delay, None);
    let delayed = batch("delayed", 10);
    let start = Instant::now();
    parts.put_batch(KeySpace::Blob, &delayed)?;
    let elapsed = start.elapsed();
    assert!(elapsed >= delay);
    assert!(elapsed < delay * 5, "batch took {elapsed:?}");
    assert_eq!(faults.fired_count(), 1);
    assert!(faults.remove(id));

    faults.inject_block(FaultOp::Write, KeyMatch::Any, None);
    let blocked = batch("blocked", 3);
    let writer = {
        let parts = Arc::clone(&parts);
        let blocked = blocked.clone();
        thread::spawn(move || parts.put_batch(KeySpace::Tree, &blocked))
    };
    assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));
    let calls = faults.blocked_calls();
    assert_eq!(calls.len(), 1);
    assert!(faults.release(calls[0].id));
    writer
        .join()
        .map_err(|_| StoreError::unavailable("writer thread panicked"))??;

    assert!(faults.blocked_calls().is_empty());
    assert_eq!(faults.fired_count(), 2);
    for (key, _) in &blocked {
        assert!(parts.has(KeySpace::Tree, key)?);
    }
    Ok(())
}

/// A rule limited to `n` triggers fires exactly `n` times.
pub fn check_count_limited_rule(factory: StoreFactory) -> StoreResult<()> {
    let faults = enabled_faults();
    let parts = factory(Arc::clone(&faults))?;
    faults.inject_error(
        FaultOp::Has,
        KeyMatch::Any,
        FaultKind::BackendUnavailable,
        Some(3),
    );

    let key = ObjectKey::digest(b"counted");
    let failures = (0..10)
        .filter(|_| parts.has(KeySpace::Blob, &key).is_err())
        .count();
    assert_eq!(failures, 3);
    assert_eq!(faults.fired_count(), 3);
    assert_eq!(parts.stats().faults_injected, 3);
    Ok(())
}

/// A blocked call can be released with an error of the harness's choice.
pub fn check_release_with_error(factory: StoreFactory) -> StoreResult<()> {
    let faults = enabled_faults();
    let parts = Arc::new(factory(Arc::clone(&faults))?);
    let key = parts.put_content(KeySpace::Tree, b"blocked read")?;
    faults.inject_block(FaultOp::Read, KeyMatch::Exact(key.clone()), Some(1));

    let reader = {
        let parts = Arc::clone(&parts);
        let key = key.clone();
        thread::spawn(move || parts.get(KeySpace::Tree, &key).map(|p| p.len()))
    };
    assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));
    let blocked = faults.blocked_calls();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].op, FaultOp::Read);
    assert_eq!(blocked[0].space, Some(KeySpace::Tree));
    assert!(faults.release_with_error(blocked[0].id, FaultKind::Cancelled));

    let outcome = reader
        .join()
        .map_err(|_| StoreError::unavailable("reader thread panicked"))?;
    assert_eq!(error_kind(outcome), Some(ErrorKind::Cancelled));

    // The rule was limited to one trigger.
    assert_eq!(&parts.get(KeySpace::Tree, &key)?[..], b"blocked read");
    Ok(())
}

/// Concurrent puts of one key never corrupt the stored payload.
pub fn check_concurrent_puts(factory: StoreFactory) -> StoreResult<()> {
    let parts = Arc::new(factory(enabled_faults())?);
    let payload = b"contended payload".to_vec();
    let key = ObjectKey::digest(&payload);
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let parts = Arc::clone(&parts);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            let payload = payload.clone();
            thread::spawn(move || {
                barrier.wait();
                parts.put(KeySpace::Blob, &key, &payload)
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| StoreError::unavailable("writer thread panicked"))??;
    }

    assert_eq!(parts.get(KeySpace::Blob, &key)?.as_ref(), payload.as_slice());
    assert_eq!(parts.enumerate(KeySpace::Blob)?.count(), 1);
    Ok(())
}

/// Acknowledged writes survive closing and reopening a durable store.
///
/// Skipped for stores that are not durable.
pub fn check_durability(factory: StoreFactory) -> StoreResult<()> {
    let parts = factory(enabled_faults())?;
    if !parts.is_durable() {
        return Ok(());
    }
    let single = parts.put_content(KeySpace::ProxyHash, b"durable single")?;
    let entries = batch("durable", 5);
    parts.put_batch(KeySpace::Blob, &entries)?;

    let parts = parts.reopen()?;
    assert_eq!(&parts.get(KeySpace::ProxyHash, &single)?[..], b"durable single");
    for (key, payload) in &entries {
        assert_eq!(&parts.get(KeySpace::Blob, key)?, payload);
    }
    Ok(())
}

/// Instantiates the conformance suite as `#[test]` functions.
///
/// The first argument names the generated module, the second is a
/// [`StoreFactory`].
#[macro_export]
macro_rules! conformance_tests {
    ($name:ident, $factory:expr) => {
        mod $name {
            #[allow(unused_imports)]
            use super::*;
            use $crate::conformance::*;

            #[test]
            fn miss_before_write() {
                check_miss_before_write($factory).unwrap();
            }

            #[test]
            fn read_your_write() {
                check_read_your_write($factory).unwrap();
            }

            #[test]
            fn idempotent_put() {
                check_idempotent_put($factory).unwrap();
            }

            #[test]
            fn key_spaces_are_disjoint() {
                check_key_spaces_are_disjoint($factory).unwrap();
            }

            #[test]
            fn batch_visibility() {
                check_batch_visibility($factory).unwrap();
            }

            #[test]
            fn enumerate() {
                check_enumerate($factory).unwrap();
            }

            #[test]
            fn clear_is_scoped() {
                check_clear_is_scoped($factory).unwrap();
            }

            #[test]
            fn fault_passthrough() {
                check_fault_passthrough($factory).unwrap();
            }

            #[test]
            fn batch_fault_applies_once() {
                check_batch_fault_applies_once($factory).unwrap();
            }

            #[test]
            fn count_limited_rule() {
                check_count_limited_rule($factory).unwrap();
            }

            #[test]
            fn release_with_error() {
                check_release_with_error($factory).unwrap();
            }

            #[test]
            fn concurrent_puts() {
                check_concurrent_puts($factory).unwrap();
            }

            #[test]
            fn durability() {
                check_durability($factory).unwrap();
            }
        }
    };
}
