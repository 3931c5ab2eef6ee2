//! Cancellation safety trials.
//!
//! A worker thread writes one batch while the harness asks it to terminate
//! at a chosen moment. Whatever the moment, the batch must end up either
//! entirely visible or entirely absent, and the termination must surface as
//! `Cancelled` from the worker's next store call.
//!
//! [`run_cancellation_trial`] terminates before the write or while the call
//! is parked in the fault injector. [`run_commit_cancellation_trial`]
//! terminates while the write is inside the store's guarded section, parked
//! by a [`CommitGate`] in front of a log backend, and judges visibility on
//! the store reopened from disk.

use crate::fixtures::{StoreParts, LOG_FILE_NAME};
use objstore_core::cancel::{current_state, Worker, WorkerState};
use objstore_core::{
    Backend, BackendKind, ErrorKind, FaultInjector, FaultOp, KeyIter, KeyMatch, KeySpace,
    LocalStore, LogBackend, ObjectKey, StoreConfig, StoreError, StoreResult, StoredObject,
};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type TrialResult = (StoreResult<()>, StoreResult<bool>);

/// When the harness requests termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateAt {
    /// Before the worker starts its write.
    BeforeWrite,
    /// While the write is parked by the fault injector, before it reaches
    /// the backend.
    WhileBlocked,
}

/// How the batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchVisibility {
    /// Every entry is readable.
    All,
    /// No entry is readable.
    None,
    /// Some entries are readable. Always a bug.
    Partial,
}

/// Result of one cancellation trial.
#[derive(Debug)]
pub struct CancellationOutcome {
    /// Outcome of the worker's write.
    pub write: StoreResult<()>,
    /// Outcome of the call the worker made after the write.
    pub follow_up: StoreResult<bool>,
    /// What readers see afterwards.
    pub visibility: BatchVisibility,
}

impl CancellationOutcome {
    /// Returns `true` if the trial upheld all-or-nothing visibility and the
    /// termination was delivered.
    pub fn is_safe(&self) -> bool {
        let write_matches = match self.visibility {
            BatchVisibility::All => self.write.is_ok(),
            BatchVisibility::None => self.write.is_err(),
            BatchVisibility::Partial => false,
        };
        let cancelled = |r: &StoreResult<bool>| {
            matches!(r, Err(e) if e.kind() == ErrorKind::Cancelled)
        };
        write_matches && (self.write.is_err() || cancelled(&self.follow_up))
    }
}

/// Builds `n` distinct entries for a trial.
pub fn trial_batch(n: usize) -> Vec<(ObjectKey, StoredObject)> {
    (0..n)
        .map(|i| {
            let payload = format!("cancellation-trial-{i}").into_bytes();
            (ObjectKey::digest(&payload), StoredObject::from(payload))
        })
        .collect()
}

/// Runs one trial against `store`, which must use `faults`.
///
/// # Errors
///
/// Fails if the worker cannot be spawned, panics, or never reaches the
/// injected block.
pub fn run_cancellation_trial(
    store: Arc<LocalStore>,
    faults: &FaultInjector,
    entries: Vec<(ObjectKey, StoredObject)>,
    at: TerminateAt,
) -> StoreResult<CancellationOutcome> {
    let rule = (at == TerminateAt::WhileBlocked)
        .then(|| faults.inject_block(FaultOp::Write, KeyMatch::Any, Some(1)));
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let worker = spawn_writer(Arc::clone(&store), entries.clone(), go_rx)?;

    match at {
        TerminateAt::BeforeWrite => {
            worker.request_termination();
            let _ = go_tx.send(());
        }
        TerminateAt::WhileBlocked => {
            let _ = go_tx.send(());
            if !faults.wait_for_blocked(1, Duration::from_secs(5)) {
                faults.release_all();
                return Err(StoreError::unavailable("worker never reached the block"));
            }
            worker.request_termination();
            faults.release_all();
        }
    }

    let (write, follow_up) = worker
        .join()
        .map_err(|_| StoreError::unavailable("trial worker panicked"))?;
    if let Some(id) = rule {
        faults.remove(id);
    }

    let visibility = visibility(&store, &entries)?;
    Ok(CancellationOutcome {
        write,
        follow_up,
        visibility,
    })
}

/// Runs one trial that requests termination while the write is parked by
/// `gate` inside the store's guarded section, then closes and reopens the
/// store.
///
/// `parts` must come from [`make_gated_log_store`] with the same `gate`.
/// Visibility is measured on the reopened store, which is returned too.
///
/// # Errors
///
/// Fails if the worker cannot be spawned, panics, or never reaches the
/// gate, or if the store cannot be reopened.
pub fn run_commit_cancellation_trial(
    parts: StoreParts,
    gate: &CommitGate,
    entries: Vec<(ObjectKey, StoredObject)>,
) -> StoreResult<(CancellationOutcome, StoreParts)> {
    let StoreParts {
        temp_dir,
        store,
        path,
    } = parts;
    let store = Arc::new(store);
    gate.arm();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let worker = spawn_writer(Arc::clone(&store), entries.clone(), go_rx)?;

    let _ = go_tx.send(());
    if !gate.wait_parked(Duration::from_secs(5)) {
        gate.open();
        let _ = worker.join();
        return Err(StoreError::unavailable("worker never reached the commit gate"));
    }
    worker.request_termination();
    gate.open();

    let (write, follow_up) = worker
        .join()
        .map_err(|_| StoreError::unavailable("trial worker panicked"))?;
    let store = Arc::try_unwrap(store)
        .map_err(|_| StoreError::unavailable("store still shared after the trial"))?;

    let reopened = StoreParts {
        temp_dir,
        store,
        path,
    }
    .reopen()?;
    let visibility = visibility(&reopened, &entries)?;
    Ok((
        CancellationOutcome {
            write,
            follow_up,
            visibility,
        },
        reopened,
    ))
}

fn spawn_writer(
    store: Arc<LocalStore>,
    entries: Vec<(ObjectKey, StoredObject)>,
    go: mpsc::Receiver<()>,
) -> StoreResult<Worker<TrialResult>> {
    Worker::spawn("cancellation-trial", move || {
        if go.recv().is_err() {
            return (Err(StoreError::cancelled("trial aborted")), Ok(false));
        }
        let write = store.put_batch(KeySpace::Blob, &entries);
        let first = entries
            .first()
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| ObjectKey::digest(b""));
        let follow_up = store.has(KeySpace::Blob, &first);
        (write, follow_up)
    })
}

fn visibility(
    store: &LocalStore,
    entries: &[(ObjectKey, StoredObject)],
) -> StoreResult<BatchVisibility> {
    let mut visible = 0;
    for (key, _) in entries {
        if store.has(KeySpace::Blob, key)? {
            visible += 1;
        }
    }
    Ok(match visible {
        0 => BatchVisibility::None,
        n if n == entries.len() => BatchVisibility::All,
        _ => BatchVisibility::Partial,
    })
}

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    parked: Option<WorkerState>,
    open: bool,
}

/// Parks the next write that reaches the backend until the harness opens
/// the gate.
///
/// The store calls the backend inside its guarded section, so a parked
/// writer sits between the start of the mutation and its commit.
#[derive(Debug, Clone, Default)]
pub struct CommitGate {
    shared: Arc<(Mutex<GateState>, Condvar)>,
}

impl CommitGate {
    /// Makes the next write park.
    pub fn arm(&self) {
        let mut state = self.shared.0.lock();
        *state = GateState {
            armed: true,
            ..GateState::default()
        };
    }

    /// Waits until a write is parked. Returns `false` on timeout.
    pub fn wait_parked(&self, timeout: Duration) -> bool {
        let (lock, changed) = &*self.shared;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock();
        while state.parked.is_none() {
            if changed.wait_until(&mut state, deadline).timed_out() {
                return state.parked.is_some();
            }
        }
        true
    }

    /// The worker state observed by the last parked write.
    pub fn parked_state(&self) -> Option<WorkerState> {
        self.shared.0.lock().parked
    }

    /// Lets the parked write continue.
    pub fn open(&self) {
        let (lock, changed) = &*self.shared;
        lock.lock().open = true;
        changed.notify_all();
    }

    fn pass(&self) {
        let (lock, changed) = &*self.shared;
        let mut state = lock.lock();
        if !state.armed {
            return;
        }
        state.armed = false;
        state.parked = Some(current_state());
        changed.notify_all();
        while !state.open {
            changed.wait(&mut state);
        }
    }
}

/// A log backend whose writes pass through a [`CommitGate`] first.
struct GatedBackend {
    inner: LogBackend,
    gate: CommitGate,
}

impl Backend for GatedBackend {
    fn get(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<StoredObject> {
        self.inner.get(space, key)
    }

    fn put(&self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()> {
        self.gate.pass();
        self.inner.put(space, key, payload)
    }

    fn has(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<bool> {
        self.inner.has(space, key)
    }

    fn put_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()> {
        self.gate.pass();
        self.inner.put_batch(space, entries)
    }

    fn enumerate(&self, space: KeySpace) -> StoreResult<KeyIter> {
        self.inner.enumerate(space)
    }

    fn clear(&self, space: KeySpace) -> StoreResult<()> {
        self.gate.pass();
        self.inner.clear(space)
    }

    fn compact(&self) -> StoreResult<()> {
        self.inner.compact()
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }
}

/// Creates a log store whose writes pass through `gate`.
///
/// # Errors
///
/// Fails if the directory or store cannot be created.
pub fn make_gated_log_store(
    gate: &CommitGate,
    faults: Arc<FaultInjector>,
) -> StoreResult<StoreParts> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(LOG_FILE_NAME);
    let backend = GatedBackend {
        inner: LogBackend::open(&path, StoreConfig::default())?,
        gate: gate.clone(),
    };
    Ok(StoreParts {
        temp_dir: Some(temp_dir),
        store: LocalStore::with_fault_injector(backend, faults),
        path: Some(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enabled_faults, make_memory_store};

    #[test]
    fn termination_before_write_writes_nothing() {
        let faults = enabled_faults();
        let parts = make_memory_store(Arc::clone(&faults)).unwrap();
        let store = Arc::new(parts.store);

        let outcome =
            run_cancellation_trial(store, &faults, trial_batch(4), TerminateAt::BeforeWrite)
                .unwrap();
        assert_eq!(outcome.visibility, BatchVisibility::None);
        assert_eq!(outcome.write.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn termination_while_blocked_completes_the_write() {
        let faults = enabled_faults();
        let parts = make_memory_store(Arc::clone(&faults)).unwrap();
        let store = Arc::new(parts.store);

        let outcome =
            run_cancellation_trial(store, &faults, trial_batch(4), TerminateAt::WhileBlocked)
                .unwrap();
        assert!(outcome.is_safe(), "{outcome:?}");
        assert_eq!(outcome.visibility, BatchVisibility::All);
    }

    #[test]
    fn termination_inside_commit_keeps_the_whole_batch_after_reopen() {
        let gate = CommitGate::default();
        let parts = make_gated_log_store(&gate, enabled_faults()).unwrap();
        let before = parts.put_content(KeySpace::Tree, b"earlier write").unwrap();

        let (outcome, reopened) =
            run_commit_cancellation_trial(parts, &gate, trial_batch(6)).unwrap();
        assert_eq!(gate.parked_state(), Some(WorkerState::Guarded));
        assert!(outcome.is_safe(), "{outcome:?}");
        assert_eq!(outcome.visibility, BatchVisibility::All);
        assert_eq!(
            outcome.follow_up.as_ref().unwrap_err().kind(),
            ErrorKind::Cancelled
        );
        assert!(reopened.has(KeySpace::Tree, &before).unwrap());
    }

    #[test]
    fn unarmed_gate_lets_writes_through() {
        let gate = CommitGate::default();
        let parts = make_gated_log_store(&gate, enabled_faults()).unwrap();
        let key = parts.put_content(KeySpace::Blob, b"straight through").unwrap();
        assert!(gate.parked_state().is_none());
        assert!(parts.has(KeySpace::Blob, &key).unwrap());
    }
}
