//! Deferred termination for worker threads.
//!
//! Rust threads cannot be killed from outside, so termination is modelled as
//! a request flag that the worker observes at termination points. A thread is
//! either [`WorkerState::Interruptible`] or, while it holds a [`CancelGuard`],
//! [`WorkerState::Guarded`]. A request that arrives while the thread is
//! guarded is held back and only takes effect at the first termination point
//! after the outermost guard is released.
//!
//! The object store enters a guard around every backend mutation, so a worker
//! asked to stop never abandons a transaction between its first byte and its
//! durable commit.
//!
//! ```rust
//! use objstore_core::cancel::{current_state, CancelGuard, WorkerState};
//!
//! assert_eq!(current_state(), WorkerState::Interruptible);
//! {
//!     let _guard = CancelGuard::enter();
//!     assert_eq!(current_state(), WorkerState::Guarded);
//! }
//! assert_eq!(current_state(), WorkerState::Interruptible);
//! ```

use crate::error::{StoreError, StoreResult};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static TERMINATION: RefCell<Option<Arc<TerminationFlag>>> = const { RefCell::new(None) };
}

#[derive(Debug, Default)]
struct TerminationFlag {
    requested: AtomicBool,
}

/// Whether the current thread may be terminated right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Termination requests take effect at the next termination point.
    Interruptible,
    /// Inside a critical section; termination requests are deferred.
    Guarded,
}

/// Returns the state of the current thread.
#[must_use]
pub fn current_state() -> WorkerState {
    if GUARD_DEPTH.with(Cell::get) > 0 {
        WorkerState::Guarded
    } else {
        WorkerState::Interruptible
    }
}

/// Returns `true` if termination was requested for the current thread and
/// has not been delivered yet.
#[must_use]
pub fn termination_pending() -> bool {
    TERMINATION.with(|flag| {
        flag.borrow()
            .as_ref()
            .is_some_and(|flag| flag.requested.load(Ordering::Acquire))
    })
}

/// Delivers a pending termination request.
///
/// Threads not started through [`Worker::spawn`] never have a pending request.
///
/// # Errors
///
/// Returns `Cancelled` if termination was requested and the thread is
/// [`WorkerState::Interruptible`]. While guarded this always succeeds and the
/// request stays pending.
pub fn termination_point() -> StoreResult<()> {
    if current_state() == WorkerState::Guarded {
        return Ok(());
    }
    if termination_pending() {
        return Err(StoreError::cancelled("worker termination requested"));
    }
    Ok(())
}

/// Scoped critical section that defers termination of the current thread.
///
/// Guards nest; the thread becomes interruptible again when the outermost
/// guard drops, on every exit path including `?` returns and unwinding.
/// The guard is tied to the thread that created it and is neither `Send`
/// nor `Sync`.
#[derive(Debug)]
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CancelGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl CancelGuard {
    /// Enters a critical section on the current thread.
    pub fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let remaining = GUARD_DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next
        });
        if remaining == 0 && termination_pending() {
            debug!("critical section left with a deferred termination request");
        }
    }
}

/// A named worker thread that can be asked to terminate.
///
/// The request is deferred while the worker is inside a [`CancelGuard`] and
/// surfaces as `Cancelled` from the next [`termination_point`] afterwards.
#[derive(Debug)]
pub struct Worker<T> {
    name: String,
    handle: JoinHandle<T>,
    flag: Arc<TerminationFlag>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawns a named worker thread running `f`.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the OS refuses to create the thread.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> StoreResult<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let flag = Arc::new(TerminationFlag::default());
        let thread_flag = Arc::clone(&flag);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                TERMINATION.with(|slot| *slot.borrow_mut() = Some(thread_flag));
                f()
            })
            .map_err(|e| StoreError::io(format!("failed to spawn worker {name}"), e))?;
        Ok(Self { name, handle, flag })
    }

    /// Asks the worker to terminate at its next termination point.
    pub fn request_termination(&self) {
        debug!(worker = %self.name, "termination requested");
        self.flag.requested.store(true, Ordering::Release);
    }

    /// Returns the worker's thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the worker's closure has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker to finish and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the worker panicked.
    pub fn join(self) -> thread::Result<T> {
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn guard_nesting_restores_state() {
        assert_eq!(current_state(), WorkerState::Interruptible);
        let outer = CancelGuard::enter();
        {
            let _inner = CancelGuard::enter();
            assert_eq!(current_state(), WorkerState::Guarded);
        }
        assert_eq!(current_state(), WorkerState::Guarded);
        drop(outer);
        assert_eq!(current_state(), WorkerState::Interruptible);
    }

    #[test]
    fn guard_released_on_error_path() {
        fn fails() -> StoreResult<()> {
            let _guard = CancelGuard::enter();
            Err(StoreError::unavailable("disk full"))
        }
        assert!(fails().is_err());
        assert_eq!(current_state(), WorkerState::Interruptible);
    }

    #[test]
    fn guard_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = CancelGuard::enter();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current_state(), WorkerState::Interruptible);
    }

    #[test]
    fn plain_threads_are_never_terminated() {
        assert!(!termination_pending());
        assert!(termination_point().is_ok());
    }

    #[test]
    fn termination_is_deferred_while_guarded() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (requested_tx, requested_rx) = mpsc::channel::<()>();

        let worker = Worker::spawn("guarded-worker", move || {
            let guard = CancelGuard::enter();
            entered_tx.send(()).unwrap();
            requested_rx.recv().unwrap();

            let pending = termination_pending();
            let inside = termination_point().is_ok();
            drop(guard);
            let after = termination_point();
            (pending, inside, after.map_err(|e| e.kind()))
        })
        .unwrap();

        entered_rx.recv().unwrap();
        worker.request_termination();
        requested_tx.send(()).unwrap();

        let (pending, inside, after) = worker.join().unwrap();
        assert!(pending);
        assert!(inside);
        assert_eq!(after, Err(crate::ErrorKind::Cancelled));
    }

    #[test]
    fn worker_without_request_runs_to_completion() {
        let worker = Worker::spawn("idle-worker", || termination_point().is_ok()).unwrap();
        assert_eq!(worker.name(), "idle-worker");
        assert!(worker.join().unwrap());
    }
}
