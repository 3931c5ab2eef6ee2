//! Fault injection for testing callers under backend failure.
//!
//! A [`FaultInjector`] holds an ordered list of [`FaultRule`]s. The store
//! consults it right before every backend call; the first rule that matches
//! the call decides what happens:
//!
//! - [`FaultAction::Delay`] sleeps, then lets the call through
//! - [`FaultAction::Fail`] returns an error without touching the backend
//! - [`FaultAction::Block`] parks the calling thread until the harness
//!   releases it
//!
//! The injector is an explicit value handed to the store at construction, so
//! several stores in one process never see each other's rules.
//!
//! ```rust
//! use objstore_core::{FaultAction, FaultInjector, FaultKind, FaultOp, FaultRule};
//! use objstore_core::{KeySpace, LocalStore, MemoryBackend, ObjectKey};
//! use std::sync::Arc;
//!
//! let faults = Arc::new(FaultInjector::new(true));
//! let store = LocalStore::with_fault_injector(MemoryBackend::new(), Arc::clone(&faults));
//!
//! faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::BackendUnavailable)).op(FaultOp::Write));
//! let key = ObjectKey::digest(b"data");
//! assert!(store.put(KeySpace::Blob, &key, b"data").is_err());
//! assert!(!store.has(KeySpace::Blob, &key).unwrap());
//! ```

use crate::error::{StoreError, StoreResult};
use crate::types::{KeySpace, ObjectKey};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// The kind of backend call being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// `get` and each lookup of `get_multiple`.
    Read,
    /// `put`, `put_batch`, `clear` and `compact`.
    Write,
    /// `has`.
    Has,
    /// `enumerate`.
    Enumerate,
}

impl fmt::Display for FaultOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Has => "has",
            Self::Enumerate => "enumerate",
        };
        f.write_str(name)
    }
}

/// Error returned by a failing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Simulate a broken storage medium.
    BackendUnavailable,
    /// Simulate a deliberately aborted call.
    Cancelled,
}

impl FaultKind {
    fn into_error(self, op: FaultOp) -> StoreError {
        match self {
            Self::BackendUnavailable => {
                StoreError::unavailable(format!("injected failure on {op}"))
            }
            Self::Cancelled => StoreError::cancelled(format!("injected fault on {op}")),
        }
    }
}

/// Which keys a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyMatch {
    /// Every call, including calls without a key.
    #[default]
    Any,
    /// Calls on exactly this key.
    Exact(ObjectKey),
    /// Calls on keys starting with these bytes.
    Prefix(Vec<u8>),
}

impl KeyMatch {
    fn matches(&self, key: Option<&ObjectKey>) -> bool {
        match (self, key) {
            (Self::Any, _) => true,
            (Self::Exact(expected), Some(key)) => expected == key,
            (Self::Prefix(prefix), Some(key)) => key.starts_with(prefix),
            (_, None) => false,
        }
    }
}

/// What a matching rule does to the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Sleep for the duration, then run the real call.
    Delay(Duration),
    /// Return the error without calling the backend.
    Fail(FaultKind),
    /// Park the caller until released by the harness.
    Block,
}

/// A fault injection rule.
///
/// A new rule matches every call; narrow it with the builder methods.
#[derive(Debug, Clone)]
pub struct FaultRule {
    op: Option<FaultOp>,
    space: Option<KeySpace>,
    key: KeyMatch,
    action: FaultAction,
    count: Option<usize>,
}

impl FaultRule {
    /// Creates a rule applying `action` to every call.
    #[must_use]
    pub fn new(action: FaultAction) -> Self {
        Self {
            op: None,
            space: None,
            key: KeyMatch::Any,
            action,
            count: None,
        }
    }

    /// Restricts the rule to one kind of call.
    #[must_use]
    pub fn op(mut self, op: FaultOp) -> Self {
        self.op = Some(op);
        self
    }

    /// Restricts the rule to one key space.
    #[must_use]
    pub fn space(mut self, space: KeySpace) -> Self {
        self.space = Some(space);
        self
    }

    /// Restricts the rule to one key.
    #[must_use]
    pub fn key(mut self, key: ObjectKey) -> Self {
        self.key = KeyMatch::Exact(key);
        self
    }

    /// Restricts the rule to keys with the given prefix.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.key = KeyMatch::Prefix(prefix.into());
        self
    }

    /// Lets the rule fire only `n` times.
    #[must_use]
    pub fn times(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }

    /// Returns the rule's action.
    #[must_use]
    pub fn action(&self) -> &FaultAction {
        &self.action
    }

    fn matches(&self, op: FaultOp, space: Option<KeySpace>, key: Option<&ObjectKey>) -> bool {
        self.op.map_or(true, |expected| expected == op)
            && self.space.map_or(true, |expected| Some(expected) == space)
            && self.key.matches(key)
    }
}

/// Handle of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultId(u64);

/// Handle of a parked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockedId(u64);

/// A call parked by a [`FaultAction::Block`] rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedCall {
    /// Handle for releasing this call.
    pub id: BlockedId,
    /// The kind of call.
    pub op: FaultOp,
    /// The key space of the call, if any.
    pub space: Option<KeySpace>,
    /// The key of the call, if any.
    pub key: Option<ObjectKey>,
}

struct ActiveRule {
    id: FaultId,
    rule: FaultRule,
    remaining: Option<AtomicUsize>,
}

impl ActiveRule {
    /// Consumes one trigger. Only called with the rule table read-locked, so
    /// the counter is the only shared mutable state.
    fn try_fire(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Proceed,
    Fail(FaultKind),
}

struct BlockedEntry {
    call: BlockedCall,
    resolution: Option<Resolution>,
}

#[derive(Default)]
struct BlockedTable {
    entries: Vec<BlockedEntry>,
}

impl BlockedTable {
    fn pending(&self) -> impl Iterator<Item = &BlockedEntry> {
        self.entries.iter().filter(|e| e.resolution.is_none())
    }

    fn resolve(&mut self, id: BlockedId, resolution: Resolution) -> bool {
        self.entries
            .iter_mut()
            .find(|e| e.call.id == id && e.resolution.is_none())
            .map(|e| e.resolution = Some(resolution))
            .is_some()
    }
}

/// Rule table consulted before every backend call.
///
/// Safe to share across worker threads. Matching takes only a read lock on
/// the rule table.
pub struct FaultInjector {
    enabled: bool,
    next_id: AtomicU64,
    fired: AtomicU64,
    rules: RwLock<Vec<ActiveRule>>,
    blocked: Mutex<BlockedTable>,
    blocked_changed: Condvar,
}

impl FaultInjector {
    /// Creates an injector. A disabled injector accepts rules but never
    /// fires them.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            fired: AtomicU64::new(0),
            rules: RwLock::new(Vec::new()),
            blocked: Mutex::new(BlockedTable::default()),
            blocked_changed: Condvar::new(),
        }
    }

    /// Returns whether the injector fires rules.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a rule after all existing rules.
    pub fn inject(&self, rule: FaultRule) -> FaultId {
        let id = FaultId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(?id, ?rule, "fault rule registered");
        let remaining = rule.count.map(AtomicUsize::new);
        self.rules.write().push(ActiveRule {
            id,
            rule,
            remaining,
        });
        id
    }

    /// Fails every matching call with `kind`.
    pub fn inject_error(
        &self,
        op: FaultOp,
        key: KeyMatch,
        kind: FaultKind,
        count: Option<usize>,
    ) -> FaultId {
        self.inject(Self::rule(op, key, FaultAction::Fail(kind), count))
    }

    /// Delays every matching call by `delay`.
    pub fn inject_delay(
        &self,
        op: FaultOp,
        key: KeyMatch,
        delay: Duration,
        count: Option<usize>,
    ) -> FaultId {
        self.inject(Self::rule(op, key, FaultAction::Delay(delay), count))
    }

    /// Parks every matching call until released.
    pub fn inject_block(&self, op: FaultOp, key: KeyMatch, count: Option<usize>) -> FaultId {
        self.inject(Self::rule(op, key, FaultAction::Block, count))
    }

    fn rule(op: FaultOp, key: KeyMatch, action: FaultAction, count: Option<usize>) -> FaultRule {
        let mut rule = FaultRule::new(action).op(op);
        rule.key = key;
        rule.count = count;
        rule
    }

    /// Removes a rule. Returns `false` if it was not registered.
    pub fn remove(&self, id: FaultId) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    /// Removes every rule and releases every parked call.
    pub fn clear(&self) {
        self.rules.write().clear();
        self.release_all();
    }

    /// Number of registered rules, exhausted ones included.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Number of times any rule has fired.
    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Applies the first matching rule to a call.
    ///
    /// # Errors
    ///
    /// Returns the injected error for `Fail` rules, or for `Block` rules
    /// released with [`Self::release_with_error`].
    pub fn check(
        &self,
        op: FaultOp,
        space: Option<KeySpace>,
        key: Option<&ObjectKey>,
    ) -> StoreResult<()> {
        match key {
            Some(key) => self.check_keys(op, space, &[key]),
            None => self.check_keys(op, space, &[]),
        }
    }

    /// Applies the first matching rule once to a call covering several keys.
    ///
    /// A rule matches if it matches any of `keys`, or the keyless call when
    /// `keys` is empty. The rule fires at most once: one delay, one error,
    /// one parked call, one consumed trigger.
    ///
    /// # Errors
    ///
    /// Same as [`Self::check`].
    pub fn check_keys(
        &self,
        op: FaultOp,
        space: Option<KeySpace>,
        keys: &[&ObjectKey],
    ) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let fired = {
            let rules = self.rules.read();
            rules.iter().find_map(|r| {
                let matched = if keys.is_empty() {
                    r.rule.matches(op, space, None).then_some(None)
                } else {
                    keys.iter()
                        .copied()
                        .find(|key| r.rule.matches(op, space, Some(*key)))
                        .map(Some)
                };
                matched
                    .filter(|_| r.try_fire())
                    .map(|key| (r.rule.action.clone(), key))
            })
        };
        let Some((action, key)) = fired else {
            return Ok(());
        };

        self.fired.fetch_add(1, Ordering::Relaxed);
        debug!(%op, ?space, ?key, keys = keys.len(), ?action, "fault fired");

        match action {
            FaultAction::Delay(delay) => {
                thread::sleep(delay);
                Ok(())
            }
            FaultAction::Fail(kind) => Err(kind.into_error(op)),
            FaultAction::Block => self.block(op, space, key),
        }
    }

    fn block(&self, op: FaultOp, space: Option<KeySpace>, key: Option<&ObjectKey>) -> StoreResult<()> {
        let id = BlockedId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.blocked.lock();
        table.entries.push(BlockedEntry {
            call: BlockedCall {
                id,
                op,
                space,
                key: key.cloned(),
            },
            resolution: None,
        });
        self.blocked_changed.notify_all();

        loop {
            let position = table
                .entries
                .iter()
                .position(|e| e.call.id == id && e.resolution.is_some());
            if let Some(position) = position {
                let entry = table.entries.remove(position);
                return match entry.resolution {
                    Some(Resolution::Fail(kind)) => Err(kind.into_error(op)),
                    _ => Ok(()),
                };
            }
            self.blocked_changed.wait(&mut table);
        }
    }

    /// Returns the calls currently parked.
    #[must_use]
    pub fn blocked_calls(&self) -> Vec<BlockedCall> {
        self.blocked
            .lock()
            .pending()
            .map(|e| e.call.clone())
            .collect()
    }

    /// Waits until at least `n` calls are parked.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_blocked(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut table = self.blocked.lock();
        while table.pending().count() < n {
            if self
                .blocked_changed
                .wait_until(&mut table, deadline)
                .timed_out()
            {
                return table.pending().count() >= n;
            }
        }
        true
    }

    /// Lets a parked call run the real backend operation.
    pub fn release(&self, id: BlockedId) -> bool {
        self.resolve(id, Resolution::Proceed)
    }

    /// Makes a parked call fail with `kind`.
    pub fn release_with_error(&self, id: BlockedId, kind: FaultKind) -> bool {
        self.resolve(id, Resolution::Fail(kind))
    }

    fn resolve(&self, id: BlockedId, resolution: Resolution) -> bool {
        let released = self.blocked.lock().resolve(id, resolution);
        if released {
            self.blocked_changed.notify_all();
        }
        released
    }

    /// Releases parked calls of kind `op` (any kind if `None`) whose key
    /// matches. Returns the number released.
    pub fn release_matching(&self, op: Option<FaultOp>, key: &KeyMatch) -> usize {
        let mut table = self.blocked.lock();
        let mut released = 0;
        for entry in table.entries.iter_mut().filter(|e| e.resolution.is_none()) {
            if op.map_or(true, |op| op == entry.call.op) && key.matches(entry.call.key.as_ref()) {
                entry.resolution = Some(Resolution::Proceed);
                released += 1;
            }
        }
        drop(table);
        if released > 0 {
            self.blocked_changed.notify_all();
        }
        released
    }

    /// Releases every parked call. Returns the number released.
    pub fn release_all(&self) -> usize {
        self.release_matching(None, &KeyMatch::Any)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInjector")
            .field("enabled", &self.enabled)
            .field("rules", &self.rule_count())
            .field("blocked", &self.blocked.lock().pending().count())
            .field("fired", &self.fired_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::Arc;

    fn key(bytes: &[u8]) -> ObjectKey {
        ObjectKey::from_bytes(bytes).unwrap()
    }

    #[test]
    fn no_rules_pass_through() {
        let faults = FaultInjector::new(true);
        assert!(faults
            .check(FaultOp::Read, Some(KeySpace::Blob), Some(&key(b"k")))
            .is_ok());
        assert_eq!(faults.fired_count(), 0);
    }

    #[test]
    fn disabled_injector_never_fires() {
        let faults = FaultInjector::new(false);
        faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::Cancelled)));
        assert!(faults.check(FaultOp::Write, None, None).is_ok());
        assert_eq!(faults.rule_count(), 1);
    }

    #[test]
    fn fail_rule_returns_kind() {
        let faults = FaultInjector::new(true);
        faults.inject_error(FaultOp::Write, KeyMatch::Any, FaultKind::Cancelled, None);

        let err = faults
            .check(FaultOp::Write, Some(KeySpace::Tree), Some(&key(b"k")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(faults.check(FaultOp::Read, None, Some(&key(b"k"))).is_ok());
    }

    #[test]
    fn first_matching_rule_wins() {
        let faults = FaultInjector::new(true);
        faults.inject(
            FaultRule::new(FaultAction::Fail(FaultKind::Cancelled)).key(key(b"special")),
        );
        faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::BackendUnavailable)));

        let special = faults
            .check(FaultOp::Read, None, Some(&key(b"special")))
            .unwrap_err();
        let other = faults
            .check(FaultOp::Read, None, Some(&key(b"other")))
            .unwrap_err();
        assert_eq!(special.kind(), ErrorKind::Cancelled);
        assert_eq!(other.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn prefix_and_space_filters() {
        let faults = FaultInjector::new(true);
        faults.inject(
            FaultRule::new(FaultAction::Fail(FaultKind::BackendUnavailable))
                .space(KeySpace::Tree)
                .key_prefix(vec![0xaa]),
        );

        assert!(faults
            .check(FaultOp::Read, Some(KeySpace::Tree), Some(&key(&[0xaa, 1])))
            .is_err());
        assert!(faults
            .check(FaultOp::Read, Some(KeySpace::Blob), Some(&key(&[0xaa, 1])))
            .is_ok());
        assert!(faults
            .check(FaultOp::Read, Some(KeySpace::Tree), Some(&key(&[0xab, 1])))
            .is_ok());
        // Key-scoped rules never match keyless calls.
        assert!(faults.check(FaultOp::Enumerate, Some(KeySpace::Tree), None).is_ok());
    }

    #[test]
    fn counted_rule_fires_n_times() {
        let faults = FaultInjector::new(true);
        faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::Cancelled)).times(2));

        assert!(faults.check(FaultOp::Has, None, None).is_err());
        assert!(faults.check(FaultOp::Has, None, None).is_err());
        assert!(faults.check(FaultOp::Has, None, None).is_ok());
        assert_eq!(faults.fired_count(), 2);
    }

    #[test]
    fn removed_rule_stops_matching() {
        let faults = FaultInjector::new(true);
        let id = faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::Cancelled)));
        assert!(faults.remove(id));
        assert!(!faults.remove(id));
        assert!(faults.check(FaultOp::Read, None, None).is_ok());
    }

    #[test]
    fn delay_rule_sleeps_then_passes() {
        let faults = FaultInjector::new(true);
        faults.inject_delay(FaultOp::Read, KeyMatch::Any, Duration::from_millis(30), Some(1));

        let start = Instant::now();
        assert!(faults.check(FaultOp::Read, None, None).is_ok());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn blocked_call_waits_for_release() {
        let faults = Arc::new(FaultInjector::new(true));
        faults.inject_block(FaultOp::Write, KeyMatch::Any, None);

        let worker = {
            let faults = Arc::clone(&faults);
            thread::spawn(move || faults.check(FaultOp::Write, Some(KeySpace::Blob), None))
        };

        assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));
        let blocked = faults.blocked_calls();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].op, FaultOp::Write);
        assert_eq!(blocked[0].space, Some(KeySpace::Blob));
        assert!(!worker.is_finished());

        assert!(faults.release(blocked[0].id));
        assert!(worker.join().unwrap().is_ok());
        assert!(faults.blocked_calls().is_empty());
    }

    #[test]
    fn blocked_call_released_with_error() {
        let faults = Arc::new(FaultInjector::new(true));
        faults.inject_block(FaultOp::Read, KeyMatch::Any, Some(1));

        let worker = {
            let faults = Arc::clone(&faults);
            thread::spawn(move || faults.check(FaultOp::Read, None, None))
        };

        assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));
        let id = faults.blocked_calls()[0].id;
        assert!(faults.release_with_error(id, FaultKind::BackendUnavailable));
        let err = worker.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn release_matching_is_selective() {
        let faults = Arc::new(FaultInjector::new(true));
        faults.inject_block(FaultOp::Read, KeyMatch::Any, None);

        let spawn = |k: &'static [u8]| {
            let faults = Arc::clone(&faults);
            thread::spawn(move || faults.check(FaultOp::Read, None, Some(&key(k))))
        };
        let first = spawn(b"first");
        let second = spawn(b"second");
        assert!(faults.wait_for_blocked(2, Duration::from_secs(5)));

        let released = faults.release_matching(Some(FaultOp::Read), &KeyMatch::Exact(key(b"first")));
        assert_eq!(released, 1);
        assert!(first.join().unwrap().is_ok());
        assert_eq!(faults.blocked_calls().len(), 1);

        assert_eq!(faults.release_all(), 1);
        assert!(second.join().unwrap().is_ok());
    }

    #[test]
    fn wait_for_blocked_times_out() {
        let faults = FaultInjector::new(true);
        assert!(!faults.wait_for_blocked(1, Duration::from_millis(20)));
        assert!(faults.wait_for_blocked(0, Duration::from_millis(20)));
    }

    #[test]
    fn clear_removes_rules_and_releases() {
        let faults = Arc::new(FaultInjector::new(true));
        faults.inject_block(FaultOp::Has, KeyMatch::Any, None);

        let worker = {
            let faults = Arc::clone(&faults);
            thread::spawn(move || faults.check(FaultOp::Has, None, None))
        };
        assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));

        faults.clear();
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(faults.rule_count(), 0);
        assert!(faults.check(FaultOp::Has, None, None).is_ok());
    }

    #[test]
    fn multi_key_call_fires_once() {
        let faults = FaultInjector::new(true);
        faults.inject_delay(FaultOp::Write, KeyMatch::Any, Duration::from_millis(20), None);
        let keys: Vec<ObjectKey> = (0u8..10).map(|i| key(&[i])).collect();
        let refs: Vec<&ObjectKey> = keys.iter().collect();

        let start = Instant::now();
        assert!(faults.check_keys(FaultOp::Write, Some(KeySpace::Blob), &refs).is_ok());
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(faults.fired_count(), 1);
    }

    #[test]
    fn multi_key_call_matches_any_key_and_consumes_one_trigger() {
        let faults = FaultInjector::new(true);
        faults.inject(
            FaultRule::new(FaultAction::Fail(FaultKind::BackendUnavailable))
                .key(key(b"third"))
                .times(2),
        );
        let keys = [key(b"first"), key(b"second"), key(b"third")];
        let refs: Vec<&ObjectKey> = keys.iter().collect();

        assert!(faults.check_keys(FaultOp::Write, None, &refs).is_err());
        assert!(faults.check_keys(FaultOp::Write, None, &refs[..2]).is_ok());
        assert!(faults.check_keys(FaultOp::Write, None, &refs).is_err());
        assert!(faults.check_keys(FaultOp::Write, None, &refs).is_ok());
        assert_eq!(faults.fired_count(), 2);

        // A key-scoped rule never matches the keyless form.
        faults.inject(FaultRule::new(FaultAction::Fail(FaultKind::Cancelled)).key(key(b"k")));
        assert!(faults.check_keys(FaultOp::Write, None, &[]).is_ok());
    }

    #[test]
    fn multi_key_call_parks_once() {
        let faults = Arc::new(FaultInjector::new(true));
        faults.inject_block(FaultOp::Write, KeyMatch::Any, None);

        let worker = {
            let faults = Arc::clone(&faults);
            thread::spawn(move || {
                let keys = [key(b"a"), key(b"b"), key(b"c")];
                let refs: Vec<&ObjectKey> = keys.iter().collect();
                faults.check_keys(FaultOp::Write, Some(KeySpace::Tree), &refs)
            })
        };

        assert!(faults.wait_for_blocked(1, Duration::from_secs(5)));
        let blocked = faults.blocked_calls();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].key, Some(key(b"a")));
        assert!(faults.release(blocked[0].id));

        assert!(worker.join().unwrap().is_ok());
        assert!(faults.blocked_calls().is_empty());
        assert_eq!(faults.fired_count(), 1);
    }
}
