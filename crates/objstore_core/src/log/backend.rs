//! Durable backend over a single append-only log file.

use crate::backend::{Backend, BackendKind, KeyIter};
use crate::cancel::CancelGuard;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::log::file::{remove_if_exists, sibling_path, sync_parent_dir, LockFile, LogFile};
use crate::log::index::{Index, IndexOp, ValueLocation};
use crate::log::record::TxnEncoder;
use crate::log::replay::replay;
use crate::types::{KeySpace, ObjectKey, StoredObject};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Target size of one compaction transaction.
const COMPACT_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Entry count and payload bytes of one key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceStats {
    /// The key space.
    pub space: KeySpace,
    /// Number of live keys.
    pub entries: usize,
    /// Total payload bytes of the live keys.
    pub bytes: u64,
}

/// Result of a read-only scan of a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Transactions with a valid `Commit` record.
    pub committed_transactions: u64,
    /// Intact records, including those of an unfinished trailing transaction.
    pub records: u64,
    /// Keys visible after recovery, across all key spaces.
    pub live_entries: usize,
    /// Bytes after the last commit that recovery would discard.
    pub torn_tail_bytes: u64,
    /// Per key space breakdown.
    pub spaces: Vec<SpaceStats>,
}

impl VerifyReport {
    /// Returns `true` if recovery would not discard anything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.torn_tail_bytes == 0
    }
}

#[derive(Debug)]
struct WriterState {
    next_txid: u64,
}

enum TxnOp<'a> {
    Put {
        space: KeySpace,
        key: &'a ObjectKey,
        payload: &'a [u8],
    },
    Clear(KeySpace),
}

/// A durable backend storing every key space in one log file.
///
/// Each `put`, `put_batch` or `clear` becomes one transaction, appended with
/// a single write and made durable before the in-memory index is updated.
/// Readers therefore see a transaction entirely or not at all.
///
/// # Locking
///
/// - `writer` serializes mutations and compaction
/// - `index` is always taken before `file`
///
/// # Example
///
/// ```no_run
/// use objstore_core::{Backend, KeySpace, LogBackend, ObjectKey, StoreConfig};
///
/// let backend = LogBackend::open("cache/objects.log", StoreConfig::default()).unwrap();
/// let key = ObjectKey::digest(b"payload");
/// backend.put(KeySpace::Blob, &key, b"payload").unwrap();
/// backend.close().unwrap();
/// ```
#[derive(Debug)]
pub struct LogBackend {
    path: PathBuf,
    config: StoreConfig,
    writer: Mutex<WriterState>,
    file: Mutex<Option<LogFile>>,
    index: RwLock<Index>,
    lock: Mutex<Option<LockFile>>,
    closed: AtomicBool,
}

impl LogBackend {
    /// Opens the store file at `path`, recovering committed transactions.
    ///
    /// A torn tail left by a crash is truncated away. A stale compaction
    /// file is removed.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the file is missing and
    /// `create_if_missing` is off, if another instance holds the lock, on
    /// I/O failure, or if the file is corrupt.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::unavailable(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::io(format!("cannot create {}", parent.display()), e)
                })?;
            }
        }

        let lock = LockFile::acquire(&path)?;
        if remove_if_exists(&sibling_path(&path, ".compact"))? {
            warn!(path = %path.display(), "removed unfinished compaction file");
        }

        let mut file = LogFile::open(&path, config.create_if_missing)?;
        let file_len = file.len();
        let recovered = replay(file.reader()?, file_len)?;
        if recovered.torn_bytes > 0 {
            warn!(
                path = %path.display(),
                torn_bytes = recovered.torn_bytes,
                committed_end = recovered.committed_end,
                "discarding torn tail"
            );
            file.truncate(recovered.committed_end)?;
        }
        info!(
            path = %path.display(),
            transactions = recovered.transactions,
            entries = recovered.index.total_entries(),
            file_size = file.len(),
            "opened log store"
        );

        let backend = Self {
            path,
            config,
            writer: Mutex::new(WriterState {
                next_txid: recovered.next_txid,
            }),
            file: Mutex::new(Some(file)),
            index: RwLock::new(recovered.index),
            lock: Mutex::new(Some(lock)),
            closed: AtomicBool::new(false),
        };

        if backend.config.clear_ephemeral_on_open {
            let clears = KeySpace::ALL
                .iter()
                .filter(|space| space.is_ephemeral())
                .map(|&space| TxnOp::Clear(space))
                .collect();
            backend.commit(clears)?;
            debug!("cleared ephemeral key spaces on open");
        }
        Ok(backend)
    }

    /// Scans the file at `path` without modifying it.
    ///
    /// Takes no lock, so it can inspect a file another instance has open.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` describing the first corruption found.
    pub fn verify(path: impl AsRef<Path>) -> StoreResult<VerifyReport> {
        let mut file = LogFile::open_read_only(path.as_ref())?;
        let file_size = file.len();
        let recovered = replay(file.reader()?, file_size)?;
        Ok(VerifyReport {
            file_size,
            committed_transactions: recovered.transactions,
            records: recovered.records,
            live_entries: recovered.index.total_entries(),
            torn_tail_bytes: recovered.torn_bytes,
            spaces: space_stats(&recovered.index),
        })
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the data file, or 0 once closed.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file.lock().as_ref().map_or(0, LogFile::len)
    }

    /// Number of live keys across all key spaces.
    #[must_use]
    pub fn live_entries(&self) -> usize {
        self.index.read().total_entries()
    }

    /// Entry counts and payload bytes per key space.
    #[must_use]
    pub fn space_stats(&self) -> Vec<SpaceStats> {
        space_stats(&self.index.read())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        Ok(())
    }

    /// Appends one transaction and publishes it to the index.
    ///
    /// Puts of keys already present and clears of empty spaces are dropped;
    /// nothing is written if no operation remains.
    fn commit(&self, ops: Vec<TxnOp<'_>>) -> StoreResult<()> {
        let _guard = CancelGuard::enter();
        self.ensure_open()?;
        let mut writer = self.writer.lock();

        let ops = {
            let index = self.index.read();
            let mut seen: HashSet<(KeySpace, &ObjectKey)> = HashSet::new();
            let mut cleared: HashSet<KeySpace> = HashSet::new();
            let mut kept = Vec::with_capacity(ops.len());
            for op in ops {
                match op {
                    TxnOp::Put { space, key, .. } => {
                        let present = !cleared.contains(&space) && index.contains(space, key);
                        if present || !seen.insert((space, key)) {
                            continue;
                        }
                    }
                    TxnOp::Clear(space) => {
                        let pending_put = seen.iter().any(|(s, _)| *s == space);
                        if index.len(space) == 0 && !pending_put {
                            continue;
                        }
                        seen.retain(|(s, _)| *s != space);
                        cleared.insert(space);
                    }
                }
                kept.push(op);
            }
            kept
        };
        if ops.is_empty() {
            return Ok(());
        }

        let txid = writer.next_txid;
        let mut txn = TxnEncoder::begin(txid);
        let mut index_ops = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put {
                    space,
                    key,
                    payload,
                } => {
                    let offset = txn.put(space, key, payload)?;
                    index_ops.push(IndexOp::Put {
                        space,
                        key: key.clone(),
                        location: ValueLocation {
                            offset: offset as u64,
                            len: payload.len() as u32,
                        },
                    });
                }
                TxnOp::Clear(space) => {
                    txn.clear(space);
                    index_ops.push(IndexOp::Clear(space));
                }
            }
        }
        let image = txn.commit();

        let base = {
            let mut slot = self.file.lock();
            let file = slot.as_mut().ok_or_else(closed_error)?;
            let base = file.append(&image)?;
            if self.config.sync_on_commit {
                if let Err(e) = file.sync() {
                    // Not durable, so not committed.
                    let _ = file.truncate(base);
                    return Err(e);
                }
            }
            base
        };

        writer.next_txid += 1;
        self.index
            .write()
            .apply(index_ops.into_iter().map(|op| op.rebased(base)));
        Ok(())
    }

    fn compact_locked(
        &self,
        writer: &mut WriterState,
        index: &mut Index,
        slot: &mut Option<LogFile>,
    ) -> StoreResult<()> {
        let old = slot.as_mut().ok_or_else(closed_error)?;
        let before = old.len();
        let compact_path = sibling_path(&self.path, ".compact");

        let rewritten = LogFile::create_new(&compact_path).and_then(|mut target| {
            let result = rewrite_live(old, index, &mut target, writer.next_txid)?;
            target.sync()?;
            Ok(result)
        });
        let (fresh, next_txid) = match rewritten {
            Ok(result) => result,
            Err(e) => {
                let _ = remove_if_exists(&compact_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&compact_path, &self.path) {
            let _ = remove_if_exists(&compact_path);
            return Err(StoreError::io("cannot replace data file", e));
        }
        sync_parent_dir(&self.path)?;

        match LogFile::open(&self.path, false) {
            Ok(file) => {
                info!(
                    path = %self.path.display(),
                    before,
                    after = file.len(),
                    entries = fresh.total_entries(),
                    "compaction finished"
                );
                *slot = Some(file);
                *index = fresh;
                writer.next_txid = next_txid;
                Ok(())
            }
            Err(e) => {
                // The handle points at the replaced file; nothing is safe to serve.
                *slot = None;
                self.closed.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl Backend for LogBackend {
    fn get(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<StoredObject> {
        self.ensure_open()?;
        let index = self.index.read();
        let location = index
            .get(space, key)
            .ok_or_else(|| StoreError::not_found(space, key.clone()))?;
        let mut slot = self.file.lock();
        let file = slot.as_mut().ok_or_else(closed_error)?;
        let bytes = file.read_at(location.offset, location.len as usize)?;
        Ok(StoredObject::from(bytes))
    }

    fn put(&self, space: KeySpace, key: &ObjectKey, payload: &[u8]) -> StoreResult<()> {
        self.commit(vec![TxnOp::Put {
            space,
            key,
            payload,
        }])
    }

    fn has(&self, space: KeySpace, key: &ObjectKey) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.index.read().contains(space, key))
    }

    fn put_batch(&self, space: KeySpace, entries: &[(ObjectKey, StoredObject)]) -> StoreResult<()> {
        let ops = entries
            .iter()
            .map(|(key, payload)| TxnOp::Put {
                space,
                key,
                payload: payload.as_ref(),
            })
            .collect();
        self.commit(ops)
    }

    fn enumerate(&self, space: KeySpace) -> StoreResult<KeyIter> {
        self.ensure_open()?;
        let keys = self.index.read().keys(space);
        Ok(Box::new(keys.into_iter()))
    }

    fn clear(&self, space: KeySpace) -> StoreResult<()> {
        self.commit(vec![TxnOp::Clear(space)])
    }

    fn compact(&self) -> StoreResult<()> {
        let _guard = CancelGuard::enter();
        self.ensure_open()?;
        let mut writer = self.writer.lock();
        let mut index = self.index.write();
        let mut slot = self.file.lock();
        self.compact_locked(&mut writer, &mut index, &mut slot)
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Waits for an in-flight commit.
        let _writer = self.writer.lock();
        let result = match self.file.lock().take() {
            Some(mut file) => file.sync(),
            None => Ok(()),
        };
        self.lock.lock().take();
        debug!(path = %self.path.display(), "closed log store");
        result
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Log
    }
}

impl Drop for LogBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close log store");
        }
    }
}

fn closed_error() -> StoreError {
    StoreError::unavailable("log backend is closed")
}

fn space_stats(index: &Index) -> Vec<SpaceStats> {
    KeySpace::ALL
        .iter()
        .map(|&space| SpaceStats {
            space,
            entries: index.len(space),
            bytes: index.bytes(space),
        })
        .collect()
}

/// Copies every live value of `index` from `source` into `target`.
///
/// Returns the index of the new file and the next free transaction id.
fn rewrite_live(
    source: &mut LogFile,
    index: &Index,
    target: &mut LogFile,
    first_txid: u64,
) -> StoreResult<(Index, u64)> {
    let mut fresh = Index::default();
    let mut txid = first_txid;
    let mut txn = TxnEncoder::begin(txid);
    let mut ops = Vec::new();

    for space in KeySpace::ALL {
        for (key, location) in index.entries(space) {
            let value = source.read_at(location.offset, location.len as usize)?;
            let offset = txn.put(space, key, &value)?;
            ops.push(IndexOp::Put {
                space,
                key: key.clone(),
                location: ValueLocation {
                    offset: offset as u64,
                    len: location.len,
                },
            });
            if txn.encoded_len() >= COMPACT_CHUNK_BYTES {
                let full = std::mem::replace(&mut txn, TxnEncoder::begin(txid + 1));
                append_chunk(target, full, &mut ops, &mut fresh)?;
                txid += 1;
            }
        }
    }
    if !ops.is_empty() {
        append_chunk(target, txn, &mut ops, &mut fresh)?;
        txid += 1;
    }
    Ok((fresh, txid))
}

fn append_chunk(
    target: &mut LogFile,
    txn: TxnEncoder,
    ops: &mut Vec<IndexOp>,
    index: &mut Index,
) -> StoreResult<()> {
    let base = target.append(&txn.commit())?;
    index.apply(ops.drain(..).map(|op| op.rebased(base)));
    Ok(())
}
