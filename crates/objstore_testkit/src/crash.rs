//! Crash recovery testing for the log backend.
//!
//! A crash is simulated by appending a damaged transaction image straight to
//! the data file of a closed store, the way an interrupted write would leave
//! it. Reopening must then yield exactly the state before that write.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objstore_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::new()?;
//! harness.commit_baseline(10)?;
//! let result = harness.crash_and_recover(CrashPoint::BeforeCommit)?;
//! assert!(result.passed, "{result:?}");
//! ```

use crate::fixtures::LOG_FILE_NAME;
use objstore_core::log::record::{TxnEncoder, CRC_SIZE, RECORD_HEADER_SIZE};
use objstore_core::{
    Backend, KeySpace, LogBackend, ObjectKey, StoreConfig, StoreError, StoreResult,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where the simulated crash interrupts a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Inside the `Begin` record.
    DuringBegin,
    /// Inside a `Put` record.
    DuringPut,
    /// After every `Put`, before any byte of `Commit`.
    BeforeCommit,
    /// Inside the `Commit` record.
    DuringCommit,
    /// The whole image was written but the last byte is damaged.
    CorruptCommit,
    /// After an arbitrary number of bytes of the image.
    AfterBytes(usize),
}

impl CrashPoint {
    /// Every named crash point.
    pub const NAMED: [CrashPoint; 5] = [
        Self::DuringBegin,
        Self::DuringPut,
        Self::BeforeCommit,
        Self::DuringCommit,
        Self::CorruptCommit,
    ];

    /// Applies the crash to a transaction image, returning what reached the
    /// disk.
    pub fn damage(self, image: &[u8]) -> Vec<u8> {
        // Begin and Commit frames carry an 8 byte txid.
        let marker_frame = RECORD_HEADER_SIZE + 8 + CRC_SIZE;
        let cut = match self {
            Self::DuringBegin => marker_frame / 2,
            Self::DuringPut => marker_frame + RECORD_HEADER_SIZE + 3,
            Self::BeforeCommit => image.len() - marker_frame,
            Self::DuringCommit => image.len() - 1,
            Self::CorruptCommit => {
                let mut damaged = image.to_vec();
                if let Some(last) = damaged.last_mut() {
                    *last ^= 0xff;
                }
                return damaged;
            }
            Self::AfterBytes(n) => n,
        };
        image[..cut.min(image.len())].to_vec()
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// The simulated crash.
    pub point: CrashPoint,
    /// Keys expected after recovery.
    pub expected_entries: usize,
    /// Keys found after recovery.
    pub actual_entries: usize,
    /// What went wrong, if anything.
    pub error: Option<String>,
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    _temp_dir: TempDir,
    path: PathBuf,
    baseline: Vec<ObjectKey>,
    next_seed: u64,
}

impl CrashRecoveryHarness {
    /// Creates a harness with an empty store in a temporary directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory or store cannot be created.
    pub fn new() -> StoreResult<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(LOG_FILE_NAME);
        LogBackend::open(&path, StoreConfig::default())?.close()?;
        Ok(Self {
            _temp_dir: temp_dir,
            path,
            baseline: Vec::new(),
            next_seed: 0,
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commits `n` blobs through a normal store and remembers them.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened or written.
    pub fn commit_baseline(&mut self, n: usize) -> StoreResult<()> {
        let backend = self.open()?;
        for _ in 0..n {
            let payload = self.next_payload();
            let key = ObjectKey::digest(&payload);
            backend.put(KeySpace::Blob, &key, &payload)?;
            self.baseline.push(key);
        }
        backend.close()
    }

    /// Appends an interrupted three-entry transaction, reopens the store and
    /// checks that only the baseline survived.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors; a recovery mismatch is reported in the result.
    pub fn crash_and_recover(&mut self, point: CrashPoint) -> StoreResult<CrashRecoveryResult> {
        let mut txn = TxnEncoder::begin(u64::from(u32::MAX) + self.next_seed);
        let mut torn_keys = Vec::new();
        for _ in 0..3 {
            let payload = self.next_payload();
            let key = ObjectKey::digest(&payload);
            txn.put(KeySpace::Blob, &key, &payload)?;
            torn_keys.push(key);
        }
        let image = txn.commit();
        self.append_raw(&point.damage(&image))?;

        let backend = self.open()?;
        let mut errors = Vec::new();
        for key in &self.baseline {
            if !backend.has(KeySpace::Blob, key)? {
                errors.push(format!("committed key {key} lost"));
            }
        }
        for key in &torn_keys {
            if backend.has(KeySpace::Blob, key)? {
                errors.push(format!("torn key {key} visible"));
            }
        }
        let actual_entries = backend.live_entries();
        backend.close()?;

        let report = LogBackend::verify(&self.path)?;
        if !report.is_clean() {
            errors.push(format!(
                "{} torn bytes left after recovery",
                report.torn_tail_bytes
            ));
        }

        let expected_entries = self.baseline.len();
        if actual_entries != expected_entries {
            errors.push(format!(
                "expected {expected_entries} entries, found {actual_entries}"
            ));
        }
        Ok(CrashRecoveryResult {
            passed: errors.is_empty(),
            point,
            expected_entries,
            actual_entries,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        })
    }

    /// Runs every named crash point in turn.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn run_all(&mut self) -> StoreResult<Vec<CrashRecoveryResult>> {
        CrashPoint::NAMED
            .into_iter()
            .map(|point| self.crash_and_recover(point))
            .collect()
    }

    fn open(&self) -> StoreResult<LogBackend> {
        LogBackend::open(&self.path, StoreConfig::default().create_if_missing(false))
    }

    fn append_raw(&self, bytes: &[u8]) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io("cannot open data file", e))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn next_payload(&mut self) -> Vec<u8> {
        self.next_seed += 1;
        format!("crash-payload-{}", self.next_seed).into_bytes()
    }
}
