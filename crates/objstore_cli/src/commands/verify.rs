//! Verify command implementation.

use super::format_size;
use objstore_core::{LogBackend, VerifyReport};
use serde::Serialize;
use std::path::Path;

/// Serializable view of a verification report.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Log file size in bytes.
    pub file_size: u64,
    /// Committed transactions.
    pub committed_transactions: u64,
    /// Intact records.
    pub records: u64,
    /// Keys visible after recovery.
    pub live_entries: usize,
    /// Bytes recovery would discard.
    pub torn_tail_bytes: u64,
    /// `true` when nothing would be discarded.
    pub clean: bool,
}

impl From<&VerifyReport> for VerifyResult {
    fn from(report: &VerifyReport) -> Self {
        Self {
            file_size: report.file_size,
            committed_transactions: report.committed_transactions,
            records: report.records,
            live_entries: report.live_entries,
            torn_tail_bytes: report.torn_tail_bytes,
            clean: report.is_clean(),
        }
    }
}

/// Runs the verify command.
///
/// Corruption is reported as an error; a torn tail is reported but is not
/// an error, since the next open truncates it.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = LogBackend::verify(path)?;
    let result = VerifyResult::from(&report);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Verifying log at {}", path.display());
    println!();
    println!("  File size:        {}", format_size(result.file_size));
    println!("  Records:          {}", result.records);
    println!("  Transactions:     {}", result.committed_transactions);
    println!("  Live keys:        {}", result.live_entries);
    if result.clean {
        println!();
        println!("✓ Log is clean");
    } else {
        println!(
            "  Torn tail:        {} (discarded on next open)",
            format_size(result.torn_tail_bytes)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore_core::{Backend, KeySpace, ObjectKey, StoreConfig};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn torn_tail_is_not_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.log");
        {
            let backend = LogBackend::open(&path, StoreConfig::default()).unwrap();
            backend
                .put(KeySpace::Blob, &ObjectKey::digest(b"x"), b"x")
                .unwrap();
        }
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"OREC")
            .unwrap();

        let result = VerifyResult::from(&LogBackend::verify(&path).unwrap());
        assert!(!result.clean);
        assert_eq!(result.torn_tail_bytes, 4);
        assert_eq!(result.live_entries, 1);
    }
}
