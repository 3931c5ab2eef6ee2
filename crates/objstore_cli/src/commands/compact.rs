//! Compact command implementation.

use super::{format_size, open_existing};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, clear_caches: bool) -> Result<(), Box<dyn std::error::Error>> {
    let before = file_size(path)?;
    println!("Compacting {}", path.display());

    let store = open_existing(path)?;
    if clear_caches {
        store.clear_caches_and_compact_all()?;
    } else {
        store.compact()?;
    }
    store.close()?;

    let after = file_size(path)?;
    println!("  Size before: {}", format_size(before));
    println!("  Size after:  {}", format_size(after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(before.saturating_sub(after)),
        if before > 0 {
            before.saturating_sub(after) as f64 / before as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}

fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
