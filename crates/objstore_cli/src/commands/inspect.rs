//! Inspect command implementation.

use super::format_size;
use objstore_core::{LogBackend, StoreConfig};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Log file size in bytes.
    pub file_size: u64,
    /// Keys across all key spaces.
    pub live_entries: usize,
    /// Payload bytes across all key spaces.
    pub live_bytes: u64,
    /// Per key space breakdown.
    pub spaces: Vec<SpaceSummary>,
}

/// Statistics for a single key space.
#[derive(Debug, Serialize)]
pub struct SpaceSummary {
    /// Key space name.
    pub name: &'static str,
    /// Whether the space survives cache clearing.
    pub persistent: bool,
    /// Number of keys.
    pub entries: usize,
    /// Payload bytes.
    pub bytes: u64,
}

/// Opens the store and collects its statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No log file found at {}", path.display()).into());
    }
    let backend = LogBackend::open(path, StoreConfig::default().create_if_missing(false))?;
    let spaces: Vec<SpaceSummary> = backend
        .space_stats()
        .into_iter()
        .map(|stats| SpaceSummary {
            name: stats.space.name(),
            persistent: !stats.space.is_ephemeral(),
            entries: stats.entries,
            bytes: stats.bytes,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: backend.file_size(),
        live_entries: spaces.iter().map(|s| s.entries).sum(),
        live_bytes: spaces.iter().map(|s| s.bytes).sum(),
        spaces,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("objstore Inspection");
    println!("===================");
    println!();
    println!("Path: {}", result.path);
    println!("File size:    {}", format_size(result.file_size));
    println!("Live payload: {}", format_size(result.live_bytes));
    println!("Live keys:    {}", result.live_entries);
    println!();
    println!("Key spaces:");
    for space in &result.spaces {
        let kind = if space.persistent { "persistent" } else { "cache" };
        println!(
            "  {:<16} {:>10} keys  {:>12}  ({kind})",
            space.name,
            space.entries,
            format_size(space.bytes)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore_core::{Backend, KeySpace, ObjectKey};
    use tempfile::tempdir;

    #[test]
    fn counts_each_space() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.log");
        {
            let backend = LogBackend::open(&path, StoreConfig::default()).unwrap();
            backend
                .put(KeySpace::Blob, &ObjectKey::digest(b"one"), b"one")
                .unwrap();
            backend
                .put(KeySpace::Tree, &ObjectKey::digest(b"tree"), b"tree")
                .unwrap();
        }

        let result = inspect(&path).unwrap();
        assert_eq!(result.live_entries, 2);
        assert_eq!(result.live_bytes, 7);
        let blob = result.spaces.iter().find(|s| s.name == "blob").unwrap();
        assert_eq!(blob.entries, 1);
        assert!(!blob.persistent);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.log")).is_err());
        assert!(!dir.path().join("absent.log").exists());
    }
}
