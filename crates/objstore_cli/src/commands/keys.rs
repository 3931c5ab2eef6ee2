//! Key listing and clearing.

use super::open_existing;
use objstore_core::{KeySpace, ObjectKey};
use std::path::Path;

/// Returns up to `limit` keys of `space`, sorted.
pub fn collect_keys(
    path: &Path,
    space: KeySpace,
    limit: Option<usize>,
) -> Result<Vec<ObjectKey>, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let mut keys: Vec<ObjectKey> = store.enumerate(space)?.collect();
    keys.sort();
    if let Some(limit) = limit {
        keys.truncate(limit);
    }
    Ok(keys)
}

/// Prints the keys of `space` in hex, one per line.
pub fn dump(
    path: &Path,
    space: KeySpace,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    for key in collect_keys(path, space, limit)? {
        println!("{key}");
    }
    Ok(())
}

/// Removes every key of `space`.
pub fn clear(path: &Path, space: KeySpace) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let removed = store.enumerate(space)?.count();
    store.clear_key_space(space)?;
    store.close()?;
    println!("Cleared {removed} keys from {space}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore_core::{Backend, LogBackend, StoreConfig};
    use tempfile::tempdir;

    #[test]
    fn lists_sorted_and_clears() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.log");
        let mut expected = Vec::new();
        {
            let backend = LogBackend::open(&path, StoreConfig::default()).unwrap();
            for payload in [&b"a"[..], b"b", b"c"] {
                let key = ObjectKey::digest(payload);
                backend.put(KeySpace::Blob, &key, payload).unwrap();
                expected.push(key);
            }
        }
        expected.sort();

        assert_eq!(collect_keys(&path, KeySpace::Blob, None).unwrap(), expected);
        assert_eq!(
            collect_keys(&path, KeySpace::Blob, Some(2)).unwrap(),
            expected[..2]
        );

        clear(&path, KeySpace::Blob).unwrap();
        assert!(collect_keys(&path, KeySpace::Blob, None).unwrap().is_empty());
    }
}
