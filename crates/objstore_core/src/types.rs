//! Core type definitions for the object store.

use crate::error::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// An immutable object payload.
///
/// The store never interprets payload bytes. `Bytes` makes handing the same
/// payload to several readers a reference-count bump.
pub type StoredObject = bytes::Bytes;

/// Content-derived identifier of a stored object.
///
/// Keys are normally a digest of the payload (20-byte SHA-1 or 32-byte
/// SHA-256). Backends assume `key == hash(payload)` but never check it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(Vec<u8>);

impl ObjectKey {
    /// Maximum key length in bytes. The log format stores the length in one byte.
    pub const MAX_LEN: usize = u8::MAX as usize;

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `bytes` is empty or longer than [`Self::MAX_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.is_empty() {
            return Err(StoreError::invalid_key("key must not be empty"));
        }
        if bytes.len() > Self::MAX_LEN {
            return Err(StoreError::invalid_key(format!(
                "key is {} bytes, maximum is {}",
                bytes.len(),
                Self::MAX_LEN
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Derives the SHA-256 key of a payload.
    #[must_use]
    pub fn digest(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).to_vec())
    }

    /// Parses a key from lowercase or uppercase hex.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` on odd length, non-hex characters, or a length
    /// outside the accepted range.
    pub fn from_hex(s: &str) -> StoreResult<Self> {
        if s.len() % 2 != 0 {
            return Err(StoreError::invalid_key("hex key has odd length"));
        }
        let bytes = s
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                let hi = hex_value(pair[0])?;
                let lo = hex_value(pair[1])?;
                Some((hi << 4) | lo)
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| StoreError::invalid_key(format!("not a hex string: {s}")))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; empty keys cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if the key starts with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Returns the lowercase hex form of the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.to_hex())
    }
}

impl AsRef<[u8]> for ObjectKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// How long the contents of a key space must survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Cached data that can be refetched. Dropped by `clear_caches`.
    Ephemeral,
    /// Data that cannot be recomputed and must survive cache clears.
    Persistent,
}

/// A logical partition of the key namespace.
///
/// All key spaces share the same backend mechanics. Identical keys in
/// different key spaces are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeySpace {
    /// File contents.
    Blob = 1,
    /// Size and hash metadata of blobs.
    BlobMetadata = 2,
    /// Directory listings.
    Tree = 3,
    /// Metadata of trees.
    TreeMetadata = 4,
    /// Mapping from local ids to the remote source's ids.
    ProxyHash = 5,
    /// Mapping from commit ids to root tree ids.
    CommitToTree = 6,
}

impl KeySpace {
    /// Every key space, in tag order.
    pub const ALL: [KeySpace; 6] = [
        Self::Blob,
        Self::BlobMetadata,
        Self::Tree,
        Self::TreeMetadata,
        Self::ProxyHash,
        Self::CommitToTree,
    ];

    /// Number of key spaces.
    pub const COUNT: usize = Self::ALL.len();

    /// Returns the stable name of the key space.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::BlobMetadata => "blobmeta",
            Self::Tree => "tree",
            Self::TreeMetadata => "treemeta",
            Self::ProxyHash => "proxy-hash",
            Self::CommitToTree => "commit-to-tree",
        }
    }

    /// Returns the persistence class of the key space.
    #[must_use]
    pub const fn persistence(self) -> Persistence {
        match self {
            Self::ProxyHash => Persistence::Persistent,
            _ => Persistence::Ephemeral,
        }
    }

    /// Returns `true` if the key space may be dropped by a cache clear.
    #[must_use]
    pub const fn is_ephemeral(self) -> bool {
        matches!(self.persistence(), Persistence::Ephemeral)
    }

    /// Converts the key space to its on-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Converts an on-disk tag to a key space.
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|space| space.as_byte() == b)
    }

    /// Dense index of the key space, usable for per-space arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeySpace {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|space| space.name() == s)
            .ok_or_else(|| StoreError::invalid_key(format!("unknown key space: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rejects_empty_and_oversized() {
        assert!(ObjectKey::from_bytes(&[]).is_err());
        assert!(ObjectKey::from_bytes(&[7; 256]).is_err());
        assert_eq!(ObjectKey::from_bytes(&[7; 255]).unwrap().len(), 255);
    }

    #[test]
    fn digest_is_sha256() {
        let key = ObjectKey::digest(b"abc");
        assert_eq!(key.len(), 32);
        assert_eq!(
            key.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_parsing() {
        let key = ObjectKey::from_hex("00ffAb").unwrap();
        assert_eq!(key.as_bytes(), &[0x00, 0xff, 0xab]);
        assert_eq!(key.to_string(), "00ffab");
        assert!(ObjectKey::from_hex("abc").is_err());
        assert!(ObjectKey::from_hex("zz").is_err());
        assert!(ObjectKey::from_hex("").is_err());
    }

    #[test]
    fn key_space_tags_are_stable() {
        for space in KeySpace::ALL {
            assert_eq!(KeySpace::from_byte(space.as_byte()), Some(space));
            assert_eq!(space.name().parse::<KeySpace>().unwrap(), space);
        }
        assert_eq!(KeySpace::from_byte(0), None);
        assert_eq!(KeySpace::from_byte(7), None);
        assert_eq!(KeySpace::Blob.index(), 0);
        assert_eq!(KeySpace::CommitToTree.index(), KeySpace::COUNT - 1);
    }

    #[test]
    fn only_proxy_hash_is_persistent() {
        let persistent: Vec<_> = KeySpace::ALL
            .into_iter()
            .filter(|s| !s.is_ephemeral())
            .collect();
        assert_eq!(persistent, vec![KeySpace::ProxyHash]);
    }

    #[test]
    fn prefix_matching() {
        let key = ObjectKey::from_bytes(b"abcdef").unwrap();
        assert!(key.starts_with(b"abc"));
        assert!(!key.starts_with(b"abd"));
    }
}
