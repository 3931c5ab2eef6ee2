//! Log record types and serialization.
//!
//! Every record is framed as:
//!
//! ```text
//! magic "OREC" (4) | type (1) | payload length u32 LE (4) | payload | crc32 (4)
//! ```
//!
//! The CRC covers everything before it. A transaction is the sequence
//! `Begin`, zero or more `Put`/`Clear`, `Commit`, all sharing one txid.

use crate::error::{StoreError, StoreResult};
use crate::types::{KeySpace, ObjectKey};

/// Magic bytes at the start of the backing file.
pub const FILE_MAGIC: [u8; 4] = *b"OBJS";

/// Current file format version.
pub const FILE_VERSION: u16 = 1;

/// File header: magic (4) + version (2) + reserved (2).
pub const FILE_HEADER_SIZE: usize = 8;

/// Magic bytes identifying a record.
pub const RECORD_MAGIC: [u8; 4] = *b"OREC";

/// Record header: magic (4) + type (1) + length (4).
pub const RECORD_HEADER_SIZE: usize = 9;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Fixed part of a `Put` payload before the key bytes:
/// txid (8) + space (1) + key length (1).
const PUT_PREFIX_SIZE: usize = 10;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Start of a transaction.
    Begin = 1,
    /// Store a payload under a key.
    Put = 2,
    /// Remove every key of a key space.
    Clear = 3,
    /// End of a transaction; its operations become visible.
    Commit = 4,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Clear),
            4 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Start of a transaction.
    Begin {
        /// Transaction id.
        txid: u64,
    },
    /// Store `value` under `key` in `space`.
    Put {
        /// Transaction id.
        txid: u64,
        /// Target key space.
        space: KeySpace,
        /// Object key.
        key: ObjectKey,
        /// Object payload.
        value: Vec<u8>,
    },
    /// Remove every key of `space`.
    Clear {
        /// Transaction id.
        txid: u64,
        /// Key space to clear.
        space: KeySpace,
    },
    /// End of a transaction.
    Commit {
        /// Transaction id.
        txid: u64,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Put { .. } => RecordType::Put,
            Self::Clear { .. } => RecordType::Clear,
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    /// Returns the transaction id of the record.
    #[must_use]
    pub fn txid(&self) -> u64 {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Clear { txid, .. }
            | Self::Commit { txid } => *txid,
        }
    }

    /// Decodes a record payload.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> StoreResult<Self> {
        let mut cursor = Cursor::new(payload);
        let record = match record_type {
            RecordType::Begin => Self::Begin {
                txid: cursor.read_u64()?,
            },
            RecordType::Commit => Self::Commit {
                txid: cursor.read_u64()?,
            },
            RecordType::Clear => Self::Clear {
                txid: cursor.read_u64()?,
                space: cursor.read_space()?,
            },
            RecordType::Put => {
                let txid = cursor.read_u64()?;
                let space = cursor.read_space()?;
                let key_len = usize::from(cursor.read_u8()?);
                let key = ObjectKey::from_bytes(cursor.read_bytes(key_len)?)
                    .map_err(|e| StoreError::corrupted(format!("bad key in put record: {e}")))?;
                let value_len = cursor.read_u32()? as usize;
                let value = cursor.read_bytes(value_len)?.to_vec();
                Self::Put {
                    txid,
                    space,
                    key,
                    value,
                }
            }
        };

        if cursor.remaining() != 0 {
            return Err(StoreError::corrupted(format!(
                "{} trailing bytes in {record_type:?} record",
                cursor.remaining()
            )));
        }
        Ok(record)
    }
}

/// Offset of the value bytes from the start of a framed `Put` record.
#[must_use]
pub fn put_value_offset(key_len: usize) -> usize {
    RECORD_HEADER_SIZE + PUT_PREFIX_SIZE + key_len + 4
}

/// Builds the byte image of one transaction.
///
/// Records are appended to an in-memory buffer so the whole transaction can
/// be written with a single append.
#[derive(Debug)]
pub struct TxnEncoder {
    txid: u64,
    buf: Vec<u8>,
}

impl TxnEncoder {
    /// Starts a transaction image with its `Begin` record.
    #[must_use]
    pub fn begin(txid: u64) -> Self {
        let mut encoder = Self {
            txid,
            buf: Vec::new(),
        };
        encoder.frame(RecordType::Begin, &txid.to_le_bytes());
        encoder
    }

    /// Appends a `Put` record and returns the offset of the value bytes
    /// relative to the start of the image.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the value exceeds the
    /// 4 GiB record limit.
    pub fn put(&mut self, space: KeySpace, key: &ObjectKey, value: &[u8]) -> StoreResult<usize> {
        let key_len = key.len();
        let payload_len = PUT_PREFIX_SIZE + key_len + 4 + value.len();
        if u32::try_from(payload_len).is_err() {
            return Err(StoreError::unavailable(format!(
                "payload of {} bytes exceeds the record size limit",
                value.len()
            )));
        }
        let value_len = value.len() as u32;
        let mut payload = Vec::with_capacity(payload_len);
        payload.extend_from_slice(&self.txid.to_le_bytes());
        payload.push(space.as_byte());
        // ObjectKey guarantees 1..=255 bytes.
        payload.push(key_len as u8);
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(&value_len.to_le_bytes());
        payload.extend_from_slice(value);

        let frame_start = self.buf.len();
        self.frame(RecordType::Put, &payload);
        Ok(frame_start + put_value_offset(key_len))
    }

    /// Bytes encoded so far.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.buf.len()
    }

    /// Appends a `Clear` record.
    pub fn clear(&mut self, space: KeySpace) {
        let mut payload = Vec::with_capacity(9);
        payload.extend_from_slice(&self.txid.to_le_bytes());
        payload.push(space.as_byte());
        self.frame(RecordType::Clear, &payload);
    }

    /// Appends the `Commit` record and returns the finished image.
    #[must_use]
    pub fn commit(mut self) -> Vec<u8> {
        let txid = self.txid;
        self.frame(RecordType::Commit, &txid.to_le_bytes());
        self.buf
    }

    fn frame(&mut self, record_type: RecordType, payload: &[u8]) {
        let start = self.buf.len();
        self.buf.extend_from_slice(&RECORD_MAGIC);
        self.buf.push(record_type.as_byte());
        // Put payloads are bounded in `put`; the others are tiny.
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
        let crc = compute_crc32(&self.buf[start..]);
        self.buf.extend_from_slice(&crc.to_le_bytes());
    }
}

/// Encodes the file header.
#[must_use]
pub fn encode_file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[0..4].copy_from_slice(&FILE_MAGIC);
    header[4..6].copy_from_slice(&FILE_VERSION.to_le_bytes());
    header
}

/// Validates a file header.
pub fn check_file_header(header: &[u8]) -> StoreResult<()> {
    if header.len() < FILE_HEADER_SIZE || header[0..4] != FILE_MAGIC {
        return Err(StoreError::corrupted("missing file header magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > FILE_VERSION {
        return Err(StoreError::corrupted(format!(
            "unsupported format version {version}"
        )));
    }
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(StoreError::corrupted("unexpected end of record payload"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> StoreResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> StoreResult<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self) -> StoreResult<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_space(&mut self) -> StoreResult<KeySpace> {
        let tag = self.read_u8()?;
        KeySpace::from_byte(tag)
            .ok_or_else(|| StoreError::corrupted(format!("unknown key space tag {tag}")))
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
