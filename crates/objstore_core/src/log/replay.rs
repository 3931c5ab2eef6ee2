//! Streaming record scanner and crash recovery.
//!
//! Recovery replays the log from the header onwards and applies a
//! transaction only once its `Commit` record has been read. Two situations
//! are treated as a torn tail and cut off:
//!
//! - the file ends inside a record
//! - the last record of the file fails its CRC
//!
//! Anything else that does not decode is corruption and fails the open.

use crate::error::{StoreError, StoreResult};
use crate::log::index::{Index, IndexOp, ValueLocation};
use crate::log::record::{
    compute_crc32, put_value_offset, LogRecord, RecordType, CRC_SIZE, FILE_HEADER_SIZE,
    RECORD_HEADER_SIZE, RECORD_MAGIC,
};
use std::io::{BufReader, Read};
use tracing::debug;

/// A decoded record and its position in the file.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) offset: u64,
    pub(crate) len: u64,
    pub(crate) record: LogRecord,
}

impl Frame {
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Reads frames sequentially from just after the file header.
pub(crate) struct RecordScanner<R: Read> {
    reader: BufReader<R>,
    offset: u64,
    end: u64,
    torn_at: Option<u64>,
    finished: bool,
}

impl<R: Read> RecordScanner<R> {
    /// `reader` must be positioned right after the file header; `file_len` is
    /// the total file length.
    pub(crate) fn new(reader: R, file_len: u64) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
            offset: FILE_HEADER_SIZE as u64,
            end: file_len,
            torn_at: None,
            finished: false,
        }
    }

    /// Offset of a torn record, if one was found.
    pub(crate) fn torn_at(&self) -> Option<u64> {
        self.torn_at
    }

    fn stop_torn(&mut self) -> StoreResult<Option<Frame>> {
        self.torn_at = Some(self.offset);
        self.finished = true;
        Ok(None)
    }

    /// Returns the next intact frame, `None` at the end of the log.
    pub(crate) fn next_frame(&mut self) -> StoreResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let remaining = self.end.saturating_sub(self.offset);
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < (RECORD_HEADER_SIZE + CRC_SIZE) as u64 {
            return self.stop_torn();
        }

        let mut header = [0u8; RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        if header[0..4] != RECORD_MAGIC {
            self.finished = true;
            return Err(StoreError::corrupted(format!(
                "invalid record magic at offset {}",
                self.offset
            )));
        }
        let type_byte = header[4];
        let payload_len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        let frame_len = (RECORD_HEADER_SIZE + CRC_SIZE) as u64 + u64::from(payload_len);
        if frame_len > remaining {
            return self.stop_torn();
        }

        let mut body = vec![0u8; payload_len as usize + CRC_SIZE];
        self.reader.read_exact(&mut body)?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut crc_input = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        crc_input.extend_from_slice(&header);
        crc_input.extend_from_slice(payload);
        let actual_crc = compute_crc32(&crc_input);
        if actual_crc != stored_crc {
            if frame_len == remaining {
                return self.stop_torn();
            }
            self.finished = true;
            return Err(StoreError::corrupted(format!(
                "checksum mismatch at offset {}: expected {stored_crc:08x}, got {actual_crc:08x}",
                self.offset
            )));
        }

        let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
            self.finished = true;
            StoreError::corrupted(format!(
                "unknown record type {type_byte} at offset {}",
                self.offset
            ))
        })?;
        let record = LogRecord::decode_payload(record_type, payload)?;

        let frame = Frame {
            offset: self.offset,
            len: frame_len,
            record,
        };
        self.offset += frame_len;
        Ok(Some(frame))
    }
}

/// Result of replaying a log file.
#[derive(Debug)]
pub(crate) struct Replay {
    pub(crate) index: Index,
    /// End of the last committed transaction; everything after it is torn.
    pub(crate) committed_end: u64,
    pub(crate) next_txid: u64,
    pub(crate) transactions: u64,
    pub(crate) records: u64,
    pub(crate) torn_bytes: u64,
}

/// Replays every committed transaction in the log.
pub(crate) fn replay<R: Read>(reader: R, file_len: u64) -> StoreResult<Replay> {
    let mut scanner = RecordScanner::new(reader, file_len);
    let mut index = Index::default();
    let mut pending: Option<(u64, Vec<IndexOp>)> = None;
    let mut committed_end = FILE_HEADER_SIZE as u64;
    let mut next_txid = 1;
    let mut transactions = 0;
    let mut records = 0;

    while let Some(frame) = scanner.next_frame()? {
        records += 1;
        let offset = frame.offset;
        let end = frame.end();
        match frame.record {
            LogRecord::Begin { txid } => {
                if let Some((open, _)) = &pending {
                    return Err(StoreError::corrupted(format!(
                        "transaction {open} not committed before transaction {txid} at offset {offset}"
                    )));
                }
                pending = Some((txid, Vec::new()));
            }
            LogRecord::Put {
                txid,
                space,
                key,
                value,
            } => {
                let ops = pending_ops(&mut pending, txid, offset)?;
                let location = ValueLocation {
                    offset: offset + put_value_offset(key.len()) as u64,
                    len: value.len() as u32,
                };
                ops.push(IndexOp::Put {
                    space,
                    key,
                    location,
                });
            }
            LogRecord::Clear { txid, space } => {
                pending_ops(&mut pending, txid, offset)?.push(IndexOp::Clear(space));
            }
            LogRecord::Commit { txid } => {
                pending_ops(&mut pending, txid, offset)?;
                if let Some((_, ops)) = pending.take() {
                    index.apply(ops);
                }
                committed_end = end;
                next_txid = next_txid.max(txid + 1);
                transactions += 1;
            }
        }
    }

    if let Some(offset) = scanner.torn_at() {
        debug!(offset, "log ends inside a record");
    }
    if let Some((txid, ops)) = &pending {
        debug!(txid, operations = ops.len(), "ignoring uncommitted transaction");
    }

    Ok(Replay {
        index,
        committed_end,
        next_txid,
        transactions,
        records,
        torn_bytes: file_len.saturating_sub(committed_end),
    })
}

fn pending_ops(
    pending: &mut Option<(u64, Vec<IndexOp>)>,
    txid: u64,
    offset: u64,
) -> StoreResult<&mut Vec<IndexOp>> {
    match pending {
        Some((open, ops)) if *open == txid => Ok(ops),
        _ => Err(StoreError::corrupted(format!(
            "record of transaction {txid} outside its transaction at offset {offset}"
        ))),
    }
}
