//! Log entry framing
//!
//! ## Entry Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including the length itself)
//! - **type**: [`LogRecord::type_tag`] of the payload
//! - **payload**: bincode-serialized [`LogEntry`]
//! - **crc32**: CRC32 over \[type\]\[payload\]
//!
//! A buffer that ends before the declared length is an incomplete entry
//! (torn write), reported as [`Error::IncompleteEntry`]. Anything else that
//! does not check out is [`Error::Corruption`].

use crate::record::LogEntry;
use crc32fast::Hasher;
use warden_core::{Error, Result};

/// Bytes of the length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Smallest valid value of the length field: type(1) + crc(4)
const MIN_FRAME: usize = 5;

fn checksum(type_tag: u8, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a log entry into a self-delimiting frame
pub fn encode_entry(entry: &LogEntry) -> Result<Vec<u8>> {
    let type_tag = entry.record.type_tag();
    let payload = bincode::serialize(entry)?;

    let total_len = 1 + payload.len() + 4;
    let frame_len = u32::try_from(total_len)
        .map_err(|_| Error::InvalidOperation(format!("log entry of {} bytes is too large", total_len)))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + total_len);
    buf.extend_from_slice(&frame_len.to_le_bytes());
    buf.push(type_tag);
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&checksum(type_tag, &payload).to_le_bytes());
    Ok(buf)
}

/// Decode one frame from the front of `buf`
///
/// `offset` is the position of `buf` in its log and only used for error
/// reporting.
///
/// # Returns
/// The entry and the number of bytes consumed.
pub fn decode_entry(buf: &[u8], offset: u64) -> Result<(LogEntry, usize)> {
    let Some(len_bytes) = buf.get(..LENGTH_PREFIX) else {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: LENGTH_PREFIX,
        });
    };
    let mut len_buf = [0u8; LENGTH_PREFIX];
    len_buf.copy_from_slice(len_bytes);
    let total_len = u32::from_le_bytes(len_buf) as usize;

    if total_len < MIN_FRAME {
        return Err(Error::Corruption(format!(
            "offset {}: invalid entry length {} (minimum is {})",
            offset, total_len, MIN_FRAME
        )));
    }
    if buf.len() < LENGTH_PREFIX + total_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: LENGTH_PREFIX + total_len,
        });
    }

    let frame = &buf[LENGTH_PREFIX..LENGTH_PREFIX + total_len];
    let type_tag = frame[0];
    let payload = &frame[1..total_len - 4];
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(&frame[total_len - 4..]);
    let expected_crc = u32::from_le_bytes(crc_buf);

    let actual_crc = checksum(type_tag, payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let entry: LogEntry = bincode::deserialize(payload)
        .map_err(|e| Error::Corruption(format!("offset {}: deserialization failed: {}", offset, e)))?;

    let expected_type = entry.record.type_tag();
    if type_tag != expected_type {
        return Err(Error::Corruption(format!(
            "offset {}: type tag mismatch: expected {}, got {}",
            offset, expected_type, type_tag
        )));
    }

    Ok((entry, LENGTH_PREFIX + total_len))
}
