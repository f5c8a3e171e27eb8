//! Durability layer for warden
//!
//! This crate holds the log the transaction layer writes to:
//!
//! - Log records: transaction, statement and XA branch facts
//! - Entry framing: length prefix, type tag, bincode payload, CRC32
//! - Log stores: in-memory and single-file, behind the `LogStore` trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod log;
pub mod record;

pub use encoding::{decode_entry, encode_entry};
pub use log::{FileLog, LogStore, MemoryLog, SyncMode};
pub use record::{HeurCompletion, LogCategory, LogEntry, LogRecord, Lsn};
