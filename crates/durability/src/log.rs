//! Log stores
//!
//! [`LogStore`] is the seam between the transaction layer and whatever keeps
//! its records. Two implementations are provided:
//!
//! - [`MemoryLog`]: a vector behind a mutex, for tests and volatile setups
//! - [`FileLog`]: one append-only file of framed entries (see
//!   [`crate::encoding`]), where an entry's [`Lsn`] is its byte offset

use crate::encoding::{decode_entry, encode_entry, LENGTH_PREFIX};
use crate::record::{LogCategory, LogEntry, LogRecord, Lsn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warden_core::{Error, Result};

/// Storage for log records
pub trait LogStore: Send + Sync {
    /// Append `record` to the log of `category`
    ///
    /// # Returns
    /// The position of the new entry. Positions increase with every store.
    fn store(&self, category: LogCategory, record: &LogRecord) -> Result<Lsn>;

    /// Read back the entry at `lsn`
    fn load(&self, lsn: Lsn) -> Result<LogEntry>;

    /// All entries in write order
    fn scan(&self) -> Result<Vec<(Lsn, LogEntry)>>;

    /// Make everything stored so far durable
    fn flush(&self) -> Result<()>;
}

// ============================================================================
// MemoryLog
// ============================================================================

/// Volatile log kept in memory
///
/// The LSN of an entry is its index.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Records stored in `category`, in write order
    pub fn records(&self, category: LogCategory) -> Vec<LogRecord> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.record.clone())
            .collect()
    }
}

impl LogStore for MemoryLog {
    fn store(&self, category: LogCategory, record: &LogRecord) -> Result<Lsn> {
        let mut entries = self.entries.lock();
        let lsn = Lsn(entries.len() as u64);
        entries.push(LogEntry::now(category, record.clone()));
        Ok(lsn)
    }

    fn load(&self, lsn: Lsn) -> Result<LogEntry> {
        self.entries
            .lock()
            .get(lsn.0 as usize)
            .cloned()
            .ok_or_else(|| Error::InvalidOperation(format!("no log entry at {}", lsn)))
    }

    fn scan(&self) -> Result<Vec<(Lsn, LogEntry)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .enumerate()
            .map(|(i, e)| (Lsn(i as u64), e.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// FileLog
// ============================================================================

/// When a [`FileLog`] forces its writes to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// fsync after every store
    Strict,
    /// fsync only on [`LogStore::flush`]
    #[default]
    Buffered,
}

struct Appender {
    writer: BufWriter<File>,
    offset: u64,
}

/// Append-only file log
///
/// A torn entry at the end of the file (a crash in the middle of a write) is
/// cut off when the log is opened. Corruption before the tail is an error.
pub struct FileLog {
    path: PathBuf,
    sync_mode: SyncMode,
    appender: Mutex<Appender>,
}

impl FileLog {
    /// Open an existing log or create a new one
    ///
    /// Creates parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let bytes = std::fs::read(&path)?;
        let (entries, valid_len) = decode_all(&bytes)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn log tail"
            );
            file.set_len(valid_len)?;
        }
        debug!(path = %path.display(), entries = entries.len(), "opened log");

        Ok(Self {
            path,
            sync_mode,
            appender: Mutex::new(Appender {
                writer: BufWriter::new(file),
                offset: valid_len,
            }),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured sync mode
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Offset the next entry will be written at
    pub fn size(&self) -> u64 {
        self.appender.lock().offset
    }

    fn flush_writer(appender: &mut Appender) -> Result<()> {
        appender.writer.flush()?;
        Ok(())
    }
}

/// Decode consecutive frames from the start of `bytes`
///
/// Returns the entries and the length of the valid prefix. Stops quietly at
/// an incomplete trailing frame.
fn decode_all(bytes: &[u8]) -> Result<(Vec<(Lsn, LogEntry)>, u64)> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match decode_entry(&bytes[offset..], offset as u64) {
            Ok((entry, consumed)) => {
                entries.push((Lsn(offset as u64), entry));
                offset += consumed;
            }
            Err(Error::IncompleteEntry { .. }) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((entries, offset as u64))
}

impl LogStore for FileLog {
    fn store(&self, category: LogCategory, record: &LogRecord) -> Result<Lsn> {
        let encoded = encode_entry(&LogEntry::now(category, record.clone()))?;
        let mut appender = self.appender.lock();
        let lsn = Lsn(appender.offset);
        appender.writer.write_all(&encoded)?;
        appender.offset += encoded.len() as u64;
        if self.sync_mode == SyncMode::Strict {
            Self::flush_writer(&mut appender)?;
            appender.writer.get_ref().sync_data()?;
        }
        Ok(lsn)
    }

    fn load(&self, lsn: Lsn) -> Result<LogEntry> {
        let end = {
            let mut appender = self.appender.lock();
            if lsn.0 >= appender.offset {
                return Err(Error::InvalidOperation(format!("no log entry at {}", lsn)));
            }
            Self::flush_writer(&mut appender)?;
            appender.offset
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(lsn.0))?;
        let mut buf = vec![0u8; LENGTH_PREFIX];
        file.read_exact(&mut buf)?;
        let mut len_buf = [0u8; LENGTH_PREFIX];
        len_buf.copy_from_slice(&buf);
        let total_len = u32::from_le_bytes(len_buf) as usize;
        let available = (end - lsn.0) as usize;
        if LENGTH_PREFIX + total_len > available {
            return Err(Error::IncompleteEntry {
                offset: lsn.0,
                have: available,
                needed: LENGTH_PREFIX + total_len,
            });
        }
        buf.resize(LENGTH_PREFIX + total_len, 0);
        file.read_exact(&mut buf[LENGTH_PREFIX..])
            .map_err(|e| Error::Corruption(format!("offset {}: short read: {}", lsn.0, e)))?;
        decode_entry(&buf, lsn.0).map(|(entry, _)| entry)
    }

    fn scan(&self) -> Result<Vec<(Lsn, LogEntry)>> {
        Self::flush_writer(&mut self.appender.lock())?;
        let bytes = std::fs::read(&self.path)?;
        decode_all(&bytes).map(|(entries, _)| entries)
    }

    fn flush(&self) -> Result<()> {
        let mut appender = self.appender.lock();
        Self::flush_writer(&mut appender)?;
        appender.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl Drop for FileLog {
    fn drop(&mut self) {
        let _ = self.appender.get_mut().writer.flush();
    }
}

impl std::fmt::Debug for FileLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLog")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
