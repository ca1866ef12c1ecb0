//! Append-only per-tenant signal log.
//!
//! Each tenant owns one log file. Every mutation is an appended entry; the
//! file is never rewritten in place. Acknowledgments and expiry cleanups are
//! follow-up entries, so replaying the log in order reconstructs the live
//! view, and last-write-wins acknowledgment falls out of replay order.

use crate::error::{BusError, Result};
use crate::types::{
    Page, ProcessingResult, Signal, SignalDraft, SignalFilter, SignalId, TenantId, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Magic bytes for signal log files.
const LOG_MAGIC: &[u8; 4] = b"SIG\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size: magic + version.
const LOG_HEADER_SIZE: u64 = 5;

/// Sanity limit for a single entry (64MB).
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// One framed entry in the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum LogEntry {
    /// A new signal was accepted.
    Appended(Signal),
    /// A consumer acknowledged a signal.
    Processed {
        id: SignalId,
        result: ProcessingResult,
        at: Timestamp,
    },
    /// Expired signals were garbage-collected from the live view.
    Expired { ids: Vec<SignalId> },
}

/// Writer-side state, serialized under one lock so id assignment and the
/// matching append are atomic.
#[derive(Debug)]
struct LogWriter {
    file: File,
    next_id: SignalId,
    writes_since_sync: u64,
}

/// Append-only signal log for a single tenant.
#[derive(Debug)]
pub struct TenantLog {
    tenant: TenantId,
    writer: Mutex<LogWriter>,
    signals: RwLock<BTreeMap<SignalId, Signal>>,
    /// fsync every N appends (1 = every write).
    sync_interval: u64,
}

impl TenantLog {
    /// Open or create the log at `path`, replaying existing entries.
    pub fn open(path: impl AsRef<Path>, tenant: TenantId, sync_interval: u64) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let existed = path.exists();

        if !existed {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
        }

        let (signals, next_id, good_end) = Self::replay(&path, &tenant)?;

        let file_len = std::fs::metadata(&path)?.len();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if good_end < file_len {
            // Torn final write from a crash; drop the partial tail.
            tracing::warn!(
                tenant = %tenant,
                dropped = file_len - good_end,
                "truncating torn tail of signal log"
            );
            file.set_len(good_end)?;
        }

        let mut file = file;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            tenant,
            writer: Mutex::new(LogWriter {
                file,
                next_id,
                writes_since_sync: 0,
            }),
            signals: RwLock::new(signals),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a new signal, assigning id and timestamps.
    pub fn append(&self, draft: SignalDraft, ttl: Duration) -> Result<Signal> {
        let mut writer = self.writer.lock();

        let created_at = Timestamp::now();
        // TTL is clamped so expires_at strictly exceeds created_at.
        let ttl = ttl.max(Duration::from_micros(1));

        let signal = Signal {
            id: writer.next_id,
            tenant: self.tenant.clone(),
            signal_type: draft.signal_type,
            subject_id: draft.subject_id,
            confidence: draft.confidence,
            priority: draft.priority,
            payload: draft.payload,
            created_at,
            expires_at: created_at.saturating_add(ttl),
            processed: false,
            processed_at: None,
            processing_result: None,
        };

        self.write_entry(&mut writer, &LogEntry::Appended(signal.clone()))?;
        writer.next_id = writer.next_id.next();

        self.signals.write().insert(signal.id, signal.clone());
        Ok(signal)
    }

    /// Acknowledge a signal. Idempotent: re-acknowledging overwrites the
    /// previous result (last write wins) and never errors.
    pub fn mark_processed(&self, id: SignalId, result: ProcessingResult) -> Result<Signal> {
        let mut writer = self.writer.lock();

        let mut signal = match self.signals.read().get(&id) {
            Some(signal) => signal.clone(),
            None => return Err(BusError::SignalNotFound(id)),
        };

        let at = Timestamp::now();
        signal.processed = true;
        signal.processed_at = Some(at);
        signal.processing_result = Some(result.clone());

        self.write_entry(&mut writer, &LogEntry::Processed { id, result, at })?;
        self.signals.write().insert(id, signal.clone());
        Ok(signal)
    }

    /// Remove signals past their TTL from the live view.
    ///
    /// Returns the number removed. Advisory housekeeping: holds the writer
    /// lock only for this tenant, so live traffic for other tenants is
    /// unaffected, and readers of this tenant block only on the map swap.
    pub fn delete_expired(&self) -> Result<usize> {
        let mut writer = self.writer.lock();

        let now = Timestamp::now();
        let expired: Vec<SignalId> = self
            .signals
            .read()
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        self.write_entry(&mut writer, &LogEntry::Expired { ids: expired.clone() })?;

        let mut signals = self.signals.write();
        for id in &expired {
            signals.remove(id);
        }
        Ok(expired.len())
    }

    /// Query live signals, newest first, capped at `max_page_size`.
    pub fn query(&self, filter: &SignalFilter, page: &Page, max_page_size: usize) -> Vec<Signal> {
        let now = Timestamp::now();
        let limit = page.limit.unwrap_or(max_page_size).min(max_page_size);

        let signals = self.signals.read();
        signals
            .values()
            .rev()
            .filter(|s| match page.before {
                Some(before) => s.id < before,
                None => true,
            })
            .filter(|s| !s.is_expired(now))
            .filter(|s| filter.matches(s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Fetch a single signal by id (expired signals are not returned).
    pub fn get(&self, id: SignalId) -> Option<Signal> {
        let signals = self.signals.read();
        signals
            .get(&id)
            .filter(|s| !s.is_expired(Timestamp::now()))
            .cloned()
    }

    /// Number of live (non-expired) signals.
    pub fn live_count(&self) -> usize {
        let now = Timestamp::now();
        self.signals
            .read()
            .values()
            .filter(|s| !s.is_expired(now))
            .count()
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    fn write_entry(&self, writer: &mut LogWriter, entry: &LogEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(entry)?;

        writer.file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        writer.file.write_all(&encoded)?;
        writer
            .file
            .write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= self.sync_interval {
            writer.file.sync_all()?;
            writer.writes_since_sync = 0;
        }
        Ok(())
    }

    /// Replay the log, returning the live view, the next id to assign, and
    /// the offset of the last complete entry.
    fn replay(path: &Path, tenant: &TenantId) -> Result<(BTreeMap<SignalId, Signal>, SignalId, u64)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(BusError::InvalidFormat(format!(
                "invalid signal log magic for tenant {}",
                tenant
            )));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(BusError::InvalidFormat(format!(
                "unsupported signal log version: {}",
                version[0]
            )));
        }

        let mut signals = BTreeMap::new();
        let mut next_id = SignalId(1);
        let mut good_end = LOG_HEADER_SIZE;

        loop {
            match Self::read_entry(&mut reader) {
                Ok(Some((entry, size))) => {
                    good_end += size;
                    match entry {
                        LogEntry::Appended(signal) => {
                            if signal.id >= next_id {
                                next_id = signal.id.next();
                            }
                            signals.insert(signal.id, signal);
                        }
                        LogEntry::Processed { id, result, at } => {
                            if let Some(signal) = signals.get_mut(&id) {
                                signal.processed = true;
                                signal.processed_at = Some(at);
                                signal.processing_result = Some(result);
                            }
                        }
                        LogEntry::Expired { ids } => {
                            for id in ids {
                                signals.remove(&id);
                            }
                        }
                    }
                }
                // Clean end of file, or a torn tail to truncate.
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }

        Ok((signals, next_id, good_end))
    }

    /// Read one framed entry. `Ok(None)` means end of readable data (clean
    /// EOF or a torn tail); a checksum mismatch is a hard corruption error.
    fn read_entry(reader: &mut BufReader<File>) -> Result<Option<(LogEntry, u64)>> {
        let mut len_bytes = [0u8; 4];
        if read_exact_or_eof(reader, &mut len_bytes)?.is_none() {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(BusError::Corruption("signal log entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        if read_exact_or_eof(reader, &mut encoded)?.is_none() {
            return Ok(None);
        }

        let mut checksum_bytes = [0u8; 4];
        if read_exact_or_eof(reader, &mut checksum_bytes)?.is_none() {
            return Ok(None);
        }
        let stored = u32::from_le_bytes(checksum_bytes);

        if stored != crc32fast::hash(&encoded) {
            return Err(BusError::Corruption("signal log checksum mismatch".into()));
        }

        let entry: LogEntry = rmp_serde::from_slice(&encoded)?;
        Ok(Some((entry, 4 + len as u64 + 4)))
    }
}

/// Like `read_exact`, but maps a short read to `None`.
fn read_exact_or_eof(reader: &mut BufReader<File>, buf: &mut [u8]) -> Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
