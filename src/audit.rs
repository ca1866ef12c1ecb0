//! Append-only audit trail of emission attempts.
//!
//! Every emission outcome is mirrored here, tenant-partitioned exactly like
//! the signal store. Audit entries carry enough of the original signal to
//! support compliance review after the signal itself has expired; nothing in
//! the bus ever updates or deletes them.
//!
//! Recording is fire-and-forget relative to the emission path: a failed
//! audit write is logged internally and never surfaced to the producer.

use crate::error::{BusError, Result};
use crate::types::{Priority, SignalDraft, SignalId, TenantId, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Magic bytes for audit log files.
const AUDIT_MAGIC: &[u8; 4] = b"AUD\0";

/// Current audit format version.
const AUDIT_VERSION: u8 = 1;

/// Sanity limit for a single entry (16MB).
const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

/// What happened to an emission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    RejectedValidation,
    RejectedThrottled,
    RejectedCircuitOpen,
    RejectedStorage,
}

impl AuditOutcome {
    /// Stable code for compliance tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Accepted => "accepted",
            AuditOutcome::RejectedValidation => "rejected_validation",
            AuditOutcome::RejectedThrottled => "rejected_throttled",
            AuditOutcome::RejectedCircuitOpen => "rejected_circuit_open",
            AuditOutcome::RejectedStorage => "rejected_storage_error",
        }
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Per-tenant audit sequence.
    pub seq: u64,
    pub tenant: TenantId,
    pub outcome: AuditOutcome,

    /// Mirror of the attempted signal, kept past signal expiry.
    pub signal_type: String,
    pub subject_id: Option<String>,
    pub priority: Priority,
    pub confidence: f64,

    /// Store-assigned id, present only for accepted emissions.
    pub signal_id: Option<SignalId>,

    pub recorded_at: Timestamp,

    /// Human-readable rejection detail.
    pub detail: Option<String>,
}

struct AuditWriter {
    file: BufWriter<File>,
    next_seq: u64,
}

/// Append-only, tenant-partitioned audit logger.
pub struct AuditLog {
    /// `<store root>/tenants`; audit files live beside each tenant's signals.
    tenants_dir: PathBuf,
    writers: RwLock<HashMap<TenantId, Arc<Mutex<AuditWriter>>>>,
}

impl AuditLog {
    pub fn open(store_path: impl Into<PathBuf>) -> Self {
        Self {
            tenants_dir: store_path.into().join("tenants"),
            writers: RwLock::new(HashMap::new()),
        }
    }

    /// Record an emission outcome. Never fails the caller: internal write
    /// errors are logged and swallowed.
    pub fn record(
        &self,
        tenant: &TenantId,
        draft: &SignalDraft,
        outcome: AuditOutcome,
        signal_id: Option<SignalId>,
        detail: Option<String>,
    ) {
        if !tenant.is_valid() {
            // No valid partition to write to; the attempt is still visible
            // operationally.
            tracing::warn!(
                tenant = %tenant,
                outcome = outcome.as_str(),
                signal_type = %draft.signal_type,
                "audit entry for invalid tenant id recorded to log only"
            );
            return;
        }

        if let Err(e) = self.try_record(tenant, draft, outcome, signal_id, detail) {
            tracing::error!(
                tenant = %tenant,
                outcome = outcome.as_str(),
                error = %e,
                "failed to write audit entry"
            );
        }
    }

    /// Read back a tenant's audit trail, oldest first. Unknown tenants have
    /// an empty trail.
    pub fn entries(&self, tenant: &TenantId) -> Result<Vec<AuditEntry>> {
        let path = self.audit_path(tenant);
        if !tenant.is_valid() || !path.exists() {
            return Ok(Vec::new());
        }

        // Entries may sit in a writer buffer; flush before reading.
        if let Some(writer) = self.writers.read().get(tenant) {
            let mut writer = writer.lock();
            writer.file.flush()?;
        }

        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 5];
        reader.read_exact(&mut header)?;
        if &header[0..4] != AUDIT_MAGIC {
            return Err(BusError::InvalidFormat("invalid audit log magic".into()));
        }
        if header[4] != AUDIT_VERSION {
            return Err(BusError::InvalidFormat(format!(
                "unsupported audit log version: {}",
                header[4]
            )));
        }

        let mut entries = Vec::new();
        while let Some(entry) = Self::read_entry(&mut reader)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn audit_path(&self, tenant: &TenantId) -> PathBuf {
        self.tenants_dir.join(tenant.as_str()).join("audit.log")
    }

    fn try_record(
        &self,
        tenant: &TenantId,
        draft: &SignalDraft,
        outcome: AuditOutcome,
        signal_id: Option<SignalId>,
        detail: Option<String>,
    ) -> Result<()> {
        let writer = self.writer_for(tenant)?;
        let mut writer = writer.lock();

        let entry = AuditEntry {
            seq: writer.next_seq,
            tenant: tenant.clone(),
            outcome,
            signal_type: draft.signal_type.clone(),
            subject_id: draft.subject_id.clone(),
            priority: draft.priority,
            confidence: draft.confidence,
            signal_id,
            recorded_at: Timestamp::now(),
            detail,
        };

        let encoded = rmp_serde::to_vec(&entry)?;
        writer.file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        writer.file.write_all(&encoded)?;
        writer
            .file
            .write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        writer.file.flush()?;

        writer.next_seq += 1;
        Ok(())
    }

    fn writer_for(&self, tenant: &TenantId) -> Result<Arc<Mutex<AuditWriter>>> {
        if let Some(writer) = self.writers.read().get(tenant) {
            return Ok(Arc::clone(writer));
        }

        let mut writers = self.writers.write();
        if let Some(writer) = writers.get(tenant) {
            return Ok(Arc::clone(writer));
        }

        let path = self.audit_path(tenant);
        fs::create_dir_all(path.parent().expect("audit path has a parent"))?;

        let next_seq = if path.exists() {
            Self::scan_next_seq(&path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(AUDIT_MAGIC)?;
            file.write_all(&[AUDIT_VERSION])?;
            file.sync_all()?;
            1
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        let writer = Arc::new(Mutex::new(AuditWriter {
            file: BufWriter::new(file),
            next_seq,
        }));
        writers.insert(tenant.clone(), Arc::clone(&writer));
        Ok(writer)
    }

    fn scan_next_seq(path: &std::path::Path) -> Result<u64> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 5];
        reader.read_exact(&mut header)?;

        let mut max_seq = 0;
        while let Some(entry) = Self::read_entry(&mut reader)? {
            max_seq = max_seq.max(entry.seq);
        }
        Ok(max_seq + 1)
    }

    fn read_entry(reader: &mut BufReader<File>) -> Result<Option<AuditEntry>> {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(BusError::Corruption("audit entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&encoded) {
            return Err(BusError::Corruption("audit log checksum mismatch".into()));
        }

        Ok(Some(rmp_serde::from_slice(&encoded)?))
    }
}
