//! Durable, tenant-partitioned signal storage.
//!
//! Every tenant gets its own append-only [`TenantLog`] under
//! `<root>/tenants/<tenant>/`. Cross-tenant reads are impossible by
//! construction: a query resolves to exactly one tenant's log, and no
//! operation iterates across tenants except explicit housekeeping via
//! [`SignalStore::tenants`].

mod log;

pub use log::TenantLog;

use crate::error::{BusError, Result};
use crate::types::{
    Page, ProcessingResult, Signal, SignalDraft, SignalFilter, SignalId, TenantId,
};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"SBS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Storage configuration, derived from [`crate::BusConfig`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Default signal lifetime applied on append.
    pub default_ttl: Duration,

    /// Max signals returned per query page.
    pub max_page_size: usize,

    /// fsync the per-tenant log every N appends.
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./signalbus"),
            create_if_missing: true,
            default_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            max_page_size: 100,
            sync_interval: 100,
        }
    }
}

/// Storage seam used by the coordinator.
///
/// The durable [`SignalStore`] is the production implementation; tests wrap
/// it with failure-injecting decorators to exercise the circuit breaker.
pub trait SignalBackend: Send + Sync {
    /// Persist a new signal, assigning id and timestamps.
    fn append(&self, tenant: &TenantId, draft: SignalDraft) -> Result<Signal>;

    /// Fetch live signals newest-first.
    fn query(&self, tenant: &TenantId, filter: &SignalFilter, page: &Page) -> Result<Vec<Signal>>;

    /// Acknowledge a signal (idempotent, last write wins).
    fn mark_processed(
        &self,
        tenant: &TenantId,
        id: SignalId,
        result: ProcessingResult,
    ) -> Result<Signal>;

    /// Garbage-collect signals past their TTL. Returns the number removed.
    fn delete_expired(&self, tenant: &TenantId) -> Result<usize>;
}

/// The durable signal store.
#[derive(Debug)]
pub struct SignalStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Open per-tenant logs. The map lock is only held to look up or insert
    /// a log handle; all log work happens under per-tenant locks.
    logs: RwLock<HashMap<TenantId, Arc<TenantLog>>>,
}

impl SignalStore {
    /// Open an existing store or create a new one.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if config.path.exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(config.path.join("tenants"))?;
            Self::write_manifest(&config.path)?;
        } else {
            return Err(BusError::InvalidFormat(format!(
                "store not found at {}",
                config.path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        Ok(Self {
            config,
            _lock_file: lock_file,
            logs: RwLock::new(HashMap::new()),
        })
    }

    /// Tenants with persisted data, for housekeeping sweeps.
    pub fn tenants(&self) -> Result<Vec<TenantId>> {
        let dir = self.config.path.join("tenants");
        let mut tenants = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(TenantId::new(name));
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    /// Force pending writes of every open tenant log to disk.
    pub fn sync(&self) -> Result<()> {
        let logs: Vec<Arc<TenantLog>> = self.logs.read().values().cloned().collect();
        for log in logs {
            log.sync()?;
        }
        Ok(())
    }

    fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.config.path.join("tenants").join(tenant.as_str())
    }

    /// Fetch or open the tenant's log, creating its directory on first write.
    fn log_for(&self, tenant: &TenantId) -> Result<Arc<TenantLog>> {
        if let Some(log) = self.logs.read().get(tenant) {
            return Ok(Arc::clone(log));
        }

        if !tenant.is_valid() {
            return Err(BusError::Validation(format!(
                "invalid tenant id: {:?}",
                tenant.as_str()
            )));
        }

        let mut logs = self.logs.write();
        if let Some(log) = logs.get(tenant) {
            return Ok(Arc::clone(log));
        }

        let dir = self.tenant_dir(tenant);
        fs::create_dir_all(&dir)?;
        let log = Arc::new(TenantLog::open(
            dir.join("signals.log"),
            tenant.clone(),
            self.config.sync_interval,
        )?);
        logs.insert(tenant.clone(), Arc::clone(&log));
        Ok(log)
    }

    /// Like `log_for`, but never creates state: read paths for a tenant the
    /// store has never seen return `None`.
    fn existing_log(&self, tenant: &TenantId) -> Result<Option<Arc<TenantLog>>> {
        if let Some(log) = self.logs.read().get(tenant) {
            return Ok(Some(Arc::clone(log)));
        }

        if !tenant.is_valid() || !self.tenant_dir(tenant).join("signals.log").exists() {
            return Ok(None);
        }

        self.log_for(tenant).map(Some)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("manifest"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("manifest"))
            .map_err(|_| BusError::InvalidFormat("missing store manifest".into()))?;

        let mut header = [0u8; 5];
        file.read_exact(&mut header)?;
        if &header[0..4] != STORE_MAGIC {
            return Err(BusError::InvalidFormat("invalid store magic".into()));
        }
        if header[4] != STORE_VERSION {
            return Err(BusError::InvalidFormat(format!(
                "unsupported store version: {}",
                header[4]
            )));
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join("lock"))?;
        lock_file.try_lock_exclusive().map_err(|_| BusError::Locked)?;
        Ok(lock_file)
    }
}

impl SignalBackend for SignalStore {
    fn append(&self, tenant: &TenantId, draft: SignalDraft) -> Result<Signal> {
        // The coordinator validates shape; the store re-checks the fields it
        // must not persist malformed.
        if !draft.type_is_valid() {
            return Err(BusError::Validation(format!(
                "invalid signal type: {:?}",
                draft.signal_type
            )));
        }
        if !draft.confidence.is_finite() || !(0.0..=1.0).contains(&draft.confidence) {
            return Err(BusError::Validation(format!(
                "confidence out of range: {}",
                draft.confidence
            )));
        }

        self.log_for(tenant)?.append(draft, self.config.default_ttl)
    }

    fn query(&self, tenant: &TenantId, filter: &SignalFilter, page: &Page) -> Result<Vec<Signal>> {
        match self.existing_log(tenant)? {
            Some(log) => Ok(log.query(filter, page, self.config.max_page_size)),
            None => Ok(Vec::new()),
        }
    }

    fn mark_processed(
        &self,
        tenant: &TenantId,
        id: SignalId,
        result: ProcessingResult,
    ) -> Result<Signal> {
        match self.existing_log(tenant)? {
            Some(log) => log.mark_processed(id, result),
            None => Err(BusError::SignalNotFound(id)),
        }
    }

    fn delete_expired(&self, tenant: &TenantId) -> Result<usize> {
        match self.existing_log(tenant)? {
            Some(log) => log.delete_expired(),
            None => Ok(0),
        }
    }
}
