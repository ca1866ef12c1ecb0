//! Core types for the signal bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum length of a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Maximum length of a signal type.
pub const MAX_SIGNAL_TYPE_LEN: usize = 128;

/// Identifier for an isolation boundary (an organization/customer).
///
/// Tenant ids name on-disk directories, so the accepted charset is
/// restricted: 1..=64 chars of `[A-Za-z0-9._-]`, not starting with `.`.
/// Use [`TenantId::is_valid`] to check before emitting.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id satisfies the tenant id charset rule.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_TENANT_ID_LEN
            && !self.0.starts_with('.')
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId(s.to_string())
    }
}

/// Unique identifier for a signal, assigned by the store on append.
///
/// Ids are a per-tenant monotone sequence, so they double as the stable
/// total order of signals within a tenant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl SignalId {
    pub fn next(self) -> Self {
        SignalId(self.0 + 1)
    }
}

impl fmt::Debug for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalId({})", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// This timestamp advanced by `d`, saturating on overflow.
    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(d.as_micros() as i64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Signal priority, used for filtering and audit/ops triage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Did the consumer handle the signal successfully?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Handled,
    Failed,
}

/// Consumer acknowledgment attached to a signal by `mark_processed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub outcome: ProcessingOutcome,
    /// Which module handled the signal.
    pub handler: String,
    /// Optional error description for failed handling.
    pub detail: Option<String>,
}

impl ProcessingResult {
    pub fn handled(handler: impl Into<String>) -> Self {
        Self {
            outcome: ProcessingOutcome::Handled,
            handler: handler.into(),
            detail: None,
        }
    }

    pub fn failed(handler: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            outcome: ProcessingOutcome::Failed,
            handler: handler.into(),
            detail: Some(detail.into()),
        }
    }
}

/// A typed, tenant-scoped fact emitted by one module for others to react to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    /// Unique within the tenant (assigned by the store).
    pub id: SignalId,

    /// Isolation boundary. Set at creation, never mutated.
    pub tenant: TenantId,

    /// Closed vocabulary agreed out of band (e.g. "lead.qualified").
    pub signal_type: String,

    /// The business entity the signal concerns. Filtering only, never isolation.
    pub subject_id: Option<String>,

    /// Emitter certainty in [0.0, 1.0].
    pub confidence: f64,

    pub priority: Priority,

    /// Opaque tenant-scoped payload; the bus does not interpret it.
    pub payload: serde_json::Map<String, serde_json::Value>,

    /// Server-assigned write timestamp.
    pub created_at: Timestamp,

    /// Server-assigned; always > `created_at`.
    pub expires_at: Timestamp,

    pub processed: bool,
    pub processed_at: Option<Timestamp>,
    pub processing_result: Option<ProcessingResult>,
}

impl Signal {
    /// Whether this signal is past its TTL at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Producer input for a new signal, before the store assigns id and timestamps.
#[derive(Clone, Debug)]
pub struct SignalDraft {
    pub signal_type: String,
    pub subject_id: Option<String>,
    pub confidence: f64,
    pub priority: Priority,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl SignalDraft {
    /// Create a draft with full confidence and medium priority.
    pub fn new(signal_type: impl Into<String>) -> Self {
        Self {
            signal_type: signal_type.into(),
            subject_id: None,
            confidence: 1.0,
            priority: Priority::default(),
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the declared signal type satisfies the vocabulary charset rule.
    pub fn type_is_valid(&self) -> bool {
        !self.signal_type.is_empty()
            && self.signal_type.len() <= MAX_SIGNAL_TYPE_LEN
            && self.signal_type.bytes().all(|b| {
                b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_' || b == b'-'
            })
    }
}

/// Filter criteria shared by `query` (pull) and subscriptions (push).
#[derive(Clone, Debug, Default)]
pub struct SignalFilter {
    /// Match only these signal types (None = all types).
    pub types: Option<Vec<String>>,

    /// Minimum priority (inclusive).
    pub min_priority: Option<Priority>,

    /// Minimum confidence (inclusive).
    pub min_confidence: Option<f64>,

    /// Match only processed (true) or unprocessed (false) signals.
    pub processed: Option<bool>,
}

impl SignalFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match specific signal types.
    pub fn types(types: Vec<String>) -> Self {
        Self {
            types: Some(types),
            ..Default::default()
        }
    }

    /// Match signals at or above a priority.
    pub fn min_priority(priority: Priority) -> Self {
        Self {
            min_priority: Some(priority),
            ..Default::default()
        }
    }

    /// Match signals not yet acknowledged.
    pub fn unprocessed() -> Self {
        Self {
            processed: Some(false),
            ..Default::default()
        }
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    /// Test a signal against this filter. TTL is checked separately by the
    /// store; fresh signals delivered to subscriptions are never expired.
    pub fn matches(&self, signal: &Signal) -> bool {
        if let Some(ref types) = self.types {
            if !types.iter().any(|t| t == &signal.signal_type) {
                return false;
            }
        }

        if let Some(min) = self.min_priority {
            if signal.priority < min {
                return false;
            }
        }

        if let Some(min) = self.min_confidence {
            if signal.confidence < min {
                return false;
            }
        }

        if let Some(processed) = self.processed {
            if signal.processed != processed {
                return false;
            }
        }

        true
    }
}

/// Newest-first cursor paging for `query`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Page {
    /// Max results; capped at the store's configured page size either way.
    pub limit: Option<usize>,

    /// Only signals with id strictly below this (for fetching the next page).
    pub before: Option<SignalId>,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            before: None,
        }
    }
}
