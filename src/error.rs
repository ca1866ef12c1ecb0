//! Error types for the signal bus.

use crate::types::{SignalId, TenantId};
use std::time::Duration;
use thiserror::Error;

/// Main error type for bus operations.
///
/// Rejections carry a machine-readable reason via [`BusError::reason`];
/// producers are expected to treat `Throttled` and `CircuitOpen` as routine,
/// recoverable conditions rather than bugs.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tenant {tenant} exceeded its emission budget; retry after {retry_after:?}")]
    Throttled {
        tenant: TenantId,
        retry_after: Duration,
    },

    #[error("Circuit open for tenant {tenant}; retry after {retry_after:?}")]
    CircuitOpen {
        tenant: TenantId,
        retry_after: Duration,
    },

    #[error("Signal not found: {0}")]
    SignalNotFound(SignalId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,
}

impl BusError {
    /// Stable, machine-readable rejection code for callers implementing
    /// backoff and for audit/ops tooling.
    pub fn reason(&self) -> &'static str {
        match self {
            BusError::Validation(_) => "validation",
            BusError::Throttled { .. } => "throttled",
            BusError::CircuitOpen { .. } => "circuit_open",
            BusError::SignalNotFound(_) => "not_found",
            BusError::Io(_)
            | BusError::Serialization(_)
            | BusError::Deserialization(_)
            | BusError::Corruption(_)
            | BusError::InvalidFormat(_)
            | BusError::Locked => "storage_error",
        }
    }

    /// Whether this error is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Throttled { .. } | BusError::CircuitOpen { .. } | BusError::Io(_)
        )
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BusError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BusError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BusError::Deserialization(e.to_string())
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
