//! Bus configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the whole bus (store and admission control).
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Base path for the store (signal and audit logs live under it).
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Default signal lifetime; `expires_at = created_at + default_ttl`.
    pub default_ttl: Duration,

    /// Max signals returned per query page.
    pub max_page_size: usize,

    /// fsync the signal log every N appends (0 = every write).
    pub sync_interval: u64,

    pub throttle: ThrottleConfig,
    pub breaker: BreakerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./signalbus"),
            create_if_missing: true,
            default_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            max_page_size: 100,
            sync_interval: 100,
            throttle: ThrottleConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Per-tenant emission rate limit over a fixed window.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Max emissions per tenant per window.
    pub max_per_window: u32,

    /// Window duration.
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_per_window: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-tenant circuit breaker thresholds.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive storage failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}
