//! Per-tenant circuit breaker.
//!
//! Each tenant gets its own small state machine:
//!
//! ```text
//! Closed ──(failures reach threshold)──► Open
//! Open ──(reset timeout elapses, one probe admitted)──► HalfOpen
//! HalfOpen ──(probe succeeds)──► Closed
//! HalfOpen ──(probe fails)──► Open (timer restarts, failure count kept)
//! ```
//!
//! What counts as a failure is decided by the caller: the coordinator feeds
//! only storage failures into `record_failure`. Validation and throttle
//! rejections never reach the breaker.

use crate::config::BreakerConfig;
use crate::types::TenantId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one tenant's circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; emissions flow.
    Closed,
    /// Emissions rejected without touching storage.
    Open,
    /// One probe emission in flight, testing recovery.
    HalfOpen,
}

/// How an admitted emission should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; ordinary emission.
    Normal,
    /// This emission is the recovery probe; its outcome decides the circuit.
    Probe,
}

/// Per-tenant breaker state. Transitions happen under the tenant's own lock.
struct TenantCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl TenantCircuit {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker keyed by tenant.
///
/// One tenant's failures can never open another tenant's circuit: state is a
/// separate [`TenantCircuit`] per tenant behind its own lock.
pub struct CircuitBreaker {
    config: BreakerConfig,
    circuits: RwLock<HashMap<TenantId, Arc<Mutex<TenantCircuit>>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    fn circuit_for(&self, tenant: &TenantId) -> Arc<Mutex<TenantCircuit>> {
        if let Some(circuit) = self.circuits.read().get(tenant) {
            return Arc::clone(circuit);
        }

        let mut circuits = self.circuits.write();
        Arc::clone(
            circuits
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TenantCircuit::closed()))),
        )
    }

    /// Ask to admit an emission for `tenant`.
    ///
    /// Returns `Err(remaining)` while the circuit is open, with the time left
    /// until a probe becomes possible. When the reset timeout has elapsed,
    /// exactly one caller is admitted as [`Admission::Probe`]; concurrent
    /// callers keep being rejected until that probe resolves.
    pub fn try_acquire(&self, tenant: &TenantId) -> Result<Admission, Duration> {
        let circuit = self.circuit_for(tenant);
        let mut circuit = circuit.lock();

        match circuit.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen => {
                // A probe is already in flight; keep rejecting until it resolves.
                Err(self.config.reset_timeout)
            }
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.reset_timeout {
                    circuit.state = CircuitState::HalfOpen;
                    tracing::info!(tenant = %tenant, "circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(self.config.reset_timeout - elapsed)
                }
            }
        }
    }

    /// Record a successful emission. Closes a half-open circuit and resets
    /// the consecutive failure count.
    pub fn record_success(&self, tenant: &TenantId) {
        let circuit = self.circuit_for(tenant);
        let mut circuit = circuit.lock();

        if circuit.state == CircuitState::HalfOpen {
            tracing::info!(tenant = %tenant, "probe succeeded, circuit closed");
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
    }

    /// Record a storage failure for `tenant`.
    ///
    /// A failed probe reopens the circuit without resetting the failure
    /// count; in the closed state the count accumulates until the threshold
    /// opens the circuit.
    pub fn record_failure(&self, tenant: &TenantId) {
        let circuit = self.circuit_for(tenant);
        let mut circuit = circuit.lock();

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                tracing::warn!(tenant = %tenant, "probe failed, circuit reopened");
            }
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    tracing::warn!(
                        tenant = %tenant,
                        failures = circuit.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {
                circuit.consecutive_failures += 1;
            }
        }
    }

    /// Current state for monitoring. Unknown tenants report Closed.
    pub fn state(&self, tenant: &TenantId) -> CircuitState {
        match self.circuits.read().get(tenant) {
            Some(circuit) => circuit.lock().state,
            None => CircuitState::Closed,
        }
    }

    /// Drop all state for a tenant (offboarding).
    pub fn remove_tenant(&self, tenant: &TenantId) {
        self.circuits.write().remove(tenant);
    }
}
