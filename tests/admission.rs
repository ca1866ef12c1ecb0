//! Admission-control behavior through the full emission pipeline.

use signalbus::{
    AuditOutcome, BreakerConfig, BusConfig, CircuitState, Coordinator, Page, ProcessingResult,
    Signal, SignalBackend, SignalDraft, SignalFilter, SignalId, SignalStore, StoreConfig, TenantId,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Wraps the real store and fails appends for one tenant a set number of
/// times, to drive the circuit breaker from the outside.
struct FlakyBackend {
    inner: SignalStore,
    fail_tenant: TenantId,
    failures_left: AtomicU32,
    append_attempts: AtomicU32,
}

impl FlakyBackend {
    fn new(dir: &TempDir, fail_tenant: TenantId, failures: u32) -> Self {
        Self {
            inner: SignalStore::open(StoreConfig {
                path: dir.path().join("store"),
                ..Default::default()
            })
            .unwrap(),
            fail_tenant,
            failures_left: AtomicU32::new(failures),
            append_attempts: AtomicU32::new(0),
        }
    }

    fn attempts(&self) -> u32 {
        self.append_attempts.load(Ordering::SeqCst)
    }
}

impl SignalBackend for FlakyBackend {
    fn append(&self, tenant: &TenantId, draft: SignalDraft) -> signalbus::Result<Signal> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);

        if tenant == &self.fail_tenant {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
        }

        self.inner.append(tenant, draft)
    }

    fn query(
        &self,
        tenant: &TenantId,
        filter: &SignalFilter,
        page: &Page,
    ) -> signalbus::Result<Vec<Signal>> {
        self.inner.query(tenant, filter, page)
    }

    fn mark_processed(
        &self,
        tenant: &TenantId,
        id: SignalId,
        result: ProcessingResult,
    ) -> signalbus::Result<Signal> {
        self.inner.mark_processed(tenant, id, result)
    }

    fn delete_expired(&self, tenant: &TenantId) -> signalbus::Result<usize> {
        self.inner.delete_expired(tenant)
    }
}

fn flaky_bus(dir: &TempDir, failures: u32, reset: Duration) -> (Coordinator, Arc<FlakyBackend>) {
    let backend = Arc::new(FlakyBackend::new(dir, TenantId::new("acme"), failures));
    let bus = Coordinator::with_backend(
        Arc::clone(&backend) as Arc<dyn SignalBackend>,
        BusConfig {
            path: dir.path().join("bus"),
            breaker: BreakerConfig {
                failure_threshold: 5,
                reset_timeout: reset,
            },
            ..Default::default()
        },
    );
    (bus, backend)
}

#[test]
fn test_circuit_opens_then_recovers_via_probe() {
    let dir = TempDir::new().unwrap();
    let (bus, backend) = flaky_bus(&dir, 5, Duration::from_millis(150));
    let tenant = TenantId::new("acme");

    // Five consecutive storage failures open the circuit.
    for _ in 0..5 {
        let err = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
        assert_eq!(err.reason(), "storage_error");
    }
    assert_eq!(bus.circuit_state(&tenant), CircuitState::Open);
    assert_eq!(backend.attempts(), 5);

    // While open, emissions are rejected without touching storage.
    let err = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
    assert_eq!(err.reason(), "circuit_open");
    assert_eq!(backend.attempts(), 5);

    // After the reset timeout, one probe goes through and succeeds.
    std::thread::sleep(Duration::from_millis(200));
    let signal = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap();
    assert_eq!(bus.circuit_state(&tenant), CircuitState::Closed);
    assert_eq!(backend.attempts(), 6);

    // Normal service resumed.
    bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap();
    assert!(signal.id < SignalId(u64::MAX));

    // The whole episode is on the audit trail.
    let entries = bus.audit_entries(&tenant).unwrap();
    let rejected_storage = entries
        .iter()
        .filter(|e| e.outcome == AuditOutcome::RejectedStorage)
        .count();
    let rejected_open = entries
        .iter()
        .filter(|e| e.outcome == AuditOutcome::RejectedCircuitOpen)
        .count();
    let accepted = entries
        .iter()
        .filter(|e| e.outcome == AuditOutcome::Accepted)
        .count();
    assert_eq!(rejected_storage, 5);
    assert_eq!(rejected_open, 1);
    assert_eq!(accepted, 2);
}

#[test]
fn test_failed_probe_reopens_circuit() {
    let dir = TempDir::new().unwrap();
    // Five failures to open, one more to fail the probe.
    let (bus, _backend) = flaky_bus(&dir, 6, Duration::from_millis(100));
    let tenant = TenantId::new("acme");

    for _ in 0..5 {
        bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
    }
    assert_eq!(bus.circuit_state(&tenant), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(150));

    // Probe runs and fails: straight back to Open.
    let err = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
    assert_eq!(err.reason(), "storage_error");
    assert_eq!(bus.circuit_state(&tenant), CircuitState::Open);

    // Immediately after, still rejected.
    let err = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
    assert_eq!(err.reason(), "circuit_open");

    // Second probe succeeds once the injected failures are spent.
    std::thread::sleep(Duration::from_millis(150));
    bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap();
    assert_eq!(bus.circuit_state(&tenant), CircuitState::Closed);
}

#[test]
fn test_validation_failures_never_trip_breaker() {
    let dir = TempDir::new().unwrap();
    let bus = Coordinator::open(BusConfig {
        path: dir.path().join("bus"),
        breaker: BreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        },
        ..Default::default()
    })
    .unwrap();
    let tenant = TenantId::new("acme");

    for _ in 0..20 {
        let err = bus
            .emit(&tenant, SignalDraft::new("lead.scored").with_confidence(7.0))
            .unwrap_err();
        assert_eq!(err.reason(), "validation");
    }

    assert_eq!(bus.circuit_state(&tenant), CircuitState::Closed);
    bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap();
}

#[test]
fn test_throttle_rejections_never_trip_breaker() {
    let dir = TempDir::new().unwrap();
    let bus = Coordinator::open(BusConfig {
        path: dir.path().join("bus"),
        throttle: signalbus::ThrottleConfig {
            max_per_window: 1,
            window: Duration::from_secs(60),
        },
        breaker: BreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        },
        ..Default::default()
    })
    .unwrap();
    let tenant = TenantId::new("acme");

    bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap();
    for _ in 0..10 {
        let err = bus.emit(&tenant, SignalDraft::new("lead.scored")).unwrap_err();
        assert_eq!(err.reason(), "throttled");
    }

    assert_eq!(bus.circuit_state(&tenant), CircuitState::Closed);
}
