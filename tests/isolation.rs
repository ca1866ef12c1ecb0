//! Tenant isolation properties.
//!
//! The central design invariant: nothing tenant A does — exhausting its rate
//! budget, opening its circuit, flooding its subscribers — may change any
//! admission result for tenant B.

use proptest::prelude::*;
use signalbus::{
    BreakerConfig, BusConfig, BusEvent, CircuitBreaker, CircuitState, Coordinator, SignalDraft,
    SubscriptionConfig, TenantId, ThrottleConfig, Throttler,
};
use std::time::Duration;
use tempfile::TempDir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Exhausting one tenant's throttle budget never changes `allow` for
    /// another tenant.
    #[test]
    fn prop_throttle_isolation(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
        prop_assume!(a != b);
        let a = TenantId::new(a);
        let b = TenantId::new(b);

        let throttler = Throttler::new(ThrottleConfig {
            max_per_window: 100,
            window: Duration::from_secs(60),
        });

        for _ in 0..100 {
            throttler.record_emission(&a);
        }
        prop_assert!(!throttler.allow(&a));

        for _ in 0..10 {
            prop_assert!(throttler.allow(&b));
            throttler.record_emission(&b);
        }
    }

    /// Opening one tenant's circuit never opens another's.
    #[test]
    fn prop_breaker_isolation(a in "[a-z]{1,12}", b in "[a-z]{1,12}", failures in 5u32..50) {
        prop_assume!(a != b);
        let a = TenantId::new(a);
        let b = TenantId::new(b);

        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        });

        for _ in 0..failures {
            breaker.record_failure(&a);
        }
        prop_assert_eq!(breaker.state(&a), CircuitState::Open);

        prop_assert_eq!(breaker.state(&b), CircuitState::Closed);
        prop_assert!(breaker.try_acquire(&b).is_ok());
    }
}

#[test]
fn test_exhausted_tenant_does_not_affect_neighbor() {
    let dir = TempDir::new().unwrap();
    let bus = Coordinator::open(BusConfig {
        path: dir.path().join("bus"),
        throttle: ThrottleConfig {
            max_per_window: 10,
            window: Duration::from_secs(60),
        },
        ..Default::default()
    })
    .unwrap();

    let a = TenantId::new("tenant-a");
    let b = TenantId::new("tenant-b");

    for _ in 0..10 {
        bus.emit(&a, SignalDraft::new("lead.scored")).unwrap();
    }
    let err = bus.emit(&a, SignalDraft::new("lead.scored")).unwrap_err();
    assert_eq!(err.reason(), "throttled");

    // Tenant B's next 10 emissions all succeed.
    for _ in 0..10 {
        bus.emit(&b, SignalDraft::new("lead.scored")).unwrap();
    }

    // And A is still throttled; B's traffic did not refill A.
    let err = bus.emit(&a, SignalDraft::new("lead.scored")).unwrap_err();
    assert_eq!(err.reason(), "throttled");
}

#[test]
fn test_subscriptions_never_cross_tenants() {
    let dir = TempDir::new().unwrap();
    let bus = Coordinator::open(BusConfig {
        path: dir.path().join("bus"),
        ..Default::default()
    })
    .unwrap();

    let a = TenantId::new("tenant-a");
    let b = TenantId::new("tenant-b");

    let handle_a = bus.subscribe(&a, SubscriptionConfig::default()).unwrap();
    let handle_b = bus.subscribe(&b, SubscriptionConfig::default()).unwrap();

    bus.emit(&a, SignalDraft::new("lead.qualified")).unwrap();

    match handle_a.recv_timeout(Duration::from_millis(100)).unwrap() {
        BusEvent::Signal(signal) => {
            assert_eq!(signal.tenant, a);
            assert_eq!(signal.signal_type, "lead.qualified");
        }
        other => panic!("expected signal, got {:?}", other),
    }

    assert!(handle_b.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_concurrent_emitters_stay_isolated() {
    let dir = TempDir::new().unwrap();
    let bus = std::sync::Arc::new(
        Coordinator::open(BusConfig {
            path: dir.path().join("bus"),
            throttle: ThrottleConfig {
                max_per_window: 50,
                window: Duration::from_secs(60),
            },
            ..Default::default()
        })
        .unwrap(),
    );

    let mut handles = Vec::new();
    for t in 0..4 {
        let bus = std::sync::Arc::clone(&bus);
        handles.push(std::thread::spawn(move || {
            let tenant = TenantId::new(format!("tenant-{}", t));
            let mut accepted = 0;
            for _ in 0..50 {
                if bus.emit(&tenant, SignalDraft::new("lead.scored")).is_ok() {
                    accepted += 1;
                }
            }
            (tenant, accepted)
        }));
    }

    for handle in handles {
        let (tenant, accepted) = handle.join().unwrap();
        // Each tenant fits exactly within its own budget.
        assert_eq!(accepted, 50);
        assert_eq!(bus.throttle_utilization(&tenant), 1.0);
    }
}
