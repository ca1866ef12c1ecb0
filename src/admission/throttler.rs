//! Fixed-window emission throttling, keyed by tenant.

use crate::config::ThrottleConfig;
use crate::types::TenantId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counter state for one tenant's current window.
struct TenantWindow {
    started: Instant,
    count: u32,
    /// Whether the approaching-limit advisory fired for this window.
    warned: bool,
}

impl TenantWindow {
    fn fresh() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
            warned: false,
        }
    }
}

/// Per-tenant fixed-window rate limiter.
///
/// `allow` is a pure check; `record_emission` is the mutation. The outer map
/// lock is held only to look up or insert the per-tenant slot, so one
/// tenant's window never serializes another's.
pub struct Throttler {
    config: ThrottleConfig,
    windows: RwLock<HashMap<TenantId, Arc<Mutex<TenantWindow>>>>,
}

impl Throttler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn window_for(&self, tenant: &TenantId) -> Arc<Mutex<TenantWindow>> {
        if let Some(window) = self.windows.read().get(tenant) {
            return Arc::clone(window);
        }

        let mut windows = self.windows.write();
        Arc::clone(
            windows
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TenantWindow::fresh()))),
        )
    }

    /// Whether `tenant` has budget left in its current window.
    ///
    /// Does not mutate any state. A tenant the throttler has never seen gets
    /// an implicit fresh window.
    pub fn allow(&self, tenant: &TenantId) -> bool {
        let window = match self.windows.read().get(tenant) {
            Some(window) => Arc::clone(window),
            None => return self.config.max_per_window > 0,
        };

        let window = window.lock();
        if window.started.elapsed() >= self.config.window {
            // Window has lapsed; the next record_emission rolls it.
            return self.config.max_per_window > 0;
        }

        window.count < self.config.max_per_window
    }

    /// Count one emission against `tenant`'s current window, rolling the
    /// window forward if its duration has elapsed.
    pub fn record_emission(&self, tenant: &TenantId) {
        let window = self.window_for(tenant);
        let mut window = window.lock();

        if window.started.elapsed() >= self.config.window {
            *window = TenantWindow::fresh();
        }

        window.count += 1;

        // Advisory only: one warning per window at >= 80% of budget.
        if !window.warned && window.count as u64 * 5 >= self.config.max_per_window as u64 * 4 {
            window.warned = true;
            tracing::warn!(
                tenant = %tenant,
                count = window.count,
                budget = self.config.max_per_window,
                "tenant approaching emission budget"
            );
        }
    }

    /// Fraction of the window budget spent (0.0 when no current window).
    pub fn utilization(&self, tenant: &TenantId) -> f64 {
        if self.config.max_per_window == 0 {
            return 1.0;
        }

        let window = match self.windows.read().get(tenant) {
            Some(window) => Arc::clone(window),
            None => return 0.0,
        };

        let window = window.lock();
        if window.started.elapsed() >= self.config.window {
            return 0.0;
        }

        window.count as f64 / self.config.max_per_window as f64
    }

    /// Time until `tenant`'s current window rolls over.
    pub fn retry_after(&self, tenant: &TenantId) -> Duration {
        let window = match self.windows.read().get(tenant) {
            Some(window) => Arc::clone(window),
            None => return Duration::ZERO,
        };

        let window = window.lock();
        self.config.window.saturating_sub(window.started.elapsed())
    }

    /// Drop all state for a tenant (offboarding).
    pub fn remove_tenant(&self, tenant: &TenantId) {
        self.windows.write().remove(tenant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(max: u32, window: Duration) -> Throttler {
        Throttler::new(ThrottleConfig {
            max_per_window: max,
            window,
        })
    }

    #[test]
    fn test_allows_until_budget_spent() {
        let t = throttler(3, Duration::from_secs(60));
        let tenant = TenantId::new("acme");

        for _ in 0..3 {
            assert!(t.allow(&tenant));
            t.record_emission(&tenant);
        }

        assert!(!t.allow(&tenant));
    }

    #[test]
    fn test_allow_is_pure() {
        let t = throttler(1, Duration::from_secs(60));
        let tenant = TenantId::new("acme");

        for _ in 0..10 {
            assert!(t.allow(&tenant));
        }
        t.record_emission(&tenant);
        assert!(!t.allow(&tenant));
    }

    #[test]
    fn test_window_rolls_over() {
        let t = throttler(2, Duration::from_millis(50));
        let tenant = TenantId::new("acme");

        t.record_emission(&tenant);
        t.record_emission(&tenant);
        assert!(!t.allow(&tenant));

        std::thread::sleep(Duration::from_millis(80));
        assert!(t.allow(&tenant));
        t.record_emission(&tenant);
        assert_eq!(t.utilization(&tenant), 0.5);
    }

    #[test]
    fn test_tenants_are_independent() {
        let t = throttler(2, Duration::from_secs(60));
        let a = TenantId::new("tenant-a");
        let b = TenantId::new("tenant-b");

        t.record_emission(&a);
        t.record_emission(&a);
        assert!(!t.allow(&a));

        // Tenant B is untouched by A's exhaustion.
        for _ in 0..2 {
            assert!(t.allow(&b));
            t.record_emission(&b);
        }
        assert!(!t.allow(&b));
        assert!(!t.allow(&a));
    }

    #[test]
    fn test_utilization_and_retry_after() {
        let t = throttler(4, Duration::from_secs(60));
        let tenant = TenantId::new("acme");

        assert_eq!(t.utilization(&tenant), 0.0);
        t.record_emission(&tenant);
        assert_eq!(t.utilization(&tenant), 0.25);
        assert!(t.retry_after(&tenant) <= Duration::from_secs(60));
    }

    #[test]
    fn test_remove_tenant_resets_budget() {
        let t = throttler(1, Duration::from_secs(60));
        let tenant = TenantId::new("acme");

        t.record_emission(&tenant);
        assert!(!t.allow(&tenant));

        t.remove_tenant(&tenant);
        assert!(t.allow(&tenant));
    }
}
