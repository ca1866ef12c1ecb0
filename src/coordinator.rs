//! Coordinator tying all bus components together.

use crate::admission::{CircuitBreaker, CircuitState, Throttler};
use crate::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::store::{SignalBackend, SignalStore, StoreConfig};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
use crate::types::{Page, ProcessingResult, Signal, SignalDraft, SignalFilter, SignalId, TenantId};
use std::sync::Arc;

/// The public entry point of the signal bus.
///
/// Producers [`emit`](Coordinator::emit) signals; consumers either
/// [`subscribe`](Coordinator::subscribe) for push delivery or
/// [`query`](Coordinator::query) for pull, and acknowledge handling with
/// [`mark_processed`](Coordinator::mark_processed).
///
/// Every emission runs the same pipeline: shape validation, per-tenant
/// throttle check, per-tenant circuit check, durable append, subscription
/// fan-out. Every attempt is audited regardless of outcome.
pub struct Coordinator {
    config: BusConfig,
    store: Arc<dyn SignalBackend>,
    throttler: Throttler,
    breaker: CircuitBreaker,
    audit: AuditLog,
    registry: SubscriptionRegistry,
}

impl Coordinator {
    /// Open the bus over the durable store at `config.path`.
    pub fn open(config: BusConfig) -> Result<Self> {
        let store = SignalStore::open(StoreConfig {
            path: config.path.clone(),
            create_if_missing: config.create_if_missing,
            default_ttl: config.default_ttl,
            max_page_size: config.max_page_size,
            sync_interval: config.sync_interval,
        })?;

        Ok(Self::assemble(Arc::new(store), config))
    }

    /// Open the bus over a caller-supplied storage backend.
    ///
    /// Admission state, the audit trail, and subscriptions are still managed
    /// here; only signal persistence is substituted.
    pub fn with_backend(store: Arc<dyn SignalBackend>, config: BusConfig) -> Self {
        Self::assemble(store, config)
    }

    fn assemble(store: Arc<dyn SignalBackend>, config: BusConfig) -> Self {
        Self {
            throttler: Throttler::new(config.throttle),
            breaker: CircuitBreaker::new(config.breaker),
            audit: AuditLog::open(config.path.clone()),
            registry: SubscriptionRegistry::new(),
            store,
            config,
        }
    }

    /// Emit a signal for a tenant.
    ///
    /// Returns the stored signal, or a typed rejection. Throttle and
    /// circuit-open rejections are routine overload conditions; callers
    /// should back off using the embedded `retry_after` rather than treat
    /// them as bugs.
    pub fn emit(&self, tenant: &TenantId, draft: SignalDraft) -> Result<Signal> {
        // Shape validation happens before any admission state is touched, so
        // a buggy producer can neither spend budget nor trip the breaker.
        if let Err(e) = self.validate(tenant, &draft) {
            self.audit.record(
                tenant,
                &draft,
                AuditOutcome::RejectedValidation,
                None,
                Some(e.to_string()),
            );
            return Err(e);
        }

        if !self.throttler.allow(tenant) {
            let retry_after = self.throttler.retry_after(tenant);
            self.audit.record(
                tenant,
                &draft,
                AuditOutcome::RejectedThrottled,
                None,
                Some(format!("retry after {:?}", retry_after)),
            );
            return Err(BusError::Throttled {
                tenant: tenant.clone(),
                retry_after,
            });
        }

        if let Err(retry_after) = self.breaker.try_acquire(tenant) {
            self.audit.record(
                tenant,
                &draft,
                AuditOutcome::RejectedCircuitOpen,
                None,
                Some(format!("retry after {:?}", retry_after)),
            );
            return Err(BusError::CircuitOpen {
                tenant: tenant.clone(),
                retry_after,
            });
        }

        self.throttler.record_emission(tenant);

        match self.store.append(tenant, draft.clone()) {
            Ok(signal) => {
                self.breaker.record_success(tenant);
                self.registry.notify(tenant, &signal);
                self.audit
                    .record(tenant, &draft, AuditOutcome::Accepted, Some(signal.id), None);
                Ok(signal)
            }
            Err(e) => {
                // Only admission-path storage failures count toward the
                // breaker; this is that path.
                self.breaker.record_failure(tenant);
                self.audit.record(
                    tenant,
                    &draft,
                    AuditOutcome::RejectedStorage,
                    None,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Register a live subscription for one tenant's future signals.
    pub fn subscribe(
        &self,
        tenant: &TenantId,
        config: SubscriptionConfig,
    ) -> Result<SubscriptionHandle> {
        if !tenant.is_valid() {
            return Err(BusError::Validation(format!(
                "invalid tenant id: {:?}",
                tenant.as_str()
            )));
        }
        Ok(self.registry.subscribe(tenant, config))
    }

    /// Remove a subscription. Idempotent no-op after the first call.
    pub fn unsubscribe(&self, tenant: &TenantId, id: SubscriptionId) {
        self.registry.unsubscribe(tenant, id);
    }

    /// Pull signals for a tenant, newest first.
    ///
    /// Read-path errors here never affect the tenant's circuit.
    pub fn query(&self, tenant: &TenantId, filter: &SignalFilter, page: &Page) -> Result<Vec<Signal>> {
        self.store.query(tenant, filter, page)
    }

    /// Acknowledge handling of a signal (idempotent, last write wins).
    pub fn mark_processed(
        &self,
        tenant: &TenantId,
        id: SignalId,
        result: ProcessingResult,
    ) -> Result<Signal> {
        self.store.mark_processed(tenant, id, result)
    }

    /// Garbage-collect a tenant's expired signals. Audit entries are
    /// untouched; they outlive the signals they describe.
    pub fn delete_expired(&self, tenant: &TenantId) -> Result<usize> {
        self.store.delete_expired(tenant)
    }

    /// Read back a tenant's audit trail for compliance review.
    pub fn audit_entries(&self, tenant: &TenantId) -> Result<Vec<AuditEntry>> {
        self.audit.entries(tenant)
    }

    /// Current circuit state for a tenant (monitoring).
    pub fn circuit_state(&self, tenant: &TenantId) -> CircuitState {
        self.breaker.state(tenant)
    }

    /// Fraction of the tenant's throttle budget spent in the current window.
    pub fn throttle_utilization(&self, tenant: &TenantId) -> f64 {
        self.throttler.utilization(tenant)
    }

    /// Active subscription count for a tenant (monitoring).
    pub fn subscription_count(&self, tenant: &TenantId) -> usize {
        self.registry.subscription_count(tenant)
    }

    /// Tear down a tenant's live state on offboarding: subscriptions,
    /// throttle window, and circuit. Stored signals and the audit trail are
    /// retained for the data retention policy to handle.
    pub fn offboard_tenant(&self, tenant: &TenantId) -> usize {
        let removed = self.registry.drop_tenant(tenant);
        self.throttler.remove_tenant(tenant);
        self.breaker.remove_tenant(tenant);
        tracing::info!(tenant = %tenant, subscriptions = removed, "tenant offboarded");
        removed
    }

    /// The configuration the bus was opened with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn validate(&self, tenant: &TenantId, draft: &SignalDraft) -> Result<()> {
        if !tenant.is_valid() {
            return Err(BusError::Validation(format!(
                "invalid tenant id: {:?}",
                tenant.as_str()
            )));
        }

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

        Ok(())
    }
}
