//! Per-tenant subscription registry and fan-out.

use crate::types::{Signal, TenantId};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{BusEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<BusEvent>,
}

impl Subscription {
    /// Try to deliver. Returns false when the buffer is full or the receiver
    /// is gone; either way the subscriber is pruned.
    fn try_send(&self, event: BusEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Registry of live subscriptions, keyed first by tenant.
///
/// Fan-out for a signal only ever iterates the emitting tenant's map, so
/// there is no global subscription list a bug could broadcast across.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<TenantId, HashMap<SubscriptionId, Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription for future signals of one tenant.
    pub fn subscribe(&self, tenant: &TenantId, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .entry(tenant.clone())
            .or_default()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle {
            id,
            tenant: tenant.clone(),
            receiver,
        }
    }

    /// Remove a subscription. Safe to call any number of times; calls after
    /// the first are no-ops.
    pub fn unsubscribe(&self, tenant: &TenantId, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(tenant_subs) = subs.get_mut(tenant) {
            if let Some(sub) = tenant_subs.remove(&id) {
                let _ = sub.try_send(BusEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
            }
            if tenant_subs.is_empty() {
                subs.remove(tenant);
            }
        }
    }

    /// Deliver a freshly accepted signal to the tenant's matching
    /// subscriptions. Never blocks: slow subscribers are dropped, and one
    /// subscriber's overflow cannot prevent delivery to the others.
    pub fn notify(&self, tenant: &TenantId, signal: &Signal) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            let tenant_subs = match subs.get(tenant) {
                Some(tenant_subs) => tenant_subs,
                None => return,
            };

            for (id, sub) in tenant_subs.iter() {
                if sub.config.filter.matches(signal)
                    && !sub.try_send(BusEvent::Signal(signal.clone()))
                {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            if let Some(tenant_subs) = subs.get_mut(tenant) {
                for id in to_remove {
                    if let Some(sub) = tenant_subs.remove(&id) {
                        tracing::warn!(
                            tenant = %tenant,
                            subscription = id.0,
                            "dropping slow subscriber"
                        );
                        // Best effort; the buffer is likely still full.
                        let _ = sub.try_send(BusEvent::Dropped {
                            reason: DropReason::BufferOverflow,
                        });
                    }
                }
                if tenant_subs.is_empty() {
                    subs.remove(tenant);
                }
            }
        }
    }

    /// Tear down every subscription of an offboarded tenant. Returns how
    /// many were removed.
    pub fn drop_tenant(&self, tenant: &TenantId) -> usize {
        let tenant_subs = match self.subscriptions.write().remove(tenant) {
            Some(tenant_subs) => tenant_subs,
            None => return 0,
        };

        let count = tenant_subs.len();
        for sub in tenant_subs.into_values() {
            let _ = sub.try_send(BusEvent::Dropped {
                reason: DropReason::TenantOffboarded,
            });
        }
        count
    }

    /// Active subscription count for a tenant (monitoring).
    pub fn subscription_count(&self, tenant: &TenantId) -> usize {
        self.subscriptions
            .read()
            .get(tenant)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Signal, SignalFilter, SignalId, Timestamp};
    use std::time::Duration;

    fn make_signal(tenant: &TenantId, signal_type: &str, priority: Priority) -> Signal {
        Signal {
            id: SignalId(1),
            tenant: tenant.clone(),
            signal_type: signal_type.to_string(),
            subject_id: None,
            confidence: 1.0,
            priority,
            payload: serde_json::Map::new(),
            created_at: Timestamp::now(),
            expires_at: Timestamp::now().saturating_add(Duration::from_secs(60)),
            processed: false,
            processed_at: None,
            processing_result: None,
        }
    }

    #[test]
    fn test_subscribe_and_receive_matching() {
        let registry = SubscriptionRegistry::new();
        let tenant = TenantId::new("acme");

        let handle = registry.subscribe(
            &tenant,
            SubscriptionConfig::filtered(SignalFilter::types(vec!["lead.qualified".to_string()])),
        );

        registry.notify(&tenant, &make_signal(&tenant, "lead.qualified", Priority::High));
        registry.notify(&tenant, &make_signal(&tenant, "deal.won", Priority::High));

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            BusEvent::Signal(signal) => assert_eq!(signal.signal_type, "lead.qualified"),
            other => panic!("expected signal, got {:?}", other),
        }
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_fanout_is_tenant_scoped() {
        let registry = SubscriptionRegistry::new();
        let a = TenantId::new("tenant-a");
        let b = TenantId::new("tenant-b");

        let handle_b = registry.subscribe(&b, SubscriptionConfig::default());
        registry.notify(&a, &make_signal(&a, "lead.qualified", Priority::High));

        assert!(handle_b.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let tenant = TenantId::new("acme");

        let handle = registry.subscribe(&tenant, SubscriptionConfig::default());
        assert_eq!(registry.subscription_count(&tenant), 1);

        registry.unsubscribe(&tenant, handle.id);
        registry.unsubscribe(&tenant, handle.id);
        assert_eq!(registry.subscription_count(&tenant), 0);

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            BusEvent::Dropped { reason } => assert_eq!(reason, DropReason::Unsubscribed),
            other => panic!("expected drop notice, got {:?}", other),
        }
    }

    #[test]
    fn test_slow_subscriber_dropped_others_unaffected() {
        let registry = SubscriptionRegistry::new();
        let tenant = TenantId::new("acme");

        let slow = registry.subscribe(
            &tenant,
            SubscriptionConfig {
                buffer_size: 1,
                ..Default::default()
            },
        );
        let healthy = registry.subscribe(
            &tenant,
            SubscriptionConfig {
                buffer_size: 16,
                ..Default::default()
            },
        );

        for _ in 0..4 {
            registry.notify(&tenant, &make_signal(&tenant, "lead.qualified", Priority::Low));
        }

        // The slow subscriber overflowed and was pruned.
        assert_eq!(registry.subscription_count(&tenant), 1);
        drop(slow);

        let mut received = 0;
        while let Ok(BusEvent::Signal(_)) = healthy.try_recv() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[test]
    fn test_drop_tenant_tears_down_all() {
        let registry = SubscriptionRegistry::new();
        let tenant = TenantId::new("acme");

        let first = registry.subscribe(&tenant, SubscriptionConfig::default());
        let _second = registry.subscribe(&tenant, SubscriptionConfig::default());

        assert_eq!(registry.drop_tenant(&tenant), 2);
        assert_eq!(registry.subscription_count(&tenant), 0);
        assert_eq!(registry.drop_tenant(&tenant), 0);

        match first.recv_timeout(Duration::from_millis(100)).unwrap() {
            BusEvent::Dropped { reason } => assert_eq!(reason, DropReason::TenantOffboarded),
            other => panic!("expected drop notice, got {:?}", other),
        }
    }
}
