//! Subscription types for live signal delivery.

use crate::types::{Signal, SignalFilter, TenantId};

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered deliveries before the subscriber is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    /// Which signals to deliver.
    pub filter: SignalFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SignalFilter::default(),
        }
    }
}

impl SubscriptionConfig {
    pub fn filtered(filter: SignalFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Events delivered to subscribers.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// A matching signal was accepted.
    Signal(Signal),

    /// The subscription was removed; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Delivery buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The tenant was offboarded and its subscriptions torn down.
    TenantOffboarded,
}

/// Handle to receive deliveries and identify the subscription.
///
/// Delivery is message-passing: the emitting side never waits on a
/// subscriber, it only `try_send`s into this handle's bounded channel.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub tenant: TenantId,
    pub(crate) receiver: crossbeam_channel::Receiver<BusEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<BusEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<BusEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<BusEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
