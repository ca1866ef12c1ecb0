//! # Signal Bus
//!
//! A multi-tenant event-coordination layer: independent business modules
//! publish typed facts ("signals") and other modules react to them
//! asynchronously, without being coupled to each other's code.
//!
//! ## Core Concepts
//!
//! - **Signals**: typed, tenant-scoped facts with confidence, priority, an
//!   opaque payload, and a TTL
//! - **Admission control**: a per-tenant throttle window and circuit breaker
//!   gate every emission before it reaches storage
//! - **Durable store**: tenant-partitioned append-only logs with
//!   crash-recovery replay
//! - **Subscriptions**: filtered live delivery over bounded channels; pollers
//!   use `query` and acknowledge with `mark_processed`
//! - **Audit trail**: an append-only mirror of every emission attempt,
//!   retained independently of signal expiry
//!
//! All mutable state is keyed first by tenant. Exhausting one tenant's rate
//! budget, opening its circuit, or flooding its subscribers has no effect on
//! any other tenant.
//!
//! ## Example
//!
//! ```ignore
//! use signalbus::{BusConfig, Coordinator, Priority, SignalDraft, TenantId};
//!
//! let bus = Coordinator::open(BusConfig {
//!     path: "./bus-data".into(),
//!     ..Default::default()
//! })?;
//!
//! let tenant = TenantId::new("acme");
//! let signal = bus.emit(
//!     &tenant,
//!     SignalDraft::new("lead.qualified")
//!         .with_subject("lead-42")
//!         .with_confidence(0.87)
//!         .with_priority(Priority::High),
//! )?;
//!
//! println!("stored as {}", signal.id);
//! ```

pub mod admission;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use admission::{Admission, CircuitBreaker, CircuitState, Throttler};
pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use config::{BreakerConfig, BusConfig, ThrottleConfig};
pub use coordinator::Coordinator;
pub use error::{BusError, Result};
pub use store::{SignalBackend, SignalStore, StoreConfig, TenantLog};
pub use subscriptions::{
    BusEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionRegistry,
};
pub use types::*;
