//! Live push delivery of accepted signals.
//!
//! Consumers register a filtered subscription and receive matching signals
//! over a bounded channel. The emitting side never waits on subscribers:
//! delivery is `try_send`, a full buffer drops that one subscriber, and
//! drops are announced with a final [`BusEvent::Dropped`].
//!
//! Subscriptions are registered per tenant and only ever see that tenant's
//! signals.
//!
//! # Example
//!
//! ```ignore
//! let handle = bus.subscribe(
//!     &tenant,
//!     SubscriptionConfig::filtered(SignalFilter::min_priority(Priority::High)),
//! )?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(BusEvent::Signal(signal)) => println!("got {}", signal.signal_type),
//!         Ok(BusEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod registry;
mod types;

pub use registry::SubscriptionRegistry;
pub use types::{BusEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId};
