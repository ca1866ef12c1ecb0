//! Per-tenant admission control: throttling and failure containment.
//!
//! The admission controller gates every emission before it reaches storage:
//!
//! - [`Throttler`]: fixed-window emission budget per tenant.
//! - [`CircuitBreaker`]: per-tenant Closed/Open/HalfOpen state machine that
//!   stops traffic after repeated storage failures and probes recovery.
//!
//! All state is keyed by tenant. Exhausting one tenant's budget or opening
//! one tenant's circuit never changes admission results for any other tenant:
//! each tenant gets its own lock, so contention on one tenant cannot stall
//! emissions for another.

mod breaker;
mod throttler;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use throttler::Throttler;
