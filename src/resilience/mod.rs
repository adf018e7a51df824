//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failing call (sync apply, counter store, backend):
//!     → backoff.rs (retry with exponential delay + jitter, bounded attempts)
//!     → circuit_breaker.rs (track failures, fail fast while open)
//! ```
//!
//! # Design Decisions
//! - Every retry loop is bounded; exhaustion is reported, never spun on
//! - Circuit breaker prevents cascading failures
//! - Breaker state is keyed and shared, never per request

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{calculate_backoff, RetryPolicy};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakers, CircuitState};
