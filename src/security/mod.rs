//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Matched request:
//!     → plan.rs (api key / keyless → plan, subscription, application)
//!     → plan flows run under the selected plan
//!
//! Rate-limit policy:
//!     → rate_limit.rs (atomic increment-and-check per key and window)
//! ```
//!
//! # Design Decisions
//! - Fail closed: no usable plan means 401
//! - Counters sit behind a trait so a shared store can replace the local one
//! - No trust in client input: keys are looked up, never decoded

pub mod plan;
pub mod rate_limit;

pub use plan::PlanSelector;
pub use rate_limit::{CounterDecision, CounterError, CounterStore, InMemoryCounterStore};
