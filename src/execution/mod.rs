//! Request execution state.
//!
//! # Responsibilities
//! - Transport-neutral request/response views (`exchange.rs`)
//! - Per-request context with attributes, metrics and interruption state
//!
//! # Design Decisions
//! - The context is owned by exactly one request; no interior mutability
//! - Interruptions are values, rendered into the response immediately

pub mod context;
pub mod exchange;

use std::time::{SystemTime, UNIX_EPOCH};

pub use context::{
    attributes, ExecutionContext, Interruption, InterruptionCause, PhaseRecord, RequestMetrics,
};
pub use exchange::{GatewayRequest, GatewayResponse};

/// Wall clock in epoch milliseconds.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
