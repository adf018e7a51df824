//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher, sync engine, policies
//!     → logging.rs    tracing subscriber (pretty or JSON, RUST_LOG filter)
//!     → metrics.rs    gateway_* counters and gauges, Prometheus exporter
//!
//! dispatcher, once per request
//!     → telemetry.rs  RequestRecord → TelemetrySink
//! ```
//!
//! # Design Decisions
//! - Every log line about a request carries its `request_id`
//! - Recording a metric without an installed exporter is a no-op

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::{RequestRecord, TelemetrySink, TracingSink};
