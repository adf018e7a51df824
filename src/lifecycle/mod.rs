//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Registries → policies, expressions, backend → Dispatcher
//!            → sync loop, eviction, admin → gateway listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight (inflight.rs) → Clear registries
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: registries first, listeners last
//! - Ordered shutdown: stop accept, drain, close
//! - Draining has a deadline: requests still running after it are abandoned

pub mod inflight;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use inflight::{InFlightGuard, InFlightTracker};
pub use shutdown::Shutdown;
pub use startup::GatewayRuntime;
