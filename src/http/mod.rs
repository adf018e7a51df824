//! HTTP edge of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id and trace layers)
//!     → request.rs (buffer body, build GatewayRequest)
//!     → reactor::Dispatcher (API match, policies, backend)
//!     → response.rs (GatewayResponse → HTTP response)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
