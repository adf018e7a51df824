//! Backend invocation subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher (request phase completed, not interrupted):
//!     → BackendConnector::invoke(ctx)        exactly once per request
//!         → http.rs (pick endpoint, forward, buffer response)
//!             → endpoint.rs (round-robin, passive health)
//!     → GatewayResponse or BackendError
//!     → mapped into the context before the response phase
//! ```
//!
//! # Design Decisions
//! - The connector is a trait so tests and other protocols plug in
//! - Backend errors become 502/503/504 responses, never policy failures
//! - Timeouts are failures for passive health, 4xx are not

pub mod endpoint;
pub mod http;

use async_trait::async_trait;
use axum::http::StatusCode;
use thiserror::Error;

use crate::execution::{ExecutionContext, GatewayResponse};

pub use endpoint::{EndpointGroup, EndpointTarget, HealthState};
pub use http::HttpConnector;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("api {api_id} has no endpoint")]
    NoEndpoint { api_id: String },

    #[error("invalid endpoint target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("backend timed out")]
    Timeout,

    #[error("backend connection failed: {0}")]
    Connect(String),

    #[error("backend response unreadable: {0}")]
    Body(String),
}

impl BackendError {
    /// Status the client observes for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            BackendError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            BackendError::NoEndpoint { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn to_response(&self) -> GatewayResponse {
        let status = self.status();
        let message = match self {
            BackendError::Timeout => "Request timeout",
            BackendError::NoEndpoint { .. } => "No endpoint available",
            _ => "Bad Gateway",
        };
        GatewayResponse::json(
            status,
            &serde_json::json!({ "message": message, "http_status_code": status.as_u16() }),
        )
    }
}

/// Invokes the backend of the matched API.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<GatewayResponse, BackendError>;
}
