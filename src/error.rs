//! Crate-level error taxonomy.
//!
//! Subsystems own their error enums (`SyncError`, `PolicyError`,
//! `BackendError`, `ExpressionError`, `ConfigError`); `GatewayError` is the
//! class a failure is reported as once it crosses a subsystem boundary.
//!
//! | Class                 | Destination                                      |
//! |-----------------------|--------------------------------------------------|
//! | NotFound              | fixed 404, debug log, metric                     |
//! | PolicyInterruption    | the policy's own response, debug log, metric     |
//! | PolicyFailure         | generic 500, error log, metric                   |
//! | Sync                  | warn/error log, retried or escalated by the sync |
//! | Config                | startup failure                                  |

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::execution::GatewayResponse;
use crate::policy::PolicyError;
use crate::sync::SyncError;

/// Body of the fixed response sent when no API matches a request.
pub const NOT_FOUND_MESSAGE: &str = "No context-path matches the request URI.";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No deployed API matches the request coordinates.
    #[error("no api matches host {host:?} and path {path}")]
    NotFound { host: Option<String>, path: String },

    /// A policy stopped the request with its own response.
    #[error("request interrupted with key {key} ({status})")]
    PolicyInterruption { key: String, status: StatusCode },

    /// A policy failed unexpectedly.
    #[error("policy {policy} failed: {source}")]
    PolicyFailure {
        policy: String,
        #[source]
        source: PolicyError,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status a client would observe for this class.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::PolicyInterruption { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the client-facing response. Internal details never leak.
    pub fn to_response(&self) -> GatewayResponse {
        let message = match self {
            GatewayError::NotFound { .. } => NOT_FOUND_MESSAGE,
            GatewayError::PolicyInterruption { .. } => "Request interrupted",
            _ => "Internal Server Error",
        };
        GatewayResponse::json(self.status(), &serde_json::json!({ "message": message }))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let rendered = self.to_response();
        let mut response = (rendered.status, rendered.body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
