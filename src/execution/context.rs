//! Per-request execution context.
//!
//! One `ExecutionContext` is created per matched request and exclusively owned
//! by it. Policies read and mutate it through `&mut`; nothing in here is shared
//! across requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::definition::{ApiConfiguration, Phase, Stage};
use crate::execution::exchange::{GatewayRequest, GatewayResponse};
use crate::registry::matcher::path_info;
use crate::registry::ResolvedApi;

/// Well-known attribute names.
pub mod attributes {
    pub const API: &str = "api";
    pub const API_NAME: &str = "api.name";
    pub const API_DEPLOYED_AT: &str = "api.deployed-at";
    pub const ORGANIZATION: &str = "organization";
    pub const ENVIRONMENT: &str = "environment";
    pub const CONTEXT_PATH: &str = "context-path";
    pub const REQUEST_ID: &str = "request.id";
    pub const PLAN: &str = "plan";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const APPLICATION: &str = "application";
}

/// Why the normal flow of a request was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionCause {
    /// A policy answered the request itself.
    Policy,
    /// A policy failed unexpectedly.
    PolicyFailure,
    /// No plan could be selected for the caller.
    Security,
    /// The request deadline elapsed.
    Timeout,
    /// The client went away.
    Cancelled,
}

/// A terminal response produced before (or instead of) the backend one.
#[derive(Debug, Clone)]
pub struct Interruption {
    pub cause: InterruptionCause,
    pub key: String,
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
    /// Raw body. When absent, a JSON `{"message": ..}` body is rendered.
    pub body: Option<Bytes>,
}

impl Interruption {
    pub fn new(status: StatusCode, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: InterruptionCause::Policy,
            key: key.into(),
            status,
            message: message.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_cause(mut self, cause: InterruptionCause) -> Self {
        self.cause = cause;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Generic 500 for a failed policy. Details stay in the logs.
    pub fn failure() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "POLICY_ERROR",
            "Internal Server Error",
        )
        .with_cause(InterruptionCause::PolicyFailure)
    }

    pub fn timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "REQUEST_TIMEOUT", "Request timeout")
            .with_cause(InterruptionCause::Timeout)
    }

    pub fn cancelled() -> Self {
        let status = StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST);
        Self::new(status, "CLIENT_CANCELLED", "Client closed request")
            .with_cause(InterruptionCause::Cancelled)
    }

    pub fn to_response(&self) -> GatewayResponse {
        let mut response = match &self.body {
            Some(body) => {
                let mut response = GatewayResponse::new(self.status);
                response.body = body.clone();
                response
            }
            None => GatewayResponse::json(
                self.status,
                &serde_json::json!({ "message": self.message, "http_status_code": self.status.as_u16() }),
            ),
        };
        for (name, value) in &self.headers {
            response.headers.insert(name.clone(), value.clone());
        }
        response
    }
}

/// Outcome of one stage of one phase, recorded for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub stage: Stage,
    pub phase: Phase,
    pub outcome: &'static str,
    pub policies: usize,
    pub duration_us: u64,
}

/// Metrics accumulated while a request is processed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestMetrics {
    pub api_id: Option<String>,
    pub plan_id: Option<String>,
    pub application_id: Option<String>,
    pub status: u16,
    pub interruption_key: Option<String>,
    pub interruption_cause: Option<InterruptionCause>,
    pub failed_policy: Option<String>,
    pub backend_ms: Option<u64>,
    pub backend_error: Option<String>,
    pub phases: Vec<PhaseRecord>,
}

pub struct ExecutionContext {
    request: GatewayRequest,
    response: GatewayResponse,
    attributes: HashMap<String, Value>,
    metrics: RequestMetrics,
    interruption: Option<Interruption>,
    api: Option<Arc<ApiConfiguration>>,
    context_path: String,
    started_at: Instant,
    received_at_ms: i64,
}

impl ExecutionContext {
    /// Context for a request that is not bound to an API yet.
    pub fn new(request: GatewayRequest) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(attributes::REQUEST_ID.to_string(), Value::from(request.id.clone()));
        Self {
            request,
            response: GatewayResponse::default(),
            attributes,
            metrics: RequestMetrics::default(),
            interruption: None,
            api: None,
            context_path: "/".to_string(),
            started_at: Instant::now(),
            received_at_ms: crate::execution::epoch_millis(),
        }
    }

    /// Context bound to a matched API.
    pub fn for_api(request: GatewayRequest, resolved: &ResolvedApi) -> Self {
        let mut ctx = Self::new(request);
        let api = &resolved.api;
        ctx.set_attribute(attributes::API, api.id.clone());
        ctx.set_attribute(attributes::API_NAME, api.name.clone());
        ctx.set_attribute(attributes::API_DEPLOYED_AT, api.deployed_at);
        ctx.set_attribute(attributes::CONTEXT_PATH, resolved.context_path.clone());
        if let Some(org) = &api.organization_id {
            ctx.set_attribute(attributes::ORGANIZATION, org.clone());
        }
        if let Some(env) = &api.environment_id {
            ctx.set_attribute(attributes::ENVIRONMENT, env.clone());
        }
        ctx.metrics.api_id = Some(api.id.clone());
        ctx.context_path = resolved.context_path.clone();
        ctx.api = Some(Arc::clone(api));
        ctx
    }

    pub fn request(&self) -> &GatewayRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut GatewayRequest {
        &mut self.request
    }

    pub fn response(&self) -> &GatewayResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut GatewayResponse {
        &mut self.response
    }

    pub fn set_response(&mut self, response: GatewayResponse) {
        self.response = response;
    }

    pub fn api(&self) -> Option<&Arc<ApiConfiguration>> {
        self.api.as_ref()
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Request path relative to the matched base path.
    pub fn path_info(&self) -> &str {
        path_info(&self.context_path, &self.request.path)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn plan_id(&self) -> Option<&str> {
        self.attribute_str(attributes::PLAN)
    }

    /// Cut the exchange short. The interruption response replaces the current one.
    pub fn interrupt(&mut self, interruption: Interruption) {
        self.response = interruption.to_response();
        self.metrics.interruption_key = Some(interruption.key.clone());
        self.metrics.interruption_cause = Some(interruption.cause);
        self.interruption = Some(interruption);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption.is_some()
    }

    pub fn interruption(&self) -> Option<&Interruption> {
        self.interruption.as_ref()
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut RequestMetrics {
        &mut self.metrics
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn received_at_ms(&self) -> i64 {
        self.received_at_ms
    }

    pub fn into_response(self) -> GatewayResponse {
        self.response
    }
}
