//! Per-request telemetry.
//!
//! The dispatcher hands one [`RequestRecord`] per finished request to a
//! [`TelemetrySink`]. Shipping records elsewhere is the sink's business.

use serde::Serialize;

use crate::execution::{ExecutionContext, InterruptionCause, PhaseRecord};

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub timestamp_ms: i64,
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub api_id: Option<String>,
    pub plan_id: Option<String>,
    pub application_id: Option<String>,
    pub status: u16,
    pub duration_ms: u64,
    pub backend_ms: Option<u64>,
    pub backend_error: Option<String>,
    pub interruption_key: Option<String>,
    pub interruption_cause: Option<InterruptionCause>,
    pub failed_policy: Option<String>,
    pub phases: Vec<PhaseRecord>,
}

impl RequestRecord {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        let request = ctx.request();
        let metrics = ctx.metrics();
        Self {
            request_id: request.id.clone(),
            timestamp_ms: ctx.received_at_ms(),
            method: request.method.to_string(),
            path: request.path.clone(),
            host: request.host.clone(),
            api_id: metrics.api_id.clone(),
            plan_id: metrics.plan_id.clone(),
            application_id: metrics.application_id.clone(),
            status: ctx.response().status.as_u16(),
            duration_ms: ctx.elapsed().as_millis() as u64,
            backend_ms: metrics.backend_ms,
            backend_error: metrics.backend_error.clone(),
            interruption_key: metrics.interruption_key.clone(),
            interruption_cause: metrics.interruption_cause,
            failed_policy: metrics.failed_policy.clone(),
            phases: metrics.phases.clone(),
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: RequestRecord);
}

/// Emits each record as one structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: RequestRecord) {
        let phases = serde_json::to_string(&record.phases).unwrap_or_default();
        tracing::info!(
            target: "api_gateway::access",
            request_id = %record.request_id,
            method = %record.method,
            path = %record.path,
            api_id = record.api_id.as_deref().unwrap_or("-"),
            plan_id = record.plan_id.as_deref().unwrap_or("-"),
            status = record.status,
            duration_ms = record.duration_ms,
            backend_ms = record.backend_ms,
            interruption_key = record.interruption_key.as_deref(),
            phases = %phases,
            "Request completed"
        );
    }
}
