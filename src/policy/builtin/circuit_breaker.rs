//! `circuit-breaker` policy.
//!
//! Guards the backend of an API with a shared [`CircuitBreaker`]. The request
//! hook asks for permission and leaves a marker attribute; the response hook
//! reports the outcome only for requests that were let through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::execution::{attributes, ExecutionContext, Interruption};
use crate::policy::builtin::parse_config;
use crate::policy::{Policy, PolicyError, StepOutcome};
use crate::resilience::{CircuitBreaker, CircuitBreakers};

pub const POLICY_ID: &str = "circuit-breaker";

const ACQUIRED_ATTRIBUTE: &str = "circuit-breaker.acquired";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_time_ms: u64,
    /// Responses with a status at or above this count as failures.
    pub failure_status_from: u16,
    /// Breaker name. Defaults to the api id.
    pub key: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time_ms: 10_000,
            failure_status_from: 500,
            key: None,
        }
    }
}

pub struct CircuitBreakerPolicy {
    config: CircuitBreakerConfig,
    breakers: Arc<CircuitBreakers>,
}

impl CircuitBreakerPolicy {
    pub fn from_config(configuration: &Value, breakers: Arc<CircuitBreakers>) -> Result<Self, PolicyError> {
        let config: CircuitBreakerConfig = parse_config(POLICY_ID, configuration)?;
        Ok(Self { config, breakers })
    }

    fn breaker(&self, ctx: &ExecutionContext) -> Arc<CircuitBreaker> {
        let key = self
            .config
            .key
            .clone()
            .or_else(|| ctx.attribute_str(attributes::API).map(str::to_string))
            .unwrap_or_default();
        self.breakers.get_or_create(
            &key,
            self.config.failure_threshold,
            Duration::from_millis(self.config.recovery_time_ms),
        )
    }
}

#[async_trait]
impl Policy for CircuitBreakerPolicy {
    fn id(&self) -> &str {
        POLICY_ID
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        if !self.breaker(ctx).try_acquire() {
            return StepOutcome::Interrupt(Interruption::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "CIRCUIT_BREAKER_OPEN",
                "Service Unavailable",
            ));
        }
        ctx.set_attribute(ACQUIRED_ATTRIBUTE, true);
        StepOutcome::Continue
    }

    async fn on_response(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        if ctx.remove_attribute(ACQUIRED_ATTRIBUTE).is_none() {
            return StepOutcome::Continue;
        }
        let failed = ctx.metrics().backend_error.is_some()
            || ctx.response().status.as_u16() >= self.config.failure_status_from;
        let breaker = self.breaker(ctx);
        if failed {
            breaker.record_failure();
        } else {
            breaker.record_success();
        }
        StepOutcome::Continue
    }
}
