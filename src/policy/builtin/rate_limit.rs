//! `rate-limit` policy.
//!
//! Counts requests per (api, plan, subscription or client address) in a fixed
//! window through the shared [`CounterStore`]. Every call for one request
//! carries the same idempotency key, so store retries never double-count.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::execution::{attributes, ExecutionContext, Interruption};
use crate::policy::builtin::parse_config;
use crate::policy::{Policy, PolicyError, StepOutcome};
use crate::resilience::RetryPolicy;
use crate::security::{CounterDecision, CounterError, CounterStore};

pub const POLICY_ID: &str = "rate-limit";

const HEADER_LIMIT: &str = "x-rate-limit-limit";
const HEADER_REMAINING: &str = "x-rate-limit-remaining";
const HEADER_RESET: &str = "x-rate-limit-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStrategy {
    /// Let the request through when the counter store cannot answer.
    #[default]
    #[serde(alias = "FALLBACK_PASS_TROUGH")]
    FallbackPassThrough,
    /// Fail the request when the counter store cannot answer.
    BlockOnInternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub limit: u64,
    pub period_time: u64,
    pub period_time_unit: PeriodUnit,
    /// Extra literal appended to the counter key.
    pub key: Option<String>,
    pub add_headers: bool,
    pub error_strategy: ErrorStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            period_time: 1,
            period_time_unit: PeriodUnit::Seconds,
            key: None,
            add_headers: true,
            error_strategy: ErrorStrategy::default(),
        }
    }
}

impl RateLimitConfig {
    fn window(&self) -> Duration {
        let amount = self.period_time.max(1);
        match self.period_time_unit {
            PeriodUnit::Milliseconds => Duration::from_millis(amount),
            PeriodUnit::Seconds => Duration::from_secs(amount),
            PeriodUnit::Minutes => Duration::from_secs(amount * 60),
            PeriodUnit::Hours => Duration::from_secs(amount * 3600),
        }
    }
}

pub struct RateLimitPolicy {
    config: RateLimitConfig,
    counters: Arc<dyn CounterStore>,
    retry: RetryPolicy,
}

impl RateLimitPolicy {
    pub fn from_config(
        configuration: &Value,
        counters: Arc<dyn CounterStore>,
        store_attempts: u32,
    ) -> Result<Self, PolicyError> {
        let config: RateLimitConfig = parse_config(POLICY_ID, configuration)?;
        Ok(Self {
            config,
            counters,
            retry: RetryPolicy::new(store_attempts, 10, 100),
        })
    }

    fn counter_key(&self, ctx: &ExecutionContext) -> String {
        let api = ctx.attribute_str(attributes::API).unwrap_or("-");
        let plan = ctx.plan_id().unwrap_or("-");
        let caller = ctx
            .attribute_str(attributes::SUBSCRIPTION)
            .map(str::to_string)
            .or_else(|| ctx.request().remote_addr.map(|a| a.ip().to_string()))
            .unwrap_or_else(|| "-".to_string());
        match &self.config.key {
            Some(extra) if !extra.is_empty() => format!("rl:{api}:{plan}:{caller}:{extra}"),
            _ => format!("rl:{api}:{plan}:{caller}"),
        }
    }

    async fn increment(&self, key: &str, idempotency_key: &str) -> Result<CounterDecision, CounterError> {
        let window = self.config.window();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .counters
                .increment_and_check(key, self.config.limit, window, idempotency_key)
                .await
            {
                Ok(decision) => return Ok(decision),
                Err(error) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        tracing::warn!(attempt, error = %error, "Counter store call failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }
}

fn rate_limit_headers(decision: &CounterDecision) -> HeaderMap {
    let reset_at = SystemTime::now()
        .checked_add(decision.reset_after)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(value) = HeaderValue::from_str(&reset_at.to_string()) {
        headers.insert(HEADER_RESET, value);
    }
    headers
}

#[async_trait]
impl Policy for RateLimitPolicy {
    fn id(&self) -> &str {
        POLICY_ID
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        let key = self.counter_key(ctx);
        let idempotency_key = format!("{}:{}", ctx.request().id, key);

        let decision = match self.increment(&key, &idempotency_key).await {
            Ok(decision) => decision,
            Err(error) => {
                return match self.config.error_strategy {
                    ErrorStrategy::FallbackPassThrough => {
                        tracing::warn!(
                            request_id = %ctx.request().id,
                            error = %error,
                            "Counter store unavailable, letting request through"
                        );
                        StepOutcome::Continue
                    }
                    ErrorStrategy::BlockOnInternalError => StepOutcome::Fail(error.into()),
                };
            }
        };

        let headers = if self.config.add_headers {
            rate_limit_headers(&decision)
        } else {
            HeaderMap::new()
        };

        if decision.allowed {
            ctx.response_mut().headers.extend(headers);
            return StepOutcome::Continue;
        }

        let mut interruption = Interruption::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_TOO_MANY_REQUESTS",
            format!(
                "Rate limit exceeded! You reached the limit of {} requests per {} ms",
                decision.limit,
                self.config.window().as_millis()
            ),
        );
        interruption.headers = headers;
        StepOutcome::Interrupt(interruption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::GatewayRequest;
    use crate::security::InMemoryCounterStore;
    use axum::http::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Unavailable {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CounterStore for Unavailable {
        async fn increment_and_check(
            &self,
            _key: &str,
            _limit: u64,
            _window: Duration,
            _idempotency_key: &str,
        ) -> Result<CounterDecision, CounterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CounterError::Unavailable("down".into()))
        }
    }

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(GatewayRequest::new(Method::GET, "/"));
        ctx.set_attribute(attributes::API, "api");
        ctx
    }

    #[tokio::test]
    async fn test_limit_exceeded_is_429_with_headers() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let policy = RateLimitPolicy::from_config(&json!({ "limit": 1, "periodTime": 60 }), store, 1).unwrap();

        let mut first = ctx();
        assert!(matches!(policy.on_request(&mut first).await, StepOutcome::Continue));
        assert_eq!(first.response().header(HEADER_REMAINING), Some("0"));

        let mut second = ctx();
        match policy.on_request(&mut second).await {
            StepOutcome::Interrupt(interruption) => {
                assert_eq!(interruption.status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(interruption.key, "RATE_LIMIT_TOO_MANY_REQUESTS");
                assert!(interruption.headers.contains_key(HEADER_LIMIT));
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_failure_strategies() {
        let store = Arc::new(Unavailable { calls: AtomicU32::new(0) });

        let pass = RateLimitPolicy::from_config(&json!({}), store.clone(), 2).unwrap();
        assert!(matches!(pass.on_request(&mut ctx()).await, StepOutcome::Continue));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);

        let block = RateLimitPolicy::from_config(
            &json!({ "errorStrategy": "BLOCK_ON_INTERNAL_ERROR" }),
            store.clone(),
            1,
        )
        .unwrap();
        assert!(matches!(
            block.on_request(&mut ctx()).await,
            StepOutcome::Fail(PolicyError::Counter(_))
        ));
    }

    #[test]
    fn test_window_units() {
        let config: RateLimitConfig =
            serde_json::from_value(json!({ "periodTime": 2, "periodTimeUnit": "MINUTES" })).unwrap();
        assert_eq!(config.window(), Duration::from_secs(120));
        assert_eq!(config.limit, 100);
    }
}
