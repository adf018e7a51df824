//! `mock` policy: answers the request with a configured response and skips
//! the backend.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::execution::{ExecutionContext, Interruption};
use crate::policy::builtin::parse_config;
use crate::policy::builtin::transform_headers::HeaderEntry;
use crate::policy::{Policy, PolicyError, StepOutcome};

pub const POLICY_ID: &str = "mock";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MockConfig {
    pub status: u16,
    pub headers: Vec<HeaderEntry>,
    pub content: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content: String::new(),
        }
    }
}

pub struct MockPolicy {
    interruption: Interruption,
}

impl MockPolicy {
    pub fn from_config(configuration: &Value) -> Result<Self, PolicyError> {
        let config: MockConfig = parse_config(POLICY_ID, configuration)?;
        let status = StatusCode::from_u16(config.status).map_err(|e| PolicyError::invalid(POLICY_ID, e))?;

        let mut interruption = Interruption::new(status, "MOCK", "").with_body(config.content);
        for entry in &config.headers {
            let name = HeaderName::from_bytes(entry.name.as_bytes()).map_err(|e| PolicyError::invalid(POLICY_ID, e))?;
            let value = HeaderValue::from_str(&entry.value).map_err(|e| PolicyError::invalid(POLICY_ID, e))?;
            interruption.headers.insert(name, value);
        }
        Ok(Self { interruption })
    }
}

#[async_trait]
impl Policy for MockPolicy {
    fn id(&self) -> &str {
        POLICY_ID
    }

    async fn on_request(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        StepOutcome::Interrupt(self.interruption.clone())
    }
}
