//! `transform-headers` policy.
//!
//! Removes, whitelists and adds headers on the request when placed in a
//! request phase and on the response when placed in a response phase.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::execution::ExecutionContext;
use crate::policy::builtin::parse_config;
use crate::policy::{Policy, PolicyError, StepOutcome};

pub const POLICY_ID: &str = "transform-headers";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Request,
    Response,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformHeadersConfig {
    /// Restrict the policy to one side. Unset acts wherever it is placed.
    pub scope: Option<Scope>,
    pub add_headers: Vec<HeaderEntry>,
    pub remove_headers: Vec<String>,
    /// When non-empty, every other header is dropped.
    pub whitelist_headers: Vec<String>,
}

struct HeaderOp {
    name: HeaderName,
    value: HeaderValue,
}

pub struct TransformHeadersPolicy {
    scope: Option<Scope>,
    add: Vec<HeaderOp>,
    remove: Vec<HeaderName>,
    whitelist: Vec<HeaderName>,
}

impl TransformHeadersPolicy {
    pub fn from_config(configuration: &Value) -> Result<Self, PolicyError> {
        let config: TransformHeadersConfig = parse_config(POLICY_ID, configuration)?;
        let name = |raw: &str| {
            HeaderName::from_bytes(raw.trim().as_bytes()).map_err(|e| PolicyError::invalid(POLICY_ID, e))
        };

        let add = config
            .add_headers
            .iter()
            .map(|entry| {
                Ok(HeaderOp {
                    name: name(&entry.name)?,
                    value: HeaderValue::from_str(&entry.value).map_err(|e| PolicyError::invalid(POLICY_ID, e))?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        let remove = config
            .remove_headers
            .iter()
            .map(|raw| name(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let whitelist = config
            .whitelist_headers
            .iter()
            .map(|raw| name(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scope: config.scope,
            add,
            remove,
            whitelist,
        })
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        if !self.whitelist.is_empty() {
            let dropped: Vec<HeaderName> = headers
                .keys()
                .filter(|name| !self.whitelist.contains(name))
                .cloned()
                .collect();
            for name in dropped {
                headers.remove(&name);
            }
        }
        for op in &self.add {
            headers.insert(op.name.clone(), op.value.clone());
        }
    }

    fn acts_on(&self, scope: Scope) -> bool {
        self.scope.map_or(true, |configured| configured == scope)
    }
}

#[async_trait]
impl Policy for TransformHeadersPolicy {
    fn id(&self) -> &str {
        POLICY_ID
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        if self.acts_on(Scope::Request) {
            self.apply(&mut ctx.request_mut().headers);
        }
        StepOutcome::Continue
    }

    async fn on_response(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        if self.acts_on(Scope::Response) {
            self.apply(&mut ctx.response_mut().headers);
        }
        StepOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::GatewayRequest;
    use axum::http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn test_adds_and_removes_request_headers() {
        let policy = TransformHeadersPolicy::from_config(&json!({
            "addHeaders": [{ "name": "X-Gateway", "value": "on" }],
            "removeHeaders": ["x-secret"]
        }))
        .unwrap();

        let request = GatewayRequest::new(Method::GET, "/").with_header("x-secret", "s");
        let mut ctx = ExecutionContext::new(request);
        policy.on_request(&mut ctx).await;

        assert_eq!(ctx.request().header("x-gateway"), Some("on"));
        assert_eq!(ctx.request().header("x-secret"), None);
    }

    #[tokio::test]
    async fn test_scope_limits_side() {
        let policy = TransformHeadersPolicy::from_config(&json!({
            "scope": "RESPONSE",
            "addHeaders": [{ "name": "x-served-by", "value": "gw" }]
        }))
        .unwrap();

        let mut ctx = ExecutionContext::new(GatewayRequest::new(Method::GET, "/"));
        policy.on_request(&mut ctx).await;
        assert_eq!(ctx.request().header("x-served-by"), None);

        policy.on_response(&mut ctx).await;
        assert_eq!(ctx.response().header("x-served-by"), Some("gw"));
    }

    #[tokio::test]
    async fn test_whitelist_drops_everything_else() {
        let policy = TransformHeadersPolicy::from_config(&json!({ "whitelistHeaders": ["accept"] })).unwrap();
        let request = GatewayRequest::new(Method::GET, "/")
            .with_header("accept", "*/*")
            .with_header("cookie", "a=b");
        let mut ctx = ExecutionContext::new(request);
        policy.on_request(&mut ctx).await;
        assert_eq!(ctx.request().headers.len(), 1);
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let result = TransformHeadersPolicy::from_config(&json!({ "removeHeaders": ["bad header"] }));
        assert!(matches!(result, Err(PolicyError::InvalidConfiguration { .. })));
    }
}
