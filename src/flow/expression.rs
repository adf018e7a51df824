//! Boolean expression evaluation over the execution context.
//!
//! Expressions are [rhai](https://rhai.rs) expressions evaluated against a
//! read-only scope:
//!
//! ```text
//! request.method / request.path / request.path_info / request.host
//! request.headers["x-api-version"]     first value, lower-case names
//! request.params["page"]               query parameters
//! response.status / response.headers[...]
//! attributes["plan"]                   JSON attribute bag
//! dictionaries["env"]["region"]        synchronized dictionaries
//! ```
//!
//! A `{# ... }` wrapper around the expression is accepted and stripped.
//! Compiled ASTs are cached per expression text.

use std::sync::Arc;

use dashmap::DashMap;
use rhai::{Dynamic, Engine, Map, Scope, AST};
use thiserror::Error;

use crate::execution::ExecutionContext;
use crate::registry::Registries;

const MAX_CACHED_EXPRESSIONS: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("cannot compile expression {expression:?}: {message}")]
    Compile { expression: String, message: String },

    #[error("cannot evaluate expression {expression:?}: {message}")]
    Evaluation { expression: String, message: String },
}

/// Evaluates condition expressions. Implementations must be side-effect free.
pub trait ExpressionEngine: Send + Sync {
    fn eval_condition(&self, expression: &str, ctx: &ExecutionContext) -> Result<bool, ExpressionError>;
}

pub struct RhaiExpressionEngine {
    engine: Engine,
    cache: DashMap<String, Arc<AST>>,
    registries: Option<Arc<Registries>>,
}

impl RhaiExpressionEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(50_000);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(64 * 1024);
        Self {
            engine,
            cache: DashMap::new(),
            registries: None,
        }
    }

    /// Expose the deployed dictionaries under `dictionaries`.
    pub fn with_dictionaries(mut self, registries: Arc<Registries>) -> Self {
        self.registries = Some(registries);
        self
    }

    fn compile(&self, expression: &str) -> Result<Arc<AST>, ExpressionError> {
        if let Some(ast) = self.cache.get(expression) {
            return Ok(Arc::clone(ast.value()));
        }

        let ast = self
            .engine
            .compile_expression(expression)
            .map_err(|e| ExpressionError::Compile {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        let ast = Arc::new(ast);

        if self.cache.len() >= MAX_CACHED_EXPRESSIONS {
            self.cache.clear();
        }
        self.cache.insert(expression.to_string(), Arc::clone(&ast));
        Ok(ast)
    }

    fn scope(&self, ctx: &ExecutionContext, expression: &str) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push_constant("request", request_map(ctx));
        scope.push_constant("response", response_map(ctx));
        scope.push_constant("attributes", attributes_map(ctx));
        if expression.contains("dictionaries") {
            scope.push_constant("dictionaries", self.dictionaries_map());
        }
        scope
    }

    fn dictionaries_map(&self) -> Map {
        let mut map = Map::new();
        if let Some(registries) = &self.registries {
            for dictionary in registries.dictionaries.snapshot() {
                let properties: Map = dictionary
                    .properties
                    .iter()
                    .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
                    .collect();
                map.insert(dictionary.id.as_str().into(), Dynamic::from_map(properties));
            }
        }
        map
    }
}

impl Default for RhaiExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine for RhaiExpressionEngine {
    fn eval_condition(&self, expression: &str, ctx: &ExecutionContext) -> Result<bool, ExpressionError> {
        let expression = strip_wrapper(expression);
        let ast = self.compile(expression)?;
        let mut scope = self.scope(ctx, expression);
        self.engine
            .eval_ast_with_scope::<bool>(&mut scope, &ast)
            .map_err(|e| ExpressionError::Evaluation {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }
}

/// Accept `{#expr}` as well as a bare expression.
fn strip_wrapper(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("{#")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn headers_map(headers: &axum::http::HeaderMap) -> Map {
    let mut map = Map::new();
    for name in headers.keys() {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            map.insert(name.as_str().into(), Dynamic::from(value.to_string()));
        }
    }
    map
}

fn request_map(ctx: &ExecutionContext) -> Map {
    let request = ctx.request();
    let mut map = Map::new();
    map.insert("id".into(), Dynamic::from(request.id.clone()));
    map.insert("method".into(), Dynamic::from(request.method.as_str().to_string()));
    map.insert("path".into(), Dynamic::from(request.path.clone()));
    map.insert("path_info".into(), Dynamic::from(ctx.path_info().to_string()));
    map.insert("context_path".into(), Dynamic::from(ctx.context_path().to_string()));
    map.insert(
        "host".into(),
        request.host.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "remote_address".into(),
        request
            .remote_addr
            .map(|a| Dynamic::from(a.ip().to_string()))
            .unwrap_or(Dynamic::UNIT),
    );
    map.insert("headers".into(), Dynamic::from_map(headers_map(&request.headers)));

    let params: Map = request
        .query
        .as_deref()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k.into(), Dynamic::from(v.to_string()))
        })
        .collect();
    map.insert("params".into(), Dynamic::from_map(params));
    map
}

fn response_map(ctx: &ExecutionContext) -> Map {
    let response = ctx.response();
    let mut map = Map::new();
    map.insert("status".into(), Dynamic::from(response.status.as_u16() as i64));
    map.insert("headers".into(), Dynamic::from_map(headers_map(&response.headers)));
    map
}

fn attributes_map(ctx: &ExecutionContext) -> Map {
    ctx.attributes()
        .iter()
        .map(|(k, v)| {
            let value = rhai::serde::to_dynamic(v).unwrap_or(Dynamic::UNIT);
            (k.as_str().into(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::GatewayRequest;
    use axum::http::Method;
    use std::collections::BTreeMap;

    fn ctx() -> ExecutionContext {
        let mut request = GatewayRequest::new(Method::POST, "/orders")
            .with_header("x-tenant", "acme");
        request.query = Some("page=2".into());
        let mut ctx = ExecutionContext::new(request);
        ctx.set_attribute("plan", "gold");
        ctx
    }

    #[test]
    fn test_request_fields() {
        let engine = RhaiExpressionEngine::new();
        let ctx = ctx();
        assert!(engine.eval_condition(r#"request.method == "POST""#, &ctx).unwrap());
        assert!(engine.eval_condition(r#"request.headers["x-tenant"] == "acme""#, &ctx).unwrap());
        assert!(engine.eval_condition(r#"request.params["page"] == "2""#, &ctx).unwrap());
        assert!(!engine.eval_condition(r#"request.headers["x-missing"] == "acme""#, &ctx).unwrap());
    }

    #[test]
    fn test_attributes_and_wrapper() {
        let engine = RhaiExpressionEngine::new();
        assert!(engine.eval_condition(r#"{#attributes["plan"] == "gold"}"#, &ctx()).unwrap());
    }

    #[test]
    fn test_dictionaries() {
        let registries = Arc::new(Registries::new());
        let mut properties = BTreeMap::new();
        properties.insert("region".to_string(), "eu".to_string());
        registries.dictionaries.register(crate::definition::Dictionary {
            id: "env".into(),
            environment_id: None,
            properties,
            deployed_at: 1,
        });
        let engine = RhaiExpressionEngine::new().with_dictionaries(registries);
        assert!(engine.eval_condition(r#"dictionaries["env"]["region"] == "eu""#, &ctx()).unwrap());
    }

    #[test]
    fn test_malformed_expression_is_an_error() {
        let engine = RhaiExpressionEngine::new();
        let err = engine.eval_condition("request.method ==", &ctx()).unwrap_err();
        assert!(matches!(err, ExpressionError::Compile { .. }));
    }

    #[test]
    fn test_non_boolean_result_is_an_error() {
        let engine = RhaiExpressionEngine::new();
        let err = engine.eval_condition("request.method", &ctx()).unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluation { .. }));
    }

    #[test]
    fn test_ast_is_cached() {
        let engine = RhaiExpressionEngine::new();
        engine.eval_condition("true", &ctx()).unwrap();
        engine.eval_condition("true", &ctx()).unwrap();
        assert_eq!(engine.cache.len(), 1);
    }
}
