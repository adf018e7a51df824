//! Flow condition evaluation.
//!
//! Evaluators are pure predicates over (context, condition). The standard
//! composite runs method → path → expression and stops at the first negative.

use std::sync::Arc;

use crate::definition::{Condition, Flow, PathOperator};
use crate::execution::{attributes, ExecutionContext};
use crate::flow::expression::ExpressionEngine;
use crate::observability::metrics;

pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, ctx: &ExecutionContext, condition: &Condition) -> bool;
}

/// Empty method set allows every method.
pub struct MethodEvaluator;

impl ConditionEvaluator for MethodEvaluator {
    fn evaluate(&self, ctx: &ExecutionContext, condition: &Condition) -> bool {
        condition.methods.is_empty()
            || condition
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ctx.request().method.as_str()))
    }
}

/// Matches the path pattern against the path relative to the API base path.
pub struct PathEvaluator;

impl ConditionEvaluator for PathEvaluator {
    fn evaluate(&self, ctx: &ExecutionContext, condition: &Condition) -> bool {
        match &condition.path {
            None => true,
            Some(pattern) => match_path(pattern, condition.operator, ctx.path_info()).is_some(),
        }
    }
}

/// Evaluates the boolean expression. Errors count as non-matching.
pub struct ExpressionEvaluator {
    engine: Arc<dyn ExpressionEngine>,
}

impl ExpressionEvaluator {
    pub fn new(engine: Arc<dyn ExpressionEngine>) -> Self {
        Self { engine }
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(&self, ctx: &ExecutionContext, condition: &Condition) -> bool {
        match condition.expression.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(expression) => evaluate_expression(self.engine.as_ref(), expression, ctx),
        }
    }
}

/// Runs an expression, logging and counting failures as `false`.
pub fn evaluate_expression(engine: &dyn ExpressionEngine, expression: &str, ctx: &ExecutionContext) -> bool {
    match engine.eval_condition(expression, ctx) {
        Ok(result) => result,
        Err(error) => {
            tracing::warn!(
                request_id = ctx.attribute_str(attributes::REQUEST_ID).unwrap_or_default(),
                api_id = ctx.attribute_str(attributes::API).unwrap_or_default(),
                error = %error,
                "Condition evaluation failed, treating as false"
            );
            metrics::record_condition_error();
            false
        }
    }
}

/// Evaluators applied in order, short-circuiting on the first negative.
pub struct CompositeEvaluator {
    evaluators: Vec<Box<dyn ConditionEvaluator>>,
}

impl CompositeEvaluator {
    pub fn new(evaluators: Vec<Box<dyn ConditionEvaluator>>) -> Self {
        Self { evaluators }
    }

    /// Method, path, then expression.
    pub fn standard(engine: Arc<dyn ExpressionEngine>) -> Self {
        Self::new(vec![
            Box::new(MethodEvaluator),
            Box::new(PathEvaluator),
            Box::new(ExpressionEvaluator::new(engine)),
        ])
    }
}

impl ConditionEvaluator for CompositeEvaluator {
    fn evaluate(&self, ctx: &ExecutionContext, condition: &Condition) -> bool {
        self.evaluators.iter().all(|e| e.evaluate(ctx, condition))
    }
}

/// Enabled and (no condition or condition true).
pub fn flow_matches(evaluator: &dyn ConditionEvaluator, ctx: &ExecutionContext, flow: &Flow) -> bool {
    flow.enabled
        && flow
            .condition
            .as_ref()
            .map_or(true, |condition| evaluator.evaluate(ctx, condition))
}

/// How specific a path match was. Compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PathSpecificity {
    pub literal_segments: usize,
    pub segments: usize,
}

/// Segment-wise match. `:name` and `*` match exactly one segment. Trailing
/// slashes are ignored.
pub fn match_path(pattern: &str, operator: PathOperator, path: &str) -> Option<PathSpecificity> {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let length_ok = match operator {
        PathOperator::StartsWith => pattern.len() <= path.len(),
        PathOperator::Equals => pattern.len() == path.len(),
    };
    if !length_ok {
        return None;
    }

    let mut literal_segments = 0;
    for (expected, actual) in pattern.iter().zip(path.iter()) {
        if expected.starts_with(':') || *expected == "*" {
            continue;
        }
        if expected != actual {
            return None;
        }
        literal_segments += 1;
    }

    Some(PathSpecificity {
        literal_segments,
        segments: pattern.len(),
    })
}
