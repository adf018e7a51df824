//! Policy chain construction and execution.
//!
//! A chain is the flattened, ordered list of steps of one phase for one
//! stage. Execution is a small state machine:
//!
//! ```text
//! READY ──► RUNNING(0) ──► RUNNING(1) ──► ... ──► COMPLETED
//!               │              │
//!               └──────────────┴──► INTERRUPTED (policy response or failure)
//! ```
//!
//! The only loop state is the context and the step index.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

use crate::definition::{Flow, Phase, PolicyMetadata, Stage};
use crate::execution::{attributes, ExecutionContext, Interruption, PhaseRecord};
use crate::flow::condition::evaluate_expression;
use crate::flow::ExpressionEngine;
use crate::observability::metrics;
use crate::policy::{PolicyError, PolicyFactory, StepOutcome};

/// Policy id of the step that stands in for a shared policy group.
pub const SHARED_POLICY_GROUP_POLICY: &str = "shared-policy-group-policy";

/// Group id referenced by a shared-policy-group step, if `step` is one.
pub fn shared_policy_group_id(step: &PolicyMetadata) -> Option<String> {
    if step.policy != SHARED_POLICY_GROUP_POLICY {
        return None;
    }
    step.configuration
        .get("sharedPolicyGroupId")
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

/// One step of a built chain, with where it came from.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub stage: Stage,
    pub flow: String,
    pub step: PolicyMetadata,
}

#[derive(Debug, Clone)]
pub struct PolicyChain {
    phase: Phase,
    stage: Stage,
    steps: Vec<ChainStep>,
}

impl PolicyChain {
    /// Flatten the steps of `flows` for `phase`, in flow order then step order.
    ///
    /// Shared-policy-group steps are replaced in place by the steps `expand`
    /// returns for the group. A group that cannot be found keeps its marker
    /// step, which does nothing.
    pub fn build<F>(phase: Phase, stage: Stage, flows: &[Arc<Flow>], mut expand: F) -> Self
    where
        F: FnMut(&str) -> Option<Vec<Arc<Flow>>>,
    {
        let mut steps = Vec::new();
        for flow in flows {
            for step in flow.steps(phase) {
                let group = step.enabled.then(|| shared_policy_group_id(step)).flatten();
                let Some(group_id) = group else {
                    steps.push(ChainStep {
                        stage,
                        flow: flow.name.clone(),
                        step: step.clone(),
                    });
                    continue;
                };

                match expand(&group_id) {
                    Some(group_flows) => {
                        for group_flow in &group_flows {
                            steps.extend(group_flow.steps(phase).iter().map(|inner| ChainStep {
                                stage: Stage::SharedPolicyGroup,
                                flow: group_flow.name.clone(),
                                step: inner.clone(),
                            }));
                        }
                    }
                    None => {
                        tracing::warn!(
                            shared_policy_group = %group_id,
                            flow = %flow.name,
                            "Shared policy group not deployed, step ignored"
                        );
                        steps.push(ChainStep {
                            stage,
                            flow: flow.name.clone(),
                            step: step.clone(),
                        });
                    }
                }
            }
        }
        Self { phase, stage, steps }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Terminal outcome of one phase. Exactly one is produced per execution.
#[derive(Debug)]
pub enum ChainOutcome {
    Completed {
        executed: usize,
    },
    Interrupted {
        policy: Option<String>,
        key: String,
        status: StatusCode,
    },
    Failed {
        policy: String,
        error: PolicyError,
    },
}

impl ChainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOutcome::Completed { .. } => "COMPLETED",
            ChainOutcome::Interrupted { .. } => "INTERRUPTED",
            ChainOutcome::Failed { .. } => "FAILED",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed { .. })
    }
}

pub struct ChainExecutor {
    factory: Arc<dyn PolicyFactory>,
    expressions: Arc<dyn ExpressionEngine>,
}

impl ChainExecutor {
    pub fn new(factory: Arc<dyn PolicyFactory>, expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { factory, expressions }
    }

    /// Run `chain` against `ctx`. Request-side chains do nothing once the
    /// context is interrupted; response-side chains always run.
    pub async fn execute(&self, chain: &PolicyChain, ctx: &mut ExecutionContext) -> ChainOutcome {
        let started = Instant::now();
        let mut executed = 0;

        let outcome = 'run: {
            if chain.phase.is_request_side() {
                if let Some(interruption) = ctx.interruption() {
                    break 'run ChainOutcome::Interrupted {
                        policy: None,
                        key: interruption.key.clone(),
                        status: interruption.status,
                    };
                }
            }

            for chain_step in &chain.steps {
                let step = &chain_step.step;
                if !step.enabled || !self.step_condition_holds(step, ctx) {
                    continue;
                }

                let outcome = match self.factory.create(&step.policy, &step.configuration) {
                    Ok(policy) => match chain.phase {
                        Phase::Request => policy.on_request(ctx).await,
                        Phase::Response => policy.on_response(ctx).await,
                        Phase::MessageRequest => policy.on_message_request(ctx).await,
                        Phase::MessageResponse => policy.on_message_response(ctx).await,
                    },
                    Err(error) => StepOutcome::Fail(error),
                };
                executed += 1;

                match outcome {
                    StepOutcome::Continue => {}
                    StepOutcome::Interrupt(interruption) => {
                        tracing::debug!(
                            request_id = ctx.attribute_str(attributes::REQUEST_ID).unwrap_or_default(),
                            api_id = ctx.attribute_str(attributes::API).unwrap_or_default(),
                            policy = %step.policy,
                            key = %interruption.key,
                            status = interruption.status.as_u16(),
                            phase = %chain.phase,
                            "Request interrupted by policy"
                        );
                        metrics::record_policy_interruption(&interruption.key);
                        let key = interruption.key.clone();
                        let status = interruption.status;
                        ctx.interrupt(interruption);
                        break 'run ChainOutcome::Interrupted {
                            policy: Some(step.policy.clone()),
                            key,
                            status,
                        };
                    }
                    StepOutcome::Fail(error) => {
                        tracing::error!(
                            request_id = ctx.attribute_str(attributes::REQUEST_ID).unwrap_or_default(),
                            api_id = ctx.attribute_str(attributes::API).unwrap_or_default(),
                            policy = %step.policy,
                            flow = %chain_step.flow,
                            stage = %chain_step.stage,
                            phase = %chain.phase,
                            error = %error,
                            "Policy failed"
                        );
                        metrics::record_policy_failure(&step.policy);
                        ctx.metrics_mut().failed_policy = Some(step.policy.clone());
                        ctx.interrupt(Interruption::failure());
                        break 'run ChainOutcome::Failed {
                            policy: step.policy.clone(),
                            error,
                        };
                    }
                }
            }

            ChainOutcome::Completed { executed }
        };

        ctx.metrics_mut().phases.push(PhaseRecord {
            stage: chain.stage,
            phase: chain.phase,
            outcome: outcome.as_str(),
            policies: executed,
            duration_us: started.elapsed().as_micros() as u64,
        });
        outcome
    }

    fn step_condition_holds(&self, step: &PolicyMetadata, ctx: &ExecutionContext) -> bool {
        match step.condition.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(expression) => evaluate_expression(self.expressions.as_ref(), expression, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::GatewayRequest;
    use crate::flow::RhaiExpressionEngine;
    use crate::policy::{Policy, PolicyRegistry};
    use async_trait::async_trait;
    use axum::http::Method;
    use serde_json::{json, Value};

    /// Appends its name to the `trace` attribute, then acts as configured.
    struct Recording {
        name: String,
        action: String,
    }

    #[async_trait]
    impl Policy for Recording {
        fn id(&self) -> &str {
            "record"
        }

        async fn on_request(&self, ctx: &mut ExecutionContext) -> StepOutcome {
            self.act(ctx)
        }

        async fn on_response(&self, ctx: &mut ExecutionContext) -> StepOutcome {
            self.act(ctx)
        }
    }

    impl Recording {
        fn act(&self, ctx: &mut ExecutionContext) -> StepOutcome {
            let mut trace = ctx.attribute("trace").cloned().unwrap_or_else(|| json!([]));
            if let Some(items) = trace.as_array_mut() {
                items.push(Value::from(self.name.clone()));
            }
            ctx.set_attribute("trace", trace);
            match self.action.as_str() {
                "interrupt" => StepOutcome::Interrupt(Interruption::new(StatusCode::FORBIDDEN, "STOP", "stopped")),
                "fail" => StepOutcome::Fail(PolicyError::Execution("boom".into())),
                _ => StepOutcome::Continue,
            }
        }
    }

    fn executor() -> ChainExecutor {
        let mut registry = PolicyRegistry::new();
        registry.register("record", |config| {
            Ok(Arc::new(Recording {
                name: config["name"].as_str().unwrap_or_default().to_string(),
                action: config["action"].as_str().unwrap_or("continue").to_string(),
            }) as Arc<dyn Policy>)
        });
        registry.register(SHARED_POLICY_GROUP_POLICY, |_| {
            Ok(Arc::new(crate::policy::builtin::SharedPolicyGroupMarker) as Arc<dyn Policy>)
        });
        ChainExecutor::new(Arc::new(registry), Arc::new(RhaiExpressionEngine::new()))
    }

    fn step(name: &str, action: &str) -> PolicyMetadata {
        PolicyMetadata::new("record", json!({ "name": name, "action": action }))
    }

    fn flow(steps: Vec<PolicyMetadata>) -> Arc<Flow> {
        let mut flow = Flow::new("f", Stage::Api);
        flow.request = steps.clone();
        flow.response = steps;
        Arc::new(flow)
    }

    fn request_chain(flows: &[Arc<Flow>]) -> PolicyChain {
        PolicyChain::build(Phase::Request, Stage::Api, flows, |_| None)
    }

    fn trace(ctx: &ExecutionContext) -> Vec<String> {
        ctx.attribute("trace")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(GatewayRequest::new(Method::GET, "/"))
    }

    #[tokio::test]
    async fn test_runs_steps_in_flow_order() {
        let flows = [flow(vec![step("a", "continue"), step("b", "continue")]), flow(vec![step("c", "continue")])];
        let mut ctx = ctx();
        let outcome = executor().execute(&request_chain(&flows), &mut ctx).await;

        assert!(matches!(outcome, ChainOutcome::Completed { executed: 3 }));
        assert_eq!(trace(&ctx), ["a", "b", "c"]);
        assert_eq!(ctx.metrics().phases.len(), 1);
        assert_eq!(ctx.metrics().phases[0].outcome, "COMPLETED");
    }

    #[tokio::test]
    async fn test_interrupt_skips_remaining_request_steps() {
        let flows = [flow(vec![step("a", "continue"), step("b", "interrupt"), step("c", "continue")])];
        let mut ctx = ctx();
        let outcome = executor().execute(&request_chain(&flows), &mut ctx).await;

        assert!(matches!(outcome, ChainOutcome::Interrupted { ref key, .. } if key == "STOP"));
        assert_eq!(trace(&ctx), ["a", "b"]);
        assert!(ctx.is_interrupted());
        assert_eq!(ctx.response().status, StatusCode::FORBIDDEN);

        // A later request-side chain does nothing.
        let later = executor().execute(&request_chain(&flows), &mut ctx).await;
        assert!(matches!(later, ChainOutcome::Interrupted { policy: None, .. }));
        assert_eq!(trace(&ctx), ["a", "b"]);

        // The response side still runs over the interruption response.
        let response = PolicyChain::build(Phase::Response, Stage::Api, &[flow(vec![step("r", "continue")])], |_| None);
        assert!(executor().execute(&response, &mut ctx).await.is_completed());
        assert_eq!(trace(&ctx), ["a", "b", "r"]);
        assert_eq!(ctx.response().status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_failure_becomes_generic_500() {
        let flows = [flow(vec![step("a", "fail"), step("b", "continue")])];
        let mut ctx = ctx();
        let outcome = executor().execute(&request_chain(&flows), &mut ctx).await;

        assert!(matches!(outcome, ChainOutcome::Failed { ref policy, .. } if policy == "record"));
        assert_eq!(ctx.response().status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.metrics().failed_policy.as_deref(), Some("record"));
        assert_eq!(trace(&ctx), ["a"]);
    }

    #[tokio::test]
    async fn test_unknown_policy_fails_the_phase() {
        let flows = [flow(vec![PolicyMetadata::new("nope", json!({})), step("b", "continue")])];
        let mut ctx = ctx();
        let outcome = executor().execute(&request_chain(&flows), &mut ctx).await;

        assert!(matches!(outcome, ChainOutcome::Failed { error: PolicyError::UnknownPolicy(_), .. }));
        assert!(trace(&ctx).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_and_conditional_steps_are_skipped() {
        let flows = [flow(vec![
            step("off", "continue").disabled(),
            step("never", "continue").with_condition("{#request.method == \"POST\"}"),
            step("get-only", "continue").with_condition("request.method == \"GET\""),
        ])];
        let mut ctx = ctx();
        executor().execute(&request_chain(&flows), &mut ctx).await;
        assert_eq!(trace(&ctx), ["get-only"]);
    }

    #[tokio::test]
    async fn test_shared_policy_group_expands_in_place() {
        let mut group = Flow::new("group", Stage::SharedPolicyGroup);
        group.request = vec![step("g1", "continue"), step("g2", "continue")];
        let group = vec![Arc::new(group)];

        let marker = PolicyMetadata::new(SHARED_POLICY_GROUP_POLICY, json!({ "sharedPolicyGroupId": "spg" }));
        let missing = PolicyMetadata::new(SHARED_POLICY_GROUP_POLICY, json!({ "sharedPolicyGroupId": "gone" }));
        let flows = [flow(vec![step("a", "continue"), marker, missing, step("b", "continue")])];

        let chain = PolicyChain::build(Phase::Request, Stage::Api, &flows, |id| (id == "spg").then(|| group.clone()));
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.steps()[1].stage, Stage::SharedPolicyGroup);

        let mut ctx = ctx();
        assert!(executor().execute(&chain, &mut ctx).await.is_completed());
        assert_eq!(trace(&ctx), ["a", "g1", "g2", "b"]);
    }

    #[test]
    fn test_shared_policy_group_id() {
        let marker = PolicyMetadata::new(SHARED_POLICY_GROUP_POLICY, json!({ "sharedPolicyGroupId": "x" }));
        assert_eq!(shared_policy_group_id(&marker).as_deref(), Some("x"));
        assert_eq!(shared_policy_group_id(&step("a", "continue")), None);
    }
}
