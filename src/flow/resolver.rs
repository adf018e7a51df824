//! Flow resolution per stage.
//!
//! Each stage contributes a [`FlowProvider`] that knows where its raw flows
//! live. A single generic [`FlowResolver`] composes a provider with the
//! shared [`filter_flows`] function, so every stage filters and orders the
//! same way.

use std::sync::Arc;

use crate::definition::{Flow, FlowMode, Phase, Stage};
use crate::execution::ExecutionContext;
use crate::flow::condition::{flow_matches, match_path, ConditionEvaluator, PathSpecificity};
use crate::policy::chain::shared_policy_group_id;
use crate::registry::Registries;

/// Source of unfiltered flows for one stage.
pub trait FlowProvider: Send + Sync {
    fn stage(&self) -> Stage;

    /// Flows in declaration order, before any condition is checked.
    fn fetch_raw(&self, ctx: &ExecutionContext) -> Vec<Arc<Flow>>;

    fn mode(&self, _ctx: &ExecutionContext) -> FlowMode {
        FlowMode::Default
    }
}

pub struct FlowResolver<P> {
    provider: P,
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl<P: FlowProvider> FlowResolver<P> {
    pub fn new(provider: P, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        Self { provider, evaluator }
    }

    pub fn stage(&self) -> Stage {
        self.provider.stage()
    }

    pub fn resolve(&self, ctx: &ExecutionContext) -> Vec<Arc<Flow>> {
        let raw = self.provider.fetch_raw(ctx);
        filter_flows(raw, ctx, self.evaluator.as_ref(), self.provider.mode(ctx))
    }
}

/// Drop disabled and non-matching flows, preserving declared order. In
/// best-match mode only the most specific matching flow is kept.
pub fn filter_flows(
    flows: Vec<Arc<Flow>>,
    ctx: &ExecutionContext,
    evaluator: &dyn ConditionEvaluator,
    mode: FlowMode,
) -> Vec<Arc<Flow>> {
    let matching = flows
        .into_iter()
        .filter(|flow| flow_matches(evaluator, ctx, flow));

    match mode {
        FlowMode::Default => matching.collect(),
        FlowMode::BestMatch => {
            let mut best: Option<(PathSpecificity, Arc<Flow>)> = None;
            for flow in matching {
                let specificity = specificity(&flow, ctx);
                if best.as_ref().map_or(true, |(current, _)| specificity > *current) {
                    best = Some((specificity, flow));
                }
            }
            best.map(|(_, flow)| vec![flow]).unwrap_or_default()
        }
    }
}

fn specificity(flow: &Flow, ctx: &ExecutionContext) -> PathSpecificity {
    flow.condition
        .as_ref()
        .and_then(|c| c.path.as_deref().map(|p| (p, c.operator)))
        .and_then(|(pattern, operator)| match_path(pattern, operator, ctx.path_info()))
        .unwrap_or_default()
}

/// Platform flows of the matched API's organization.
pub struct PlatformFlows {
    registries: Arc<Registries>,
}

impl FlowProvider for PlatformFlows {
    fn stage(&self) -> Stage {
        Stage::Platform
    }

    fn fetch_raw(&self, ctx: &ExecutionContext) -> Vec<Arc<Flow>> {
        ctx.api()
            .and_then(|api| api.organization_id.as_deref())
            .and_then(|org| self.registries.organizations.get(org))
            .map(|org| org.flows.clone())
            .unwrap_or_default()
    }
}

/// Flows declared on the API itself.
pub struct ApiFlows;

impl FlowProvider for ApiFlows {
    fn stage(&self) -> Stage {
        Stage::Api
    }

    fn fetch_raw(&self, ctx: &ExecutionContext) -> Vec<Arc<Flow>> {
        ctx.api().map(|api| api.flows.clone()).unwrap_or_default()
    }

    fn mode(&self, ctx: &ExecutionContext) -> FlowMode {
        ctx.api().map(|api| api.flow_mode).unwrap_or_default()
    }
}

/// Flows of the plan selected for the request.
pub struct PlanFlows;

impl FlowProvider for PlanFlows {
    fn stage(&self) -> Stage {
        Stage::Plan
    }

    fn fetch_raw(&self, ctx: &ExecutionContext) -> Vec<Arc<Flow>> {
        match (ctx.api(), ctx.plan_id()) {
            (Some(api), Some(plan_id)) => api
                .plan(plan_id)
                .map(|plan| plan.flows.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn mode(&self, ctx: &ExecutionContext) -> FlowMode {
        ctx.api().map(|api| api.flow_mode).unwrap_or_default()
    }
}

/// The single flow synthesised from one shared policy group.
pub struct SharedPolicyGroupFlows {
    registries: Arc<Registries>,
    group_id: String,
}

impl SharedPolicyGroupFlows {
    pub fn new(registries: Arc<Registries>, group_id: impl Into<String>) -> Self {
        Self {
            registries,
            group_id: group_id.into(),
        }
    }
}

impl FlowProvider for SharedPolicyGroupFlows {
    fn stage(&self) -> Stage {
        Stage::SharedPolicyGroup
    }

    fn fetch_raw(&self, _ctx: &ExecutionContext) -> Vec<Arc<Flow>> {
        self.registries
            .shared_policy_groups
            .get(&self.group_id)
            .map(|group| vec![Arc::new(group.to_flow())])
            .unwrap_or_default()
    }
}

/// Resolvers for every stage, sharing one evaluator.
pub struct FlowResolvers {
    registries: Arc<Registries>,
    evaluator: Arc<dyn ConditionEvaluator>,
    platform: FlowResolver<PlatformFlows>,
    api: FlowResolver<ApiFlows>,
    plan: FlowResolver<PlanFlows>,
}

impl FlowResolvers {
    pub fn new(registries: Arc<Registries>, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        Self {
            platform: FlowResolver::new(
                PlatformFlows {
                    registries: Arc::clone(&registries),
                },
                Arc::clone(&evaluator),
            ),
            api: FlowResolver::new(ApiFlows, Arc::clone(&evaluator)),
            plan: FlowResolver::new(PlanFlows, Arc::clone(&evaluator)),
            registries,
            evaluator,
        }
    }

    /// Applicable flows for a stage.
    ///
    /// For [`Stage::SharedPolicyGroup`] these are the flows of every group
    /// referenced by an enabled step of the applicable API and plan flows, in
    /// first-reference order. Groups that are not deployed are skipped.
    pub fn resolve(&self, ctx: &ExecutionContext, stage: Stage) -> Vec<Arc<Flow>> {
        match stage {
            Stage::Platform => self.platform.resolve(ctx),
            Stage::Api => self.api.resolve(ctx),
            Stage::Plan => self.plan.resolve(ctx),
            Stage::SharedPolicyGroup => {
                let mut referencing = self.api.resolve(ctx);
                referencing.extend(self.plan.resolve(ctx));
                referenced_groups(&referencing)
                    .iter()
                    .filter_map(|group_id| self.resolve_shared_group(ctx, group_id))
                    .flatten()
                    .collect()
            }
        }
    }

    /// Flows of a shared policy group, or `None` when the group is not deployed.
    pub fn resolve_shared_group(&self, ctx: &ExecutionContext, group_id: &str) -> Option<Vec<Arc<Flow>>> {
        if !self.registries.shared_policy_groups.contains(group_id) {
            return None;
        }
        let resolver = FlowResolver::new(
            SharedPolicyGroupFlows::new(Arc::clone(&self.registries), group_id),
            Arc::clone(&self.evaluator),
        );
        Some(resolver.resolve(ctx))
    }

    pub fn evaluator(&self) -> &Arc<dyn ConditionEvaluator> {
        &self.evaluator
    }
}

/// Group ids referenced by enabled steps of `flows`, deduplicated in order.
fn referenced_groups(flows: &[Arc<Flow>]) -> Vec<String> {
    let mut ids = Vec::new();
    for flow in flows {
        for phase in Phase::ALL {
            for step in flow.steps(phase).iter().filter(|step| step.enabled) {
                if let Some(id) = shared_policy_group_id(step) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
    }
    ids
}
