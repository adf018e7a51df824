//! Adapter from the legacy path-rule model to flows.
//!
//! Older definitions attach rules to paths instead of declaring flows:
//!
//! ```text
//! paths:
//!   "/":        [rule(GET, rate-limit), rule(*, transform-headers)]
//!   "/admin":   [rule(*, ip-filtering)]
//! ```
//!
//! Each rule becomes one flow with a STARTS_WITH condition on its path. Path
//! keys are visited in map order, rules in declaration order. A legacy rule
//! runs its policy on both sides of the exchange, so the step lands in the
//! request and the response lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definition::flow::{default_true, Condition, Flow, PathOperator, PolicyMetadata, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRule {
    #[serde(default)]
    pub methods: Vec<String>,

    pub policy: PolicyMetadata,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub fn paths_to_flows(paths: &BTreeMap<String, Vec<LegacyRule>>) -> Vec<Flow> {
    paths
        .iter()
        .flat_map(|(path, rules)| rules.iter().map(move |rule| rule_to_flow(path, rule)))
        .collect()
}

fn rule_to_flow(path: &str, rule: &LegacyRule) -> Flow {
    let mut step = rule.policy.clone();
    if step.description.is_none() {
        step.description = rule.description.clone();
    }

    let mut flow = Flow::new(format!("{} {}", path, step.policy), Stage::Api)
        .with_condition(
            Condition::path(path, PathOperator::StartsWith).with_methods(rule.methods.iter().cloned()),
        );
    flow.enabled = rule.enabled;
    flow.response.push(step.clone());
    flow.request.push(step);
    flow
}
