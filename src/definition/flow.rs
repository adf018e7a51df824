//! Flows, steps and their activation conditions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Where a flow comes from. Determines its position in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Platform,
    SharedPolicyGroup,
    #[default]
    Api,
    Plan,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Platform => "PLATFORM",
            Stage::SharedPolicyGroup => "SHARED_POLICY_GROUP",
            Stage::Api => "API",
            Stage::Plan => "PLAN",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase a step list is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Request,
    Response,
    MessageRequest,
    MessageResponse,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Request,
        Phase::Response,
        Phase::MessageRequest,
        Phase::MessageResponse,
    ];

    /// Request-side phases stop at the first interruption.
    pub fn is_request_side(&self) -> bool {
        matches!(self, Phase::Request | Phase::MessageRequest)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "REQUEST",
            Phase::Response => "RESPONSE",
            Phase::MessageRequest => "MESSAGE_REQUEST",
            Phase::MessageResponse => "MESSAGE_RESPONSE",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single policy invocation inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMetadata {
    /// Policy id looked up in the policy registry.
    pub policy: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Opaque policy configuration.
    #[serde(default)]
    pub configuration: serde_json::Value,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Step-level condition expression. The step is skipped when it is false.
    #[serde(default)]
    pub condition: Option<String>,
}

impl PolicyMetadata {
    pub fn new(policy: impl Into<String>, configuration: serde_json::Value) -> Self {
        Self {
            policy: policy.into(),
            name: None,
            description: None,
            configuration,
            enabled: true,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// How a flow path pattern is compared with the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathOperator {
    #[default]
    StartsWith,
    Equals,
}

/// Activation condition of a flow. Every populated part must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Allowed methods, upper case. Empty allows every method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Path pattern relative to the API base path. `:name` matches one segment.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub operator: PathOperator,

    /// Boolean expression evaluated against the execution context.
    #[serde(default)]
    pub expression: Option<String>,
}

impl Condition {
    pub fn path(path: impl Into<String>, operator: PathOperator) -> Self {
        Self {
            path: Some(path.into()),
            operator,
            ..Self::default()
        }
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.into().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

/// An ordered, conditional group of steps per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub condition: Option<Condition>,

    #[serde(default)]
    pub request: Vec<PolicyMetadata>,

    #[serde(default)]
    pub response: Vec<PolicyMetadata>,

    #[serde(default)]
    pub message_request: Vec<PolicyMetadata>,

    #[serde(default)]
    pub message_response: Vec<PolicyMetadata>,

    #[serde(default)]
    pub stage: Stage,
}

impl Flow {
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            condition: None,
            request: Vec::new(),
            response: Vec::new(),
            message_request: Vec::new(),
            message_response: Vec::new(),
            stage,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_step(mut self, phase: Phase, step: PolicyMetadata) -> Self {
        self.steps_mut(phase).push(step);
        self
    }

    /// Steps declared for a phase, in order.
    pub fn steps(&self, phase: Phase) -> &[PolicyMetadata] {
        match phase {
            Phase::Request => &self.request,
            Phase::Response => &self.response,
            Phase::MessageRequest => &self.message_request,
            Phase::MessageResponse => &self.message_response,
        }
    }

    pub fn steps_mut(&mut self, phase: Phase) -> &mut Vec<PolicyMetadata> {
        match phase {
            Phase::Request => &mut self.request,
            Phase::Response => &mut self.response,
            Phase::MessageRequest => &mut self.message_request,
            Phase::MessageResponse => &mut self.message_response,
        }
    }
}

/// Force every flow in a list onto a stage.
pub(crate) fn assign_stage(flows: &mut [Arc<Flow>], stage: Stage) {
    for flow in flows.iter_mut() {
        if flow.stage != stage {
            Arc::make_mut(flow).stage = stage;
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}
