//! Plans: the commercial contract a consumer calls an API under.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::flow::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanSecurity {
    #[default]
    Keyless,
    ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Staging,
    #[default]
    Published,
    Deprecated,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub security: PlanSecurity,

    #[serde(default)]
    pub status: PlanStatus,

    #[serde(default)]
    pub flows: Vec<Arc<Flow>>,
}

impl Plan {
    pub fn new(id: impl Into<String>, security: PlanSecurity) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            security,
            status: PlanStatus::Published,
            flows: Vec::new(),
        }
    }

    /// Only published and deprecated plans accept traffic.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, PlanStatus::Published | PlanStatus::Deprecated)
    }
}
