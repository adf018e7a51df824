//! Deployed API configuration.
//!
//! An `ApiConfiguration` is built once from its control plane payload by
//! [`ApiConfiguration::build`] and never mutated afterwards. Updates replace the
//! whole value in the registry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::flow::{assign_stage, default_true, Flow, Stage};
use crate::definition::legacy::{paths_to_flows, LegacyRule};
use crate::definition::plan::Plan;
use crate::definition::{DefinitionError, Deployable};

/// A (host, base path) coordinate the API listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    #[serde(default)]
    pub host: Option<String>,
    pub path: String,
}

impl VirtualHost {
    pub fn new(host: Option<&str>, path: impl Into<String>) -> Self {
        Self {
            host: host.map(str::to_string),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowMode {
    /// Every matching flow runs.
    #[default]
    Default,
    /// Only the most specific matching flow runs.
    BestMatch,
}

/// A backend target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    /// Base URL, e.g. `http://10.0.0.7:8080/api`.
    pub target: String,
}

/// A named resource (cache, auth server, ...) referenced by policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub configuration: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfiguration {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub organization_id: Option<String>,

    #[serde(default)]
    pub environment_id: Option<String>,

    pub virtual_hosts: Vec<VirtualHost>,

    #[serde(default)]
    pub flows: Vec<Arc<Flow>>,

    #[serde(default)]
    pub flow_mode: FlowMode,

    #[serde(default)]
    pub plans: Vec<Plan>,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub resources: Vec<Resource>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deployment timestamp in epoch milliseconds.
    #[serde(default)]
    pub deployed_at: i64,

    /// Deployment version assigned by the control plane.
    #[serde(default)]
    pub revision: u64,

    /// Legacy path-based rules. Converted into `flows` by `build`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, Vec<LegacyRule>>,
}

impl ApiConfiguration {
    /// Parse a control plane payload into a validated configuration.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        let raw: ApiConfiguration = serde_json::from_value(payload)?;
        raw.build()
    }

    /// Validate and normalise. Consumes the raw definition.
    pub fn build(mut self) -> Result<Self, DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::MissingField("id"));
        }
        if self.virtual_hosts.is_empty() {
            return Err(DefinitionError::Invalid {
                id: self.id,
                reason: "no virtual host declared".to_string(),
            });
        }

        for vhost in &mut self.virtual_hosts {
            if !vhost.path.starts_with('/') {
                return Err(DefinitionError::Invalid {
                    id: self.id.clone(),
                    reason: format!("virtual host path {:?} must start with '/'", vhost.path),
                });
            }
            vhost.path = normalize_base_path(&vhost.path);
            vhost.host = vhost
                .host
                .take()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty());
        }

        if !self.paths.is_empty() {
            let legacy = std::mem::take(&mut self.paths);
            self.flows.extend(paths_to_flows(&legacy).into_iter().map(Arc::new));
        }

        assign_stage(&mut self.flows, Stage::Api);
        for plan in &mut self.plans {
            assign_stage(&mut plan.flows, Stage::Plan);
        }

        Ok(self)
    }

    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Shared policy group ids referenced from any flow of the API or its plans.
    pub fn shared_policy_group_refs(&self) -> BTreeSet<String> {
        self.flows
            .iter()
            .chain(self.plans.iter().flat_map(|p| p.flows.iter()))
            .flat_map(|flow| {
                [
                    &flow.request,
                    &flow.response,
                    &flow.message_request,
                    &flow.message_response,
                ]
                .into_iter()
                .flatten()
            })
            .filter_map(crate::policy::chain::shared_policy_group_id)
            .collect()
    }
}

impl Deployable for ApiConfiguration {
    fn id(&self) -> &str {
        &self.id
    }

    fn deployed_at(&self) -> i64 {
        self.deployed_at
    }
}

/// Leading `/`, no trailing `/` except for the root path.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::flow::Phase;
    use serde_json::json;

    #[test]
    fn test_build_normalises_virtual_hosts() {
        let api = ApiConfiguration::from_payload(json!({
            "id": "api-1",
            "virtualHosts": [
                { "host": "API.Test", "path": "/v1/" },
                { "path": "/" }
            ]
        }))
        .unwrap();

        assert_eq!(api.virtual_hosts[0].host.as_deref(), Some("api.test"));
        assert_eq!(api.virtual_hosts[0].path, "/v1");
        assert_eq!(api.virtual_hosts[1].path, "/");
        assert!(api.enabled);
    }

    #[test]
    fn test_build_rejects_missing_virtual_hosts() {
        let err = ApiConfiguration::from_payload(json!({ "id": "x", "virtualHosts": [] }))
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Invalid { .. }));
    }

    #[test]
    fn test_build_rejects_relative_path() {
        let err = ApiConfiguration::from_payload(json!({
            "id": "x",
            "virtualHosts": [{ "path": "v1" }]
        }))
        .unwrap_err();
        assert!(matches!(err, DefinitionError::Invalid { .. }));
    }

    #[test]
    fn test_plan_flows_are_staged_as_plan() {
        let api = ApiConfiguration::from_payload(json!({
            "id": "api-1",
            "virtualHosts": [{ "path": "/" }],
            "flows": [{ "name": "api-flow" }],
            "plans": [{ "id": "gold", "flows": [{ "name": "plan-flow" }] }]
        }))
        .unwrap();

        assert_eq!(api.flows[0].stage, Stage::Api);
        assert_eq!(api.plan("gold").unwrap().flows[0].stage, Stage::Plan);
    }

    #[test]
    fn test_legacy_paths_become_flows() {
        let api = ApiConfiguration::from_payload(json!({
            "id": "legacy",
            "virtualHosts": [{ "path": "/legacy" }],
            "paths": {
                "/": [{ "methods": ["GET"], "policy": { "policy": "mock" } }]
            }
        }))
        .unwrap();

        assert!(api.paths.is_empty());
        assert_eq!(api.flows.len(), 1);
        assert_eq!(api.flows[0].steps(Phase::Request)[0].policy, "mock");
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "/");
        assert_eq!(normalize_base_path("///"), "/");
        assert_eq!(normalize_base_path("/teams/"), "/teams");
        assert_eq!(normalize_base_path("teams"), "/teams");
    }
}
