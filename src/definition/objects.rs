//! Sibling objects synchronized next to APIs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::flow::{assign_stage, Flow, Phase, PolicyMetadata, Stage};
use crate::definition::{parse_payload, DefinitionError, Deployable};

/// Organization carrying platform flows applied to all of its APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub flows: Vec<Arc<Flow>>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl Organization {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        let mut org: Organization = parse_payload(payload)?;
        assign_stage(&mut org.flows, Stage::Platform);
        Ok(org)
    }
}

/// Key/value properties exposed to expressions as `dictionaries[id][key]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dictionary {
    pub id: String,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl Dictionary {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }
}

/// Reusable step list spliced into API flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedPolicyGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub environment_id: Option<String>,
    pub phase: Phase,
    #[serde(default)]
    pub steps: Vec<PolicyMetadata>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl SharedPolicyGroup {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }

    /// The group as an unconditional flow carrying its steps on its phase.
    pub fn to_flow(&self) -> Flow {
        let mut flow = Flow::new(format!("shared-policy-group {}", self.id), Stage::SharedPolicyGroup);
        *flow.steps_mut(self.phase) = self.steps.clone();
        flow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    #[default]
    Accepted,
    Paused,
    Rejected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub api_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub status: SubscriptionStatus,
    /// Epoch millis. Absent means already started.
    #[serde(default)]
    pub starting_at: Option<i64>,
    /// Epoch millis. Absent means no end.
    #[serde(default)]
    pub ending_at: Option<i64>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl Subscription {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }

    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.status == SubscriptionStatus::Accepted
            && self.starting_at.map_or(true, |start| start <= now_ms)
            && self.ending_at.map_or(true, |end| now_ms < end)
    }
}

/// An API key. Registered under its key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub api_id: String,
    pub plan_id: String,
    pub subscription_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub expire_at: Option<i64>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl ApiKey {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.revoked && !self.paused && self.expire_at.map_or(true, |exp| now_ms < exp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub id: String,
    #[serde(default)]
    pub installation_id: Option<String>,
    #[serde(default)]
    pub organization_ids: Vec<String>,
    #[serde(default)]
    pub environment_ids: Vec<String>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl NodeMetadata {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }
}

/// License attached to an organization or to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub id: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub deployed_at: i64,
}

impl License {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }

    pub fn allows(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPoint {
    pub id: String,
    #[serde(default)]
    pub environment_id: Option<String>,
    pub host: String,
    #[serde(default)]
    pub secured: bool,
    #[serde(default)]
    pub deployed_at: i64,
}

impl AccessPoint {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }
}

/// A debug session replaying a request against a given API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub id: String,
    pub api_id: String,
    #[serde(default)]
    pub request: serde_json::Value,
    #[serde(default)]
    pub deployed_at: i64,
}

impl DebugSession {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, DefinitionError> {
        parse_payload(payload)
    }
}

macro_rules! deployable {
    ($($ty:ty => $id:ident),* $(,)?) => {
        $(
            impl Deployable for $ty {
                fn id(&self) -> &str {
                    &self.$id
                }

                fn deployed_at(&self) -> i64 {
                    self.deployed_at
                }
            }
        )*
    };
}

deployable! {
    Organization => id,
    Dictionary => id,
    SharedPolicyGroup => id,
    Subscription => id,
    ApiKey => key,
    NodeMetadata => id,
    License => id,
    AccessPoint => id,
    DebugSession => id,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_organization_flows_are_platform_stage() {
        let org = Organization::from_payload(json!({
            "id": "DEFAULT",
            "flows": [{ "name": "audit", "stage": "API" }]
        }))
        .unwrap();
        assert_eq!(org.flows[0].stage, Stage::Platform);
    }

    #[test]
    fn test_payload_without_id_is_rejected() {
        let err = Dictionary::from_payload(json!({ "id": "  " })).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingField("id")));
    }

    #[test]
    fn test_subscription_window() {
        let sub = Subscription::from_payload(json!({
            "id": "s1", "apiId": "a", "planId": "p",
            "startingAt": 100, "endingAt": 200
        }))
        .unwrap();
        assert!(!sub.is_active_at(99));
        assert!(sub.is_active_at(100));
        assert!(!sub.is_active_at(200));
    }

    #[test]
    fn test_api_key_validity() {
        let mut key = ApiKey::from_payload(json!({
            "key": "k", "apiId": "a", "planId": "p", "subscriptionId": "s", "expireAt": 50
        }))
        .unwrap();
        assert_eq!(key.id(), "k");
        assert!(key.is_valid_at(10));
        assert!(!key.is_valid_at(50));
        key.expire_at = None;
        key.revoked = true;
        assert!(!key.is_valid_at(10));
    }

    #[test]
    fn test_shared_group_flow_carries_phase_steps() {
        let group = SharedPolicyGroup::from_payload(json!({
            "id": "spg", "phase": "RESPONSE",
            "steps": [{ "policy": "transform-headers" }]
        }))
        .unwrap();
        let flow = group.to_flow();
        assert_eq!(flow.stage, Stage::SharedPolicyGroup);
        assert!(flow.request.is_empty());
        assert_eq!(flow.response.len(), 1);
    }
}
