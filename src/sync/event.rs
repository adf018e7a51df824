//! Control plane event model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Registry types, in the order a synchronization run processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryType {
    NodeMetadata,
    License,
    AccessPoint,
    Organization,
    Dictionary,
    SharedPolicyGroup,
    Api,
    Subscription,
    ApiKey,
    Debug,
}

impl RegistryType {
    /// Parents before children: organizations before apis, apis before
    /// subscriptions and keys.
    pub const PROCESSING_ORDER: [RegistryType; 10] = [
        RegistryType::NodeMetadata,
        RegistryType::License,
        RegistryType::AccessPoint,
        RegistryType::Organization,
        RegistryType::Dictionary,
        RegistryType::SharedPolicyGroup,
        RegistryType::Api,
        RegistryType::Subscription,
        RegistryType::ApiKey,
        RegistryType::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::NodeMetadata => "NODE_METADATA",
            RegistryType::License => "LICENSE",
            RegistryType::AccessPoint => "ACCESS_POINT",
            RegistryType::Organization => "ORGANIZATION",
            RegistryType::Dictionary => "DICTIONARY",
            RegistryType::SharedPolicyGroup => "SHARED_POLICY_GROUP",
            RegistryType::Api => "API",
            RegistryType::Subscription => "SUBSCRIPTION",
            RegistryType::ApiKey => "API_KEY",
            RegistryType::Debug => "DEBUG",
        }
    }

    /// URL path segment used by the HTTP control plane.
    pub fn path_segment(&self) -> &'static str {
        match self {
            RegistryType::NodeMetadata => "node-metadata",
            RegistryType::License => "licenses",
            RegistryType::AccessPoint => "access-points",
            RegistryType::Organization => "organizations",
            RegistryType::Dictionary => "dictionaries",
            RegistryType::SharedPolicyGroup => "shared-policy-groups",
            RegistryType::Api => "apis",
            RegistryType::Subscription => "subscriptions",
            RegistryType::ApiKey => "api-keys",
            RegistryType::Debug => "debug",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::PROCESSING_ORDER
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw) || t.path_segment() == raw)
    }
}

impl std::fmt::Display for RegistryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    Deploy,
    Update,
    Undeploy,
}

/// One change of one object, stamped with a logical timestamp.
///
/// Timestamps of a registry type form a contiguous sequence: the event
/// after timestamp `n` carries `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub registry_type: RegistryType,
    pub action: SyncAction,
    pub id: String,
    #[serde(default)]
    pub payload: Option<Value>,
    pub timestamp: i64,
}

/// Events of one type in `(from, to]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    #[serde(default)]
    pub events: Vec<SyncEvent>,
    /// Highest timestamp the source knows for the type, at or below `to`.
    pub latest_timestamp: i64,
}

/// Every currently deployed object of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    #[serde(default)]
    pub payloads: Vec<Value>,
    pub latest_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_order_puts_parents_first() {
        let order = RegistryType::PROCESSING_ORDER;
        let position = |t| order.iter().position(|x| *x == t).unwrap();
        assert!(position(RegistryType::Organization) < position(RegistryType::Api));
        assert!(position(RegistryType::SharedPolicyGroup) < position(RegistryType::Api));
        assert!(position(RegistryType::Api) < position(RegistryType::Subscription));
        assert!(position(RegistryType::Api) < position(RegistryType::ApiKey));
        assert_eq!(order.last(), Some(&RegistryType::Debug));
    }

    #[test]
    fn test_parse_registry_type() {
        assert_eq!(RegistryType::parse("api_key"), Some(RegistryType::ApiKey));
        assert_eq!(RegistryType::parse("shared-policy-groups"), Some(RegistryType::SharedPolicyGroup));
        assert_eq!(RegistryType::parse("nope"), None);
    }

    #[test]
    fn test_event_wire_format() {
        let event: SyncEvent = serde_json::from_value(serde_json::json!({
            "registryType": "API",
            "action": "UNDEPLOY",
            "id": "api-1",
            "timestamp": 7
        }))
        .unwrap();
        assert_eq!(event.action, SyncAction::Undeploy);
        assert!(event.payload.is_none());
    }
}
