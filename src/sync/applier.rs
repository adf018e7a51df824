//! Applies control plane events and full states to the registries.
//!
//! Applying the same event twice leaves the registries as applying it once:
//! a DEPLOY/UPDATE that is not newer than the stored deployment is skipped
//! and UNDEPLOY of a missing id does nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::definition::{
    AccessPoint, ApiConfiguration, ApiKey, DebugSession, Deployable, DefinitionError, Dictionary,
    License, NodeMetadata, Organization, SharedPolicyGroup, Subscription,
};
use crate::registry::{RegisterOutcome, Registries, Registry};
use crate::sync::event::{RegistryType, SyncAction, SyncEvent};
use crate::sync::SyncError;

/// What an apply did to the registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The registry content changed.
    Applied,
    /// Already applied, or an undeploy of an unknown id.
    Skipped,
    /// Filtered out by sharding tags and removed if present.
    Ignored,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Skipped => "skipped",
            ApplyOutcome::Ignored => "ignored",
        }
    }
}

/// Sharding tags of this node: `!tag` excludes, anything else includes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardingTags {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl ShardingTags {
    pub fn new<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut sharding = Self::default();
        for tag in tags {
            let tag = tag.as_ref().trim();
            match tag.strip_prefix('!') {
                Some(excluded) if !excluded.is_empty() => {
                    sharding.exclude.insert(excluded.to_string());
                }
                Some(_) => {}
                None if !tag.is_empty() => {
                    sharding.include.insert(tag.to_string());
                }
                None => {}
            }
        }
        sharding
    }

    /// Whether an API carrying `tags` is deployed on this node.
    pub fn accepts(&self, tags: &BTreeSet<String>) -> bool {
        if tags.iter().any(|tag| self.exclude.contains(tag)) {
            return false;
        }
        self.include.is_empty() || tags.iter().any(|tag| self.include.contains(tag))
    }
}

pub struct RegistryApplier {
    registries: Arc<Registries>,
    sharding: ShardingTags,
}

impl RegistryApplier {
    pub fn new(registries: Arc<Registries>, sharding: ShardingTags) -> Self {
        Self { registries, sharding }
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn apply(&self, event: &SyncEvent) -> Result<ApplyOutcome, SyncError> {
        let registry_type = event.registry_type;
        match event.action {
            SyncAction::Undeploy => Ok(self.undeploy(registry_type, &event.id)),
            SyncAction::Deploy | SyncAction::Update => {
                let payload = event.payload.clone().ok_or_else(|| SyncError::MissingPayload {
                    registry_type,
                    id: event.id.clone(),
                })?;
                self.deploy(registry_type, &event.id, stamp(payload, event.timestamp))
            }
        }
    }

    /// Replace the whole content of one registry. Invalid payloads are skipped.
    pub fn rebuild(&self, registry_type: RegistryType, payloads: &[Value], latest_timestamp: i64) -> usize {
        let stamped: Vec<Value> = payloads
            .iter()
            .map(|payload| stamp(payload.clone(), latest_timestamp))
            .collect();
        let payloads = stamped.as_slice();
        let r = &self.registries;
        match registry_type {
            RegistryType::Api => {
                let apis: Vec<_> = build_all(registry_type, payloads, ApiConfiguration::from_payload)
                    .into_iter()
                    .filter(|api| self.sharding.accepts(&api.tags))
                    .inspect(|api| self.check_api_dependencies(api))
                    .collect();
                r.apis.replace_all(apis)
            }
            RegistryType::Organization => {
                r.organizations.replace_all(build_all(registry_type, payloads, Organization::from_payload))
            }
            RegistryType::Dictionary => {
                r.dictionaries.replace_all(build_all(registry_type, payloads, Dictionary::from_payload))
            }
            RegistryType::SharedPolicyGroup => r
                .shared_policy_groups
                .replace_all(build_all(registry_type, payloads, SharedPolicyGroup::from_payload)),
            RegistryType::Subscription => r
                .subscriptions
                .replace_all(build_all(registry_type, payloads, Subscription::from_payload)),
            RegistryType::ApiKey => r.api_keys.replace_all(build_all(registry_type, payloads, ApiKey::from_payload)),
            RegistryType::NodeMetadata => r
                .node_metadata
                .replace_all(build_all(registry_type, payloads, NodeMetadata::from_payload)),
            RegistryType::License => r.licenses.replace_all(build_all(registry_type, payloads, License::from_payload)),
            RegistryType::AccessPoint => r
                .access_points
                .replace_all(build_all(registry_type, payloads, AccessPoint::from_payload)),
            RegistryType::Debug => r
                .debug_sessions
                .replace_all(build_all(registry_type, payloads, DebugSession::from_payload)),
        }
    }

    fn deploy(&self, registry_type: RegistryType, id: &str, payload: Value) -> Result<ApplyOutcome, SyncError> {
        let r = &self.registries;
        match registry_type {
            RegistryType::Api => {
                let api = build(registry_type, id, payload, ApiConfiguration::from_payload)?;
                if !self.sharding.accepts(&api.tags) {
                    tracing::debug!(api_id = %id, tags = ?api.tags, "Api filtered out by sharding tags");
                    r.apis.unregister(id);
                    return Ok(ApplyOutcome::Ignored);
                }
                self.check_api_dependencies(&api);
                Ok(registered(r.apis.register(api)))
            }
            RegistryType::Organization => register(&r.organizations, build(registry_type, id, payload, Organization::from_payload)?),
            RegistryType::Dictionary => register(&r.dictionaries, build(registry_type, id, payload, Dictionary::from_payload)?),
            RegistryType::SharedPolicyGroup => register(
                &r.shared_policy_groups,
                build(registry_type, id, payload, SharedPolicyGroup::from_payload)?,
            ),
            RegistryType::Subscription => {
                let subscription = build(registry_type, id, payload, Subscription::from_payload)?;
                if !r.apis.contains(&subscription.api_id) {
                    tracing::debug!(
                        subscription_id = %id,
                        api_id = %subscription.api_id,
                        "Subscription registered for an api not deployed on this node"
                    );
                }
                register(&r.subscriptions, subscription)
            }
            RegistryType::ApiKey => register(&r.api_keys, build(registry_type, id, payload, ApiKey::from_payload)?),
            RegistryType::NodeMetadata => register(&r.node_metadata, build(registry_type, id, payload, NodeMetadata::from_payload)?),
            RegistryType::License => register(&r.licenses, build(registry_type, id, payload, License::from_payload)?),
            RegistryType::AccessPoint => register(&r.access_points, build(registry_type, id, payload, AccessPoint::from_payload)?),
            RegistryType::Debug => register(&r.debug_sessions, build(registry_type, id, payload, DebugSession::from_payload)?),
        }
    }

    fn undeploy(&self, registry_type: RegistryType, id: &str) -> ApplyOutcome {
        let r = &self.registries;
        let removed = match registry_type {
            RegistryType::Api => r.apis.unregister(id).is_some(),
            RegistryType::Organization => r.organizations.unregister(id).is_some(),
            RegistryType::Dictionary => r.dictionaries.unregister(id).is_some(),
            RegistryType::SharedPolicyGroup => r.shared_policy_groups.unregister(id).is_some(),
            RegistryType::Subscription => r.subscriptions.unregister(id).is_some(),
            RegistryType::ApiKey => r.api_keys.unregister(id).is_some(),
            RegistryType::NodeMetadata => r.node_metadata.unregister(id).is_some(),
            RegistryType::License => r.licenses.unregister(id).is_some(),
            RegistryType::AccessPoint => r.access_points.unregister(id).is_some(),
            RegistryType::Debug => r.debug_sessions.unregister(id).is_some(),
        };
        if removed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Skipped
        }
    }

    /// Missing parents do not block a deployment; they are reported.
    fn check_api_dependencies(&self, api: &ApiConfiguration) {
        if let Some(organization_id) = &api.organization_id {
            if !self.registries.organizations.contains(organization_id) {
                tracing::warn!(
                    api_id = %api.id,
                    organization_id = %organization_id,
                    "Api references an unknown organization"
                );
            }
        }
        for group_id in api.shared_policy_group_refs() {
            if !self.registries.shared_policy_groups.contains(&group_id) {
                tracing::warn!(
                    api_id = %api.id,
                    shared_policy_group_id = %group_id,
                    "Api references an unknown shared policy group"
                );
            }
        }
    }
}

/// Payloads without a deployment timestamp take the event's one, so later
/// updates of the same object are recognised as newer.
fn stamp(mut payload: Value, timestamp: i64) -> Value {
    if let Value::Object(map) = &mut payload {
        let missing = map.get("deployedAt").and_then(Value::as_i64).unwrap_or(0) == 0;
        if missing {
            map.insert("deployedAt".to_string(), Value::from(timestamp));
        }
    }
    payload
}

fn build<T, F>(registry_type: RegistryType, id: &str, payload: Value, parse: F) -> Result<T, SyncError>
where
    T: Deployable,
    F: FnOnce(Value) -> Result<T, DefinitionError>,
{
    let value = parse(payload).map_err(|source| SyncError::Definition {
        registry_type,
        id: id.to_string(),
        source,
    })?;
    if value.id() != id {
        return Err(SyncError::IdMismatch {
            expected: id.to_string(),
            actual: value.id().to_string(),
        });
    }
    Ok(value)
}

fn build_all<T, F>(registry_type: RegistryType, payloads: &[Value], parse: F) -> Vec<T>
where
    F: Fn(Value) -> Result<T, DefinitionError>,
{
    payloads
        .iter()
        .filter_map(|payload| match parse(payload.clone()) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(
                    registry_type = %registry_type,
                    error = %error,
                    "Skipping invalid payload in full state"
                );
                None
            }
        })
        .collect()
}

fn register<T: Deployable>(registry: &Registry<T>, value: T) -> Result<ApplyOutcome, SyncError> {
    Ok(registered(registry.register(value)))
}

fn registered(outcome: RegisterOutcome) -> ApplyOutcome {
    match outcome {
        RegisterOutcome::Deployed | RegisterOutcome::Updated => ApplyOutcome::Applied,
        RegisterOutcome::Unchanged => ApplyOutcome::Skipped,
    }
}
