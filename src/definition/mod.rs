//! Deployable object model.
//!
//! # Responsibilities
//! - Typed views of control plane payloads (APIs, plans, flows and siblings)
//! - Validation and normalisation at build time so request paths never re-check
//! - Legacy path rules converted into flows (`legacy.rs`)
//!
//! # Design Decisions
//! - Built objects are immutable and shared via `Arc`; updates replace them
//! - Flows are `Arc<Flow>` so resolution hands out references, not copies
//! - Every object exposes its id and deployment timestamp through `Deployable`

pub mod api;
pub mod flow;
pub mod legacy;
pub mod objects;
pub mod plan;

use serde::de::DeserializeOwned;
use thiserror::Error;

pub use api::{ApiConfiguration, Endpoint, FlowMode, Resource, VirtualHost};
pub use flow::{Condition, Flow, PathOperator, Phase, PolicyMetadata, Stage};
pub use objects::{
    AccessPoint, ApiKey, DebugSession, Dictionary, License, NodeMetadata, Organization,
    SharedPolicyGroup, Subscription, SubscriptionStatus,
};
pub use plan::{Plan, PlanSecurity, PlanStatus};

/// An object the registries can hold.
pub trait Deployable: Send + Sync + 'static {
    /// Registry key.
    fn id(&self) -> &str;

    /// Deployment timestamp, epoch millis. An update is applied only when newer.
    fn deployed_at(&self) -> i64;
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid definition {id}: {reason}")]
    Invalid { id: String, reason: String },
}

pub(crate) fn parse_payload<T>(payload: serde_json::Value) -> Result<T, DefinitionError>
where
    T: DeserializeOwned + Deployable,
{
    let value: T = serde_json::from_value(payload)?;
    if value.id().trim().is_empty() {
        return Err(DefinitionError::MissingField("id"));
    }
    Ok(value)
}
