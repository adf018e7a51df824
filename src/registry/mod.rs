//! In-memory registries of deployed objects.
//!
//! # Responsibilities
//! - Hold every deployed object the request path needs (APIs and siblings)
//! - Resolve (host, path) to an API without locking (`api.rs`)
//! - Expose one explicitly constructed service passed down via `Arc`
//!
//! # Data Flow
//! ```text
//! SyncEngine ──register/unregister/replace_all──▶ Registries
//!                                                    │
//! Dispatcher ◀──resolve_match / get ──────────────────┘
//! ```
//!
//! # Design Decisions
//! - Copy-on-write maps behind `ArcSwap`; writers serialized by a mutex
//! - Requests keep the `Arc` of the version they started with
//! - Teardown drains in-flight requests before discarding snapshots

pub mod api;
pub mod matcher;
pub mod store;

use std::time::Duration;

use crate::definition::{
    AccessPoint, ApiKey, DebugSession, Dictionary, License, NodeMetadata, Organization,
    SharedPolicyGroup, Subscription,
};
use crate::lifecycle::inflight::InFlightTracker;

pub use api::{ApiRegistry, ResolvedApi};
pub use store::{RegisterOutcome, Registry, RegistryEntry};

/// Every registry a gateway node holds.
#[derive(Default)]
pub struct Registries {
    pub apis: ApiRegistry,
    pub organizations: Registry<Organization>,
    pub dictionaries: Registry<Dictionary>,
    pub shared_policy_groups: Registry<SharedPolicyGroup>,
    pub subscriptions: Registry<Subscription>,
    pub api_keys: Registry<ApiKey>,
    pub node_metadata: Registry<NodeMetadata>,
    pub licenses: Registry<License>,
    pub access_points: Registry<AccessPoint>,
    pub debug_sessions: Registry<DebugSession>,
    in_flight: InFlightTracker,
}

impl Registries {
    /// Empty registries, as before the first synchronization.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    /// Wait for in-flight requests (bounded by `timeout`), then drop every snapshot.
    /// Returns false if requests were still running when the timeout elapsed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let drained = self.in_flight.wait_idle(timeout).await;
        if !drained {
            tracing::warn!(
                in_flight = self.in_flight.active_count(),
                "Drain timeout elapsed with requests still in flight"
            );
        }
        self.clear();
        tracing::info!("Registries cleared");
        drained
    }

    pub fn clear(&self) {
        self.apis.clear();
        self.organizations.clear();
        self.dictionaries.clear();
        self.shared_policy_groups.clear();
        self.subscriptions.clear();
        self.api_keys.clear();
        self.node_metadata.clear();
        self.licenses.clear();
        self.access_points.clear();
        self.debug_sessions.clear();
    }
}
