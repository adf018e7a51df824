//! Control plane synchronization.
//!
//! # Responsibilities
//! - Pull deployable objects from the control plane (`source.rs`)
//! - Apply events and full states to the registries (`applier.rs`)
//! - Track a watermark and sync phase per registry type (`engine.rs`)
//! - Report source availability (`health.rs`)
//!
//! # Data Flow
//! ```text
//! ControlPlaneSource ──events / full state──▶ SyncEngine
//!                                                 │ per type, fixed order
//!                                                 ▼
//!                                          RegistryApplier ──▶ Registries
//! ```
//!
//! # Design Decisions
//! - Registries keep their last-known-good content while the source is down
//! - A gap in event timestamps never gets patched over: the type is rebuilt
//! - Full syncs swap a registry's content in one step

pub mod applier;
pub mod engine;
pub mod event;
pub mod health;
pub mod source;

use thiserror::Error;

use crate::definition::DefinitionError;

pub use applier::{ApplyOutcome, RegistryApplier, ShardingTags};
pub use engine::{SyncEngine, SyncPhase, SyncReport, SyncStatus, TypeStatus};
pub use event::{EventBatch, FullState, RegistryType, SyncAction, SyncEvent};
pub use health::SyncHealth;
pub use source::{ControlPlaneSource, HttpControlPlaneSource};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("control plane unavailable: {0}")]
    SourceUnavailable(String),

    #[error("invalid control plane response: {0}")]
    InvalidResponse(String),

    #[error("{registry_type} event for {id} carries no payload")]
    MissingPayload { registry_type: RegistryType, id: String },

    #[error("invalid {registry_type} payload for {id}")]
    Definition {
        registry_type: RegistryType,
        id: String,
        #[source]
        source: DefinitionError,
    },

    #[error("event id {expected} does not match payload id {actual}")]
    IdMismatch { expected: String, actual: String },
}
