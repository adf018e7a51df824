//! Policy subsystem.
//!
//! # Responsibilities
//! - Define the [`Policy`] hook contract and the [`StepOutcome`] it returns
//! - Map policy ids to constructors ([`factory`])
//! - Build a phase chain from resolved flows and run it ([`chain`])
//! - Ship the built-in policies ([`builtin`])
//!
//! # Data Flow
//! ```text
//! resolved flows ──► PolicyChain::build (flatten steps, expand shared groups)
//!                         │
//!                         ▼
//!                  ChainExecutor::execute
//!                    for each step:
//!                      enabled? step condition? ──no──► skip
//!                      factory.create(policy, config)
//!                      hook(ctx) ──► Continue    → next step
//!                                ──► Interrupt   → ctx.interrupt, stop
//!                                ──► Fail        → 500, stop
//!                         │
//!                         ▼
//!                    ChainOutcome (exactly one per phase)
//! ```

pub mod builtin;
pub mod chain;
pub mod factory;

use async_trait::async_trait;
use thiserror::Error;

use crate::execution::{ExecutionContext, Interruption};
use crate::security::CounterError;

pub use chain::{ChainExecutor, ChainOutcome, ChainStep, PolicyChain, SHARED_POLICY_GROUP_POLICY};
pub use factory::{PolicyFactory, PolicyRegistry};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("invalid configuration for policy {policy}: {message}")]
    InvalidConfiguration { policy: String, message: String },

    #[error("policy execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Counter(#[from] CounterError),
}

impl PolicyError {
    pub(crate) fn invalid(policy: &str, error: impl std::fmt::Display) -> Self {
        Self::InvalidConfiguration {
            policy: policy.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result of one policy hook.
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    Interrupt(Interruption),
    Fail(PolicyError),
}

/// A pluggable behaviour run around the request/response lifecycle.
///
/// Every hook defaults to `Continue`, so a policy only implements the phases
/// it cares about. Hooks must not block the runtime.
#[async_trait]
pub trait Policy: Send + Sync {
    fn id(&self) -> &str;

    async fn on_request(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        StepOutcome::Continue
    }

    async fn on_response(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        StepOutcome::Continue
    }

    async fn on_message_request(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        StepOutcome::Continue
    }

    async fn on_message_response(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        StepOutcome::Continue
    }
}
