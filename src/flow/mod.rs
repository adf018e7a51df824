//! Flow selection.
//!
//! # Data Flow
//! ```text
//! ExecutionContext + Stage
//!     → FlowProvider::fetch_raw        (org / api / plan / shared group)
//!     → filter_flows                   (enabled + condition, order kept)
//!          └─ CompositeEvaluator       method → path → expression
//!     → Vec<Arc<Flow>>                 handed to the chain builder
//! ```
//!
//! # Design Decisions
//! - Evaluators filter, never reorder
//! - Expression failures are logged and counted, then treated as false
//! - One generic resolver; stages differ only by provider

pub mod condition;
pub mod expression;
pub mod resolver;

pub use condition::{CompositeEvaluator, ConditionEvaluator};
pub use expression::{ExpressionEngine, ExpressionError, RhaiExpressionEngine};
pub use resolver::{filter_flows, FlowProvider, FlowResolver, FlowResolvers};
