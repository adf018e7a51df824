//! Multi-tenant API gateway core.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                       GATEWAY NODE                        │
//!   Client        │  ┌────────┐   ┌────────────┐   ┌──────────┐   ┌─────────┐ │
//!   ──────────────┼─▶│  http  │──▶│  reactor   │──▶│  policy  │──▶│ backend │─┼──▶ Backend
//!                 │  │ server │   │ dispatcher │   │  chains  │   │connector│ │
//!                 │  └────────┘   └─────┬──────┘   └────▲─────┘   └─────────┘ │
//!                 │                     │ resolve       │ flows               │
//!                 │                     ▼               │                     │
//!                 │               ┌──────────┐    ┌─────┴────┐                │
//!                 │               │ registry │◀───│   flow   │                │
//!                 │               └────▲─────┘    └──────────┘                │
//!                 │                    │ register / unregister                │
//!   Control plane │               ┌────┴─────┐                                │
//!   ──────────────┼──────────────▶│   sync   │                                │
//!                 │               └──────────┘                                │
//!                 │  cross-cutting: config, observability, resilience,        │
//!                 │  security, lifecycle, admin                               │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod backend;
pub mod config;
pub mod definition;
pub mod error;
pub mod execution;
pub mod flow;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod policy;
pub mod reactor;
pub mod registry;
pub mod resilience;
pub mod security;
pub mod sync;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use lifecycle::{GatewayRuntime, Shutdown};
pub use reactor::Dispatcher;
pub use registry::Registries;
