//! Introspection surface.
//!
//! Read-only views of the registries and the sync engine, plus one write:
//! forcing a full resync. Every route requires the admin bearer key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::registry::Registries;
use crate::sync::SyncEngine;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub registries: Arc<Registries>,
    /// `None` when synchronization is disabled.
    pub sync: Option<Arc<SyncEngine>>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/apis", get(get_apis))
        .route("/admin/apis/{id}", get(get_api))
        .route("/admin/sync", get(get_sync))
        .route("/admin/sync/resync", post(post_resync))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
