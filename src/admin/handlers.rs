use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::definition::ApiConfiguration;
use crate::sync::{RegistryType, SyncStatus};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub ready: bool,
    pub apis: usize,
    pub in_flight: u64,
}

#[derive(Serialize)]
pub struct ApiSummary {
    pub id: String,
    pub name: String,
    pub context_paths: Vec<String>,
    pub plans: Vec<String>,
    pub tags: Vec<String>,
    pub deployed_at: i64,
    pub revision: u64,
}

impl From<&ApiConfiguration> for ApiSummary {
    fn from(api: &ApiConfiguration) -> Self {
        Self {
            id: api.id.clone(),
            name: api.name.clone(),
            context_paths: api
                .virtual_hosts
                .iter()
                .map(|vh| match &vh.host {
                    Some(host) => format!("{host}{}", vh.path),
                    None => vh.path.clone(),
                })
                .collect(),
            plans: api.plans.iter().map(|p| p.id.clone()).collect(),
            tags: api.tags.iter().cloned().collect(),
            deployed_at: api.deployed_at,
            revision: api.revision,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResyncQuery {
    #[serde(rename = "type")]
    pub registry_type: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let ready = state.sync.as_ref().map_or(true, |engine| engine.is_ready());
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if ready { "operational" } else { "starting" },
        ready,
        apis: state.registries.apis.len(),
        in_flight: state.registries.in_flight().active_count(),
    })
}

pub async fn get_apis(State(state): State<AdminState>) -> Json<Vec<ApiSummary>> {
    let apis = state.registries.apis.snapshot();
    Json(apis.iter().map(|api| ApiSummary::from(api.as_ref())).collect())
}

pub async fn get_api(State(state): State<AdminState>, Path(id): Path<String>) -> Result<Json<ApiSummary>, StatusCode> {
    state
        .registries
        .apis
        .get(&id)
        .map(|api| Json(ApiSummary::from(api.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_sync(State(state): State<AdminState>) -> Result<Json<SyncStatus>, StatusCode> {
    state
        .sync
        .as_ref()
        .map(|engine| Json(engine.status()))
        .ok_or(StatusCode::CONFLICT)
}

/// `POST /admin/sync/resync[?type=API]`
pub async fn post_resync(
    State(state): State<AdminState>,
    Query(query): Query<ResyncQuery>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    let engine = state.sync.as_ref().ok_or(StatusCode::CONFLICT)?;
    let registry_type = match query.registry_type.as_deref() {
        Some(raw) => Some(RegistryType::parse(raw).ok_or(StatusCode::BAD_REQUEST)?),
        None => None,
    };

    engine.request_full_resync(registry_type);
    let scope = registry_type.map_or("ALL", |t| t.as_str());
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "resync": scope }))))
}
