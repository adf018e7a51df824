//! Synchronization against an in-memory control plane, and a full node
//! serving traffic it learned through sync.

use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::{GatewayConfig, SyncConfig};
use api_gateway::registry::Registries;
use api_gateway::sync::{EventBatch, RegistryType, SyncAction, SyncEngine, SyncEvent, SyncPhase};
use api_gateway::GatewayRuntime;
use serde_json::{json, Value};

mod common;

fn event(action: SyncAction, id: &str, timestamp: i64, payload: Option<Value>) -> SyncEvent {
    SyncEvent {
        registry_type: RegistryType::Api,
        action,
        id: id.to_string(),
        payload,
        timestamp,
    }
}

fn deploy(id: &str, path: &str, timestamp: i64) -> SyncEvent {
    let mut payload = common::api_payload(id, None, path);
    payload["deployedAt"] = json!(timestamp);
    event(SyncAction::Deploy, id, timestamp, Some(payload))
}

fn setup() -> (Arc<common::InMemoryControlPlane>, SyncEngine, Arc<Registries>) {
    let source = Arc::new(common::InMemoryControlPlane::default());
    let registries = Arc::new(Registries::new());
    let config = SyncConfig {
        max_apply_attempts: 2,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&source) as Arc<dyn api_gateway::sync::ControlPlaneSource>,
        Arc::clone(&registries),
        &config,
    );
    (source, engine, registries)
}

fn api_watermark(engine: &SyncEngine) -> i64 {
    engine
        .status()
        .types
        .into_iter()
        .find(|t| t.registry_type == RegistryType::Api)
        .map(|t| t.watermark)
        .unwrap()
}

#[tokio::test]
async fn test_full_sync_then_incremental() {
    let (source, engine, registries) = setup();
    source.set_state(RegistryType::Api, vec![common::api_payload("a", None, "/a")], 2);

    engine.synchronize(-1, i64::MAX).await;
    assert!(engine.is_ready());
    assert!(registries.apis.contains("a"));
    assert_eq!(api_watermark(&engine), 2);

    source.publish(deploy("b", "/b", 3));
    source.publish(event(SyncAction::Undeploy, "a", 4, None));
    let report = engine.synchronize(0, i64::MAX).await;

    assert_eq!(report.events_applied, 2);
    assert!(report.full_syncs.is_empty());
    assert!(!registries.apis.contains("a"));
    assert!(registries.apis.contains("b"));
    assert_eq!(api_watermark(&engine), 4);
}

#[tokio::test]
async fn test_gap_triggers_full_resync_of_that_type() {
    let (source, engine, registries) = setup();
    source.set_state(RegistryType::Api, vec![], 6);
    engine.synchronize(-1, i64::MAX).await;
    assert_eq!(api_watermark(&engine), 6);

    // 5 and 6 were already seen, 7 and 8 are missing.
    source.script(
        RegistryType::Api,
        EventBatch {
            events: vec![deploy("x", "/x", 5), deploy("y", "/y", 6), deploy("z", "/z", 9)],
            latest_timestamp: 9,
        },
    );
    source.set_state(
        RegistryType::Api,
        vec![common::api_payload("z", None, "/z"), common::api_payload("w", None, "/w")],
        9,
    );
    let fetches_before = source.full_fetches();

    let report = engine.synchronize(0, i64::MAX).await;

    assert_eq!(report.full_syncs, vec![RegistryType::Api]);
    assert_eq!(source.full_fetches(), fetches_before + 1);
    assert_eq!(api_watermark(&engine), 9);
    assert!(registries.apis.contains("z"));
    assert!(registries.apis.contains("w"));
    assert!(!registries.apis.contains("x"));
}

#[tokio::test]
async fn test_replayed_event_is_harmless() {
    let (source, engine, registries) = setup();
    engine.synchronize(-1, i64::MAX).await;

    source.publish(deploy("a", "/a", 1));
    engine.synchronize(0, i64::MAX).await;
    let first = registries.apis.get("a").unwrap();
    assert_eq!(api_watermark(&engine), 1);

    // The same event served again sits at the watermark: full resync, same content.
    let mut payload = common::api_payload("a", None, "/a");
    payload["deployedAt"] = json!(1);
    source.set_state(RegistryType::Api, vec![payload], 1);
    source.script(
        RegistryType::Api,
        EventBatch {
            events: vec![deploy("a", "/a", 1)],
            latest_timestamp: 1,
        },
    );
    let report = engine.synchronize(0, i64::MAX).await;

    assert_eq!(report.full_syncs, vec![RegistryType::Api]);
    let again = registries.apis.get("a").unwrap();
    assert_eq!(registries.apis.len(), 1);
    assert_eq!(first.virtual_hosts, again.virtual_hosts);
    assert_eq!(api_watermark(&engine), 1);
}

#[tokio::test]
async fn test_source_outage_keeps_last_snapshot() {
    let (source, engine, registries) = setup();
    source.set_state(RegistryType::Api, vec![common::api_payload("a", None, "/a")], 1);
    engine.synchronize(-1, i64::MAX).await;

    source.set_down(true);
    let report = engine.synchronize(0, i64::MAX).await;

    assert_eq!(report.source_errors, RegistryType::PROCESSING_ORDER.len());
    assert!(!engine.health().is_available());
    assert!(engine.status().last_error.is_some());
    assert!(registries.apis.contains("a"));
    assert_eq!(api_watermark(&engine), 1);

    source.set_down(false);
    source.publish(deploy("b", "/b", 2));
    engine.synchronize(0, i64::MAX).await;

    assert!(engine.health().is_available());
    assert!(registries.apis.contains("b"));
}

#[tokio::test]
async fn test_sharding_tags_filter_deployments() {
    let source = Arc::new(common::InMemoryControlPlane::default());
    let registries = Arc::new(Registries::new());
    let config = SyncConfig {
        sharding_tags: vec!["eu".to_string()],
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&source) as Arc<dyn api_gateway::sync::ControlPlaneSource>,
        Arc::clone(&registries),
        &config,
    );

    let mut eu = common::api_payload("eu-api", None, "/eu");
    eu["tags"] = json!(["eu"]);
    let mut us = common::api_payload("us-api", None, "/us");
    us["tags"] = json!(["us"]);
    let untagged = common::api_payload("plain", None, "/plain");
    source.set_state(RegistryType::Api, vec![eu, us, untagged], 1);

    engine.synchronize(-1, i64::MAX).await;

    assert!(registries.apis.contains("eu-api"));
    assert!(!registries.apis.contains("us-api"));
    assert!(!registries.apis.contains("plain"));
}

#[tokio::test]
async fn test_forced_resync_rebuilds_requested_type() {
    let (source, engine, _registries) = setup();
    engine.synchronize(-1, i64::MAX).await;
    let fetches = source.full_fetches();

    engine.request_full_resync(Some(RegistryType::Organization));
    let report = engine.synchronize(0, i64::MAX).await;

    assert_eq!(report.full_syncs, vec![RegistryType::Organization]);
    assert_eq!(source.full_fetches(), fetches + 1);
    let org = engine
        .status()
        .types
        .into_iter()
        .find(|t| t.registry_type == RegistryType::Organization)
        .unwrap();
    assert_eq!(org.phase, SyncPhase::IncrementalSync);
    assert_eq!(org.full_syncs, 2);
}

#[tokio::test]
async fn test_node_serves_apis_learned_through_sync() {
    let backend = common::start_mock_backend(200, "hello").await;
    let source = Arc::new(common::InMemoryControlPlane::default());
    let mut api = common::api_payload("echo", None, "/echo");
    api["endpoints"] = json!([{ "name": "default", "target": format!("http://{backend}") }]);
    source.set_state(RegistryType::Api, vec![api], 1);

    let mut config = GatewayConfig::default();
    config.admin.enabled = false;
    config.sync.enabled = true;
    config.sync.interval_ms = 50;

    let runtime = GatewayRuntime::with_parts(
        config.clone(),
        Arc::new(api_gateway::backend::HttpConnector::new(config.backend.clone())),
        Some(source as Arc<dyn api_gateway::sync::ControlPlaneSource>),
    );
    let engine = Arc::clone(runtime.sync_engine().unwrap());
    let shutdown = Arc::clone(runtime.shutdown());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(runtime.run(listener));

    for _ in 0..100 {
        if engine.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.is_ready());

    let client = reqwest::Client::new();
    let response = client.get(format!("http://{addr}/echo/anything")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "hello");

    let missing = client.get(format!("http://{addr}/nope")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    drop(client);
    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(10), server).await.unwrap().unwrap();
    assert!(result.is_ok());
}
