//! Shared builders and in-memory collaborators for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_gateway::backend::{BackendConnector, BackendError};
use api_gateway::config::TimeoutConfig;
use api_gateway::execution::{ExecutionContext, GatewayResponse, Interruption};
use api_gateway::flow::RhaiExpressionEngine;
use api_gateway::observability::{RequestRecord, TelemetrySink};
use api_gateway::policy::{Policy, PolicyRegistry, StepOutcome};
use api_gateway::registry::Registries;
use api_gateway::resilience::CircuitBreakers;
use api_gateway::security::InMemoryCounterStore;
use api_gateway::sync::{ControlPlaneSource, EventBatch, FullState, RegistryType, SyncError, SyncEvent};
use api_gateway::Dispatcher;
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal API payload: one virtual host, no plans.
pub fn api_payload(id: &str, host: Option<&str>, path: &str) -> Value {
    let mut vhost = json!({ "path": path });
    if let Some(host) = host {
        vhost["host"] = Value::from(host);
    }
    json!({ "id": id, "name": id, "deployedAt": 1, "virtualHosts": [vhost] })
}

/// A `record` step that appends `name` to the shared log and then continues,
/// or interrupts when `action` is `"interrupt"`.
pub fn record_step(name: &str, action: &str) -> Value {
    json!({ "policy": "record", "configuration": { "name": name, "action": action } })
}

/// Ordered log of executed `record` steps.
#[derive(Default, Clone)]
pub struct RecordingLog(Arc<Mutex<Vec<String>>>);

impl RecordingLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct RecordingPolicy {
    name: String,
    action: String,
    log: RecordingLog,
}

impl RecordingPolicy {
    fn act(&self, phase: &str) -> StepOutcome {
        self.log.push(format!("{}:{phase}", self.name));
        match (self.action.as_str(), phase) {
            ("interrupt", "request") => {
                StepOutcome::Interrupt(Interruption::new(StatusCode::FORBIDDEN, "RECORD_STOP", "stopped"))
            }
            _ => StepOutcome::Continue,
        }
    }
}

#[async_trait]
impl Policy for RecordingPolicy {
    fn id(&self) -> &str {
        "record"
    }

    async fn on_request(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        if self.action == "slow" {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.act("request")
    }

    async fn on_response(&self, _ctx: &mut ExecutionContext) -> StepOutcome {
        self.act("response")
    }
}

/// Built-in policies plus `record`, writing into `log`.
pub fn policy_registry(log: &RecordingLog) -> PolicyRegistry {
    let mut registry = PolicyRegistry::with_builtins(
        Arc::new(InMemoryCounterStore::new()),
        Arc::new(CircuitBreakers::new()),
        2,
    );
    let log = log.clone();
    registry.register("record", move |config| {
        Ok(Arc::new(RecordingPolicy {
            name: config["name"].as_str().unwrap_or_default().to_string(),
            action: config["action"].as_str().unwrap_or("continue").to_string(),
            log: log.clone(),
        }) as Arc<dyn Policy>)
    });
    registry
}

/// Backend stand-in: counts calls and answers with a fixed response.
pub struct MockConnector {
    calls: AtomicUsize,
    status: StatusCode,
    delay: Option<Duration>,
    last_path: Mutex<Option<String>>,
}

impl MockConnector {
    pub fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            status,
            delay: None,
            last_path: Mutex::new(None),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `path_info` of the last forwarded request.
    pub fn last_path(&self) -> Option<String> {
        self.last_path.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<GatewayResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock().unwrap() = Some(ctx.path_info().to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let api_id = ctx.api().map(|api| api.id.clone()).unwrap_or_default();
        Ok(GatewayResponse::json(self.status, &json!({ "api": api_id })))
    }
}

/// Keeps every telemetry record.
#[derive(Default)]
pub struct CollectingSink(Mutex<Vec<RequestRecord>>);

impl CollectingSink {
    pub fn records(&self) -> Vec<RequestRecord> {
        self.0.lock().unwrap().clone()
    }
}

impl TelemetrySink for CollectingSink {
    fn record(&self, record: RequestRecord) {
        self.0.lock().unwrap().push(record);
    }
}

pub struct Harness {
    pub registries: Arc<Registries>,
    pub connector: Arc<MockConnector>,
    pub telemetry: Arc<CollectingSink>,
    pub log: RecordingLog,
    pub dispatcher: Dispatcher,
}

pub fn harness(connector: MockConnector, timeouts: TimeoutConfig) -> Harness {
    let registries = Arc::new(Registries::new());
    let connector = Arc::new(connector);
    let telemetry = Arc::new(CollectingSink::default());
    let log = RecordingLog::default();
    let dispatcher = Dispatcher::new(
        Arc::clone(&registries),
        Arc::new(policy_registry(&log)),
        Arc::new(RhaiExpressionEngine::new().with_dictionaries(Arc::clone(&registries))),
        Arc::clone(&connector) as Arc<dyn BackendConnector>,
        Arc::clone(&telemetry) as Arc<dyn TelemetrySink>,
        timeouts,
    );
    Harness {
        registries,
        connector,
        telemetry,
        log,
        dispatcher,
    }
}

/// Control plane kept in memory. Events are served per type in `(from, to]`.
#[derive(Default)]
pub struct InMemoryControlPlane {
    states: Mutex<HashMap<RegistryType, FullState>>,
    events: Mutex<HashMap<RegistryType, Vec<SyncEvent>>>,
    /// Served once instead of the filtered events, then cleared.
    scripted: Mutex<HashMap<RegistryType, EventBatch>>,
    down: AtomicBool,
    full_fetches: AtomicUsize,
}

impl InMemoryControlPlane {
    pub fn set_state(&self, registry_type: RegistryType, payloads: Vec<Value>, latest_timestamp: i64) {
        self.states
            .lock()
            .unwrap()
            .insert(registry_type, FullState { payloads, latest_timestamp });
    }

    pub fn publish(&self, event: SyncEvent) {
        self.events
            .lock()
            .unwrap()
            .entry(event.registry_type)
            .or_default()
            .push(event);
    }

    pub fn script(&self, registry_type: RegistryType, batch: EventBatch) {
        self.scripted.lock().unwrap().insert(registry_type, batch);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn full_fetches(&self) -> usize {
        self.full_fetches.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), SyncError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::SourceUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneSource for InMemoryControlPlane {
    async fn fetch_events(&self, registry_type: RegistryType, from: i64, to: i64) -> Result<EventBatch, SyncError> {
        self.check_up()?;
        if let Some(batch) = self.scripted.lock().unwrap().remove(&registry_type) {
            return Ok(batch);
        }
        let events: Vec<SyncEvent> = self
            .events
            .lock()
            .unwrap()
            .get(&registry_type)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.timestamp > from && e.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let latest_timestamp = events.last().map_or(from, |e| e.timestamp);
        Ok(EventBatch { events, latest_timestamp })
    }

    async fn fetch_full_state(&self, registry_type: RegistryType) -> Result<FullState, SyncError> {
        self.check_up()?;
        self.full_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&registry_type)
            .cloned()
            .unwrap_or_default())
    }
}

/// Raw TCP backend answering every connection with `status` and `body`.
/// Returns the bound address.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 {status} OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len(),
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
