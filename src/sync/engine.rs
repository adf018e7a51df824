//! Synchronization engine.
//!
//! # Responsibilities
//! - Keep one phase and one watermark per registry type
//! - Walk the types in `RegistryType::PROCESSING_ORDER` on every pass
//! - Detect gaps and out-of-order events and rebuild the affected type
//! - Retry failing applies with backoff, escalate to a full sync on exhaustion
//!
//! # Data Flow
//! ```text
//! synchronize(from, to)
//!     for type in PROCESSING_ORDER:
//!         INITIAL / FULL_SYNC / forced / from < 0
//!             → fetch_full_state → RegistryApplier::rebuild → watermark = latest
//!         INCREMENTAL_SYNC
//!             → fetch_events(watermark, to)
//!             → whole batch in sequence? no  → FULL_SYNC now, nothing applied
//!             → apply each (retry) → watermark = last contiguous apply
//!             → exhausted retries → FULL_SYNC now
//! ```
//!
//! # Design Decisions
//! - Timestamps are per-type logical sequence numbers; the loop asks for
//!   everything up to `i64::MAX`
//! - Passes never overlap: a run lock serializes `synchronize`
//! - Source failures leave registries and watermarks untouched

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::time::{self, MissedTickBehavior};

use crate::config::SyncConfig;
use crate::observability::metrics;
use crate::registry::Registries;
use crate::resilience::RetryPolicy;
use crate::sync::applier::{ApplyOutcome, RegistryApplier, ShardingTags};
use crate::sync::event::{EventBatch, RegistryType, SyncEvent};
use crate::sync::health::SyncHealth;
use crate::sync::source::ControlPlaneSource;
use crate::sync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Initial,
    FullSync,
    IncrementalSync,
}

#[derive(Debug, Clone)]
struct TypeState {
    phase: SyncPhase,
    watermark: i64,
    full_syncs: u64,
    events_applied: u64,
    last_error: Option<String>,
}

impl Default for TypeState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Initial,
            watermark: -1,
            full_syncs: 0,
            events_applied: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStatus {
    pub registry_type: RegistryType,
    pub phase: SyncPhase,
    pub watermark: i64,
    pub full_syncs: u64,
    pub events_applied: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub ready: bool,
    pub source_available: bool,
    pub last_error: Option<String>,
    pub types: Vec<TypeStatus>,
}

/// What one `synchronize` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub full_syncs: Vec<RegistryType>,
    pub events_applied: usize,
    pub events_failed: usize,
    pub source_errors: usize,
}

pub struct SyncEngine {
    source: Arc<dyn ControlPlaneSource>,
    applier: RegistryApplier,
    health: SyncHealth,
    retry: RetryPolicy,
    interval: Duration,
    states: Mutex<BTreeMap<RegistryType, TypeState>>,
    forced: Mutex<BTreeSet<RegistryType>>,
    resync: Notify,
    running: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn ControlPlaneSource>, registries: Arc<Registries>, config: &SyncConfig) -> Self {
        let states = RegistryType::PROCESSING_ORDER
            .into_iter()
            .map(|t| (t, TypeState::default()))
            .collect();
        Self {
            source,
            applier: RegistryApplier::new(registries, ShardingTags::new(&config.sharding_tags)),
            health: SyncHealth::new(),
            retry: RetryPolicy::new(
                config.max_apply_attempts,
                config.retry_base_delay_ms,
                config.retry_max_delay_ms,
            ),
            interval: Duration::from_millis(config.interval_ms.max(1)),
            states: Mutex::new(states),
            forced: Mutex::new(BTreeSet::new()),
            resync: Notify::new(),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn health(&self) -> &SyncHealth {
        &self.health
    }

    /// One pass over every registry type.
    ///
    /// `from` only selects the mode: `from < 0` rebuilds every type. For
    /// `from >= 0` its value is not used as a position; types in incremental
    /// state read the events after their own watermark up to `to`, and the
    /// others get a full sync.
    pub async fn synchronize(&self, from: i64, to: i64) -> SyncReport {
        let _running = self.running.lock().await;
        let forced = std::mem::take(&mut *self.forced.lock().unwrap_or_else(PoisonError::into_inner));
        let mut report = SyncReport::default();

        for registry_type in RegistryType::PROCESSING_ORDER {
            let phase = self.state(registry_type).phase;
            if from < 0 || forced.contains(&registry_type) || phase != SyncPhase::IncrementalSync {
                self.full_sync(registry_type, &mut report).await;
            } else {
                self.incremental_sync(registry_type, to, &mut report).await;
            }
        }
        report
    }

    /// Schedule a full sync of one type, or of all of them, and wake the loop.
    pub fn request_full_resync(&self, registry_type: Option<RegistryType>) {
        {
            let mut forced = self.forced.lock().unwrap_or_else(PoisonError::into_inner);
            match registry_type {
                Some(t) => {
                    forced.insert(t);
                }
                None => forced.extend(RegistryType::PROCESSING_ORDER),
            }
        }
        tracing::info!(registry_type = ?registry_type, "Full resync requested");
        self.resync.notify_one();
    }

    /// Every registry type completed at least one full sync.
    pub fn is_ready(&self) -> bool {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(|s| s.full_syncs > 0)
    }

    pub fn status(&self) -> SyncStatus {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let types = states
            .iter()
            .map(|(registry_type, s)| TypeStatus {
                registry_type: *registry_type,
                phase: s.phase,
                watermark: s.watermark,
                full_syncs: s.full_syncs,
                events_applied: s.events_applied,
                last_error: s.last_error.clone(),
            })
            .collect();
        SyncStatus {
            ready: states.values().all(|s| s.full_syncs > 0),
            source_available: self.health.is_available(),
            last_error: self.health.last_error(),
            types,
        }
    }

    /// Initial full sync, then incremental passes until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Sync engine starting");

        let report = self.synchronize(-1, i64::MAX).await;
        tracing::info!(
            full_syncs = report.full_syncs.len(),
            source_errors = report.source_errors,
            ready = self.is_ready(),
            "Initial synchronization finished"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pass().await;
                }
                _ = self.resync.notified() => {
                    self.pass().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sync engine received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn pass(&self) {
        let report = self.synchronize(0, i64::MAX).await;
        if report.events_applied > 0 || !report.full_syncs.is_empty() || report.events_failed > 0 {
            tracing::debug!(
                events_applied = report.events_applied,
                events_failed = report.events_failed,
                full_syncs = ?report.full_syncs,
                "Synchronization pass"
            );
        }
    }

    async fn full_sync(&self, registry_type: RegistryType, report: &mut SyncReport) {
        self.update(registry_type, |s| s.phase = SyncPhase::FullSync);

        match self.source.fetch_full_state(registry_type).await {
            Ok(state) => {
                self.health.mark_available();
                let count = self
                    .applier
                    .rebuild(registry_type, &state.payloads, state.latest_timestamp);
                self.update(registry_type, |s| {
                    s.phase = SyncPhase::IncrementalSync;
                    s.watermark = state.latest_timestamp;
                    s.full_syncs += 1;
                    s.last_error = None;
                });
                metrics::record_full_resync(registry_type.as_str());
                report.full_syncs.push(registry_type);
                tracing::info!(
                    registry_type = %registry_type,
                    count,
                    timestamp = state.latest_timestamp,
                    "Full sync completed"
                );
            }
            Err(error) => self.source_failed(registry_type, error, report),
        }
    }

    async fn incremental_sync(&self, registry_type: RegistryType, to: i64, report: &mut SyncReport) {
        let watermark = self.state(registry_type).watermark;
        let batch = match self.source.fetch_events(registry_type, watermark, to).await {
            Ok(batch) => {
                self.health.mark_available();
                batch
            }
            Err(error) => return self.source_failed(registry_type, error, report),
        };

        if let Err(reason) = check_sequence(registry_type, watermark, &batch) {
            tracing::warn!(
                registry_type = %registry_type,
                watermark,
                latest = batch.latest_timestamp,
                reason,
                "Event batch out of sequence, falling back to full sync"
            );
            return self.full_sync(registry_type, report).await;
        }

        let mut applied_to = watermark;
        let mut applied = 0u64;
        let mut failure: Option<SyncError> = None;

        for event in &batch.events {
            match self.apply_with_retry(event).await {
                Ok(_) => {
                    applied += 1;
                    if failure.is_none() {
                        applied_to = event.timestamp;
                    }
                }
                Err(error) => {
                    report.events_failed += 1;
                    failure.get_or_insert(error);
                }
            }
        }

        report.events_applied += applied as usize;
        let last_error = failure.as_ref().map(ToString::to_string);
        self.update(registry_type, |s| {
            s.watermark = applied_to;
            s.events_applied += applied;
            if let Some(error) = last_error {
                s.last_error = Some(error);
            }
        });

        if failure.is_some() {
            self.full_sync(registry_type, report).await;
        }
    }

    async fn apply_with_retry(&self, event: &SyncEvent) -> Result<ApplyOutcome, SyncError> {
        let registry_type = event.registry_type.as_str();
        let mut attempt = 1;
        loop {
            match self.applier.apply(event) {
                Ok(outcome) => {
                    metrics::record_sync_event(registry_type, outcome.as_str());
                    tracing::debug!(
                        registry_type,
                        id = %event.id,
                        timestamp = event.timestamp,
                        action = ?event.action,
                        outcome = outcome.as_str(),
                        "Event applied"
                    );
                    return Ok(outcome);
                }
                Err(error) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            registry_type,
                            id = %event.id,
                            timestamp = event.timestamp,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Event apply failed, retrying"
                        );
                        time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        tracing::error!(
                            registry_type,
                            id = %event.id,
                            timestamp = event.timestamp,
                            attempts = attempt,
                            error = %error,
                            "Event apply failed, attempts exhausted"
                        );
                        metrics::record_sync_event(registry_type, "failed");
                        return Err(error);
                    }
                },
            }
        }
    }

    fn source_failed(&self, registry_type: RegistryType, error: SyncError, report: &mut SyncReport) {
        self.health.mark_unavailable(&error);
        report.source_errors += 1;
        let message = error.to_string();
        self.update(registry_type, |s| s.last_error = Some(message));
    }

    fn state(&self, registry_type: RegistryType) -> TypeState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&registry_type)
            .cloned()
            .unwrap_or_default()
    }

    fn update(&self, registry_type: RegistryType, f: impl FnOnce(&mut TypeState)) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        f(states.entry(registry_type).or_default());
    }
}

/// A batch is applicable only as a whole: every event of `registry_type`,
/// contiguous from `watermark + 1`, ending at the source's latest timestamp.
fn check_sequence(registry_type: RegistryType, watermark: i64, batch: &EventBatch) -> Result<(), &'static str> {
    let mut expected = watermark + 1;
    for event in &batch.events {
        if event.registry_type != registry_type {
            return Err("foreign registry type");
        }
        if event.timestamp <= watermark {
            return Err("event at or below watermark");
        }
        if event.timestamp != expected {
            return Err("gap");
        }
        expected += 1;
    }
    if batch.latest_timestamp != expected - 1 {
        return Err("latest timestamp beyond events");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::event::{FullState, SyncAction};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Serves fixed full states and queued event batches.
    #[derive(Default)]
    struct ScriptedSource {
        states: Mutex<HashMap<RegistryType, FullState>>,
        batches: Mutex<HashMap<RegistryType, VecDeque<EventBatch>>>,
        down: AtomicBool,
        state_down: AtomicBool,
    }

    impl ScriptedSource {
        fn set_state(&self, t: RegistryType, payloads: Vec<Value>, latest_timestamp: i64) {
            self.states.lock().unwrap().insert(t, FullState { payloads, latest_timestamp });
        }

        fn push_batch(&self, t: RegistryType, events: Vec<SyncEvent>, latest_timestamp: i64) {
            self.batches
                .lock()
                .unwrap()
                .entry(t)
                .or_default()
                .push_back(EventBatch { events, latest_timestamp });
        }
    }

    #[async_trait]
    impl ControlPlaneSource for ScriptedSource {
        async fn fetch_events(&self, t: RegistryType, from: i64, _to: i64) -> Result<EventBatch, SyncError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::SourceUnavailable("connection refused".into()));
            }
            let next = self.batches.lock().unwrap().get_mut(&t).and_then(VecDeque::pop_front);
            Ok(next.unwrap_or(EventBatch {
                events: Vec::new(),
                latest_timestamp: from,
            }))
        }

        async fn fetch_full_state(&self, t: RegistryType) -> Result<FullState, SyncError> {
            if self.down.load(Ordering::SeqCst) || self.state_down.load(Ordering::SeqCst) {
                return Err(SyncError::SourceUnavailable("connection refused".into()));
            }
            Ok(self.states.lock().unwrap().get(&t).cloned().unwrap_or_default())
        }
    }

    fn api(id: &str, path: &str) -> Value {
        json!({ "id": id, "virtualHosts": [{ "path": path }] })
    }

    fn deploy(id: &str, timestamp: i64, payload: Value) -> SyncEvent {
        SyncEvent {
            registry_type: RegistryType::Api,
            action: SyncAction::Deploy,
            id: id.to_string(),
            payload: Some(payload),
            timestamp,
        }
    }

    fn engine(source: Arc<ScriptedSource>) -> (SyncEngine, Arc<Registries>) {
        let registries = Arc::new(Registries::new());
        let config = SyncConfig {
            max_apply_attempts: 2,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..SyncConfig::default()
        };
        (SyncEngine::new(source, Arc::clone(&registries), &config), registries)
    }

    fn api_status(engine: &SyncEngine) -> TypeStatus {
        engine
            .status()
            .types
            .into_iter()
            .find(|t| t.registry_type == RegistryType::Api)
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_full_sync_makes_engine_ready() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![api("a", "/a")], 3);
        let (engine, registries) = engine(Arc::clone(&source));

        assert!(!engine.is_ready());
        let report = engine.synchronize(-1, i64::MAX).await;

        assert_eq!(report.full_syncs.len(), RegistryType::PROCESSING_ORDER.len());
        assert!(engine.is_ready());
        assert!(registries.apis.contains("a"));
        let status = api_status(&engine);
        assert_eq!(status.phase, SyncPhase::IncrementalSync);
        assert_eq!(status.watermark, 3);
    }

    #[tokio::test]
    async fn test_contiguous_events_advance_watermark() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![], 6);
        let (engine, registries) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.push_batch(
            RegistryType::Api,
            vec![deploy("a", 7, api("a", "/a")), deploy("b", 8, api("b", "/b"))],
            8,
        );
        let report = engine.synchronize(0, i64::MAX).await;

        assert!(report.full_syncs.is_empty());
        assert_eq!(report.events_applied, 2);
        assert_eq!(api_status(&engine).watermark, 8);
        assert_eq!(registries.apis.len(), 2);
    }

    #[tokio::test]
    async fn test_gap_forces_full_resync_of_that_type_only() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![api("a", "/a")], 6);
        let (engine, registries) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.set_state(RegistryType::Api, vec![api("b", "/b")], 9);
        source.push_batch(
            RegistryType::Api,
            vec![
                deploy("x", 5, api("x", "/x")),
                deploy("y", 6, api("y", "/y")),
                deploy("z", 9, api("z", "/z")),
            ],
            9,
        );
        let report = engine.synchronize(0, i64::MAX).await;

        assert_eq!(report.full_syncs, vec![RegistryType::Api]);
        let status = api_status(&engine);
        assert_eq!(status.watermark, 9);
        assert_eq!(status.full_syncs, 2);
        assert!(registries.apis.contains("b"));
        assert!(!registries.apis.contains("a"));
        assert!(!registries.apis.contains("x"));
    }

    #[tokio::test]
    async fn test_gap_applies_nothing_before_full_sync() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![], 6);
        let (engine, registries) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.push_batch(
            RegistryType::Api,
            vec![
                deploy("x", 7, api("x", "/x")),
                deploy("y", 8, api("y", "/y")),
                deploy("z", 10, api("z", "/z")),
            ],
            10,
        );
        source.state_down.store(true, Ordering::SeqCst);
        let report = engine.synchronize(0, i64::MAX).await;

        assert_eq!(report.events_applied, 0);
        assert!(report.full_syncs.is_empty());
        assert!(!registries.apis.contains("x"));
        assert!(!registries.apis.contains("y"));
        assert!(!registries.apis.contains("z"));
        let status = api_status(&engine);
        assert_eq!(status.watermark, 6);
        assert_eq!(status.phase, SyncPhase::FullSync);
    }

    #[test]
    fn test_check_sequence() {
        let batch = |timestamps: &[i64], latest| EventBatch {
            events: timestamps.iter().map(|t| deploy("a", *t, api("a", "/a"))).collect(),
            latest_timestamp: latest,
        };
        assert!(check_sequence(RegistryType::Api, 6, &batch(&[7, 8], 8)).is_ok());
        assert!(check_sequence(RegistryType::Api, 6, &batch(&[], 6)).is_ok());
        assert_eq!(check_sequence(RegistryType::Api, 6, &batch(&[7, 8, 10], 10)), Err("gap"));
        assert_eq!(
            check_sequence(RegistryType::Api, 6, &batch(&[6, 7], 7)),
            Err("event at or below watermark")
        );
        assert_eq!(
            check_sequence(RegistryType::Api, 6, &batch(&[7], 9)),
            Err("latest timestamp beyond events")
        );
        assert_eq!(
            check_sequence(RegistryType::Organization, 6, &batch(&[7], 7)),
            Err("foreign registry type")
        );
    }

    #[tokio::test]
    async fn test_latest_beyond_events_is_a_gap() {
        let source = Arc::new(ScriptedSource::default());
        let (engine, _) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.set_state(RegistryType::Api, vec![], 4);
        source.push_batch(RegistryType::Api, vec![deploy("a", 1, api("a", "/a"))], 4);
        let report = engine.synchronize(0, i64::MAX).await;

        assert_eq!(report.full_syncs, vec![RegistryType::Api]);
        assert_eq!(api_status(&engine).watermark, 4);
    }

    #[tokio::test]
    async fn test_exhausted_apply_escalates_to_full_sync() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![], 6);
        let (engine, registries) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.set_state(RegistryType::Api, vec![api("c", "/c")], 8);
        source.push_batch(
            RegistryType::Api,
            vec![
                deploy("bad", 7, json!({ "id": "bad", "virtualHosts": [] })),
                deploy("c", 8, api("c", "/c")),
            ],
            8,
        );
        let report = engine.synchronize(0, i64::MAX).await;

        assert_eq!(report.events_failed, 1);
        assert_eq!(report.events_applied, 1);
        assert_eq!(report.full_syncs, vec![RegistryType::Api]);
        let status = api_status(&engine);
        assert_eq!(status.watermark, 8);
        assert_eq!(status.phase, SyncPhase::IncrementalSync);
        assert!(registries.apis.contains("c"));
    }

    #[tokio::test]
    async fn test_source_down_keeps_last_known_state() {
        let source = Arc::new(ScriptedSource::default());
        source.set_state(RegistryType::Api, vec![api("a", "/a")], 2);
        let (engine, registries) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        source.down.store(true, Ordering::SeqCst);
        let report = engine.synchronize(0, i64::MAX).await;

        assert_eq!(report.source_errors, RegistryType::PROCESSING_ORDER.len());
        assert!(!engine.health().is_available());
        assert!(registries.apis.contains("a"));
        assert_eq!(api_status(&engine).watermark, 2);
        assert!(api_status(&engine).last_error.is_some());

        source.down.store(false, Ordering::SeqCst);
        engine.synchronize(0, i64::MAX).await;
        assert!(engine.health().is_available());
    }

    #[tokio::test]
    async fn test_forced_resync_rebuilds_requested_type() {
        let source = Arc::new(ScriptedSource::default());
        let (engine, _) = engine(Arc::clone(&source));
        engine.synchronize(-1, i64::MAX).await;

        engine.request_full_resync(Some(RegistryType::Dictionary));
        let report = engine.synchronize(0, i64::MAX).await;
        assert_eq!(report.full_syncs, vec![RegistryType::Dictionary]);

        let report = engine.synchronize(0, i64::MAX).await;
        assert!(report.full_syncs.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(ScriptedSource::default());
        let (engine, _) = engine(Arc::clone(&source));
        let engine = Arc::new(engine);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(Arc::clone(&engine).run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_ready());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
