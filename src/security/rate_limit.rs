//! Cross-request counters for rate limiting.
//!
//! Counters live behind [`CounterStore`] so a distributed backend can replace
//! the in-memory one. `increment_and_check` is atomic per key and carries an
//! idempotency key: a retried call with the same key never counts twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result of one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one hit on `key` inside a fixed window and compare with `limit`.
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        idempotency_key: &str,
    ) -> Result<CounterDecision, CounterError>;
}

/// A fixed counting window.
struct CounterWindow {
    started: Instant,
    length: Duration,
    count: u64,
    applied: HashSet<String>,
}

impl CounterWindow {
    fn new(length: Duration) -> Self {
        Self {
            started: Instant::now(),
            length,
            count: 0,
            applied: HashSet::new(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }

    fn decision(&self, limit: u64, now: Instant) -> CounterDecision {
        CounterDecision {
            allowed: self.count <= limit,
            count: self.count,
            limit,
            remaining: limit.saturating_sub(self.count),
            reset_after: self.length.saturating_sub(now.duration_since(self.started)),
        }
    }
}

/// Process-local counter store backed by `DashMap`.
#[derive(Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, CounterWindow>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before - self.windows.len()
    }

    /// Periodically evict expired windows until shutdown.
    pub async fn run_eviction(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted expired rate-limit windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Counter eviction received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        idempotency_key: &str,
    ) -> Result<CounterDecision, CounterError> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| CounterWindow::new(window));

        if entry.is_expired(now) || entry.length != window {
            *entry = CounterWindow::new(window);
        }
        if entry.applied.insert(idempotency_key.to_string()) {
            entry.count += 1;
        }
        Ok(entry.decision(limit, now))
    }
}
