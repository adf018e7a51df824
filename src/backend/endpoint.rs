//! Backend endpoints and round-robin selection.
//!
//! # Responsibilities
//! - Represent one backend target of an API
//! - Track passive health (Healthy/Unhealthy) from call outcomes
//! - Rotate through the healthy endpoints of an API
//!
//! # Design Decisions
//! - Health is lock-free: an `AtomicU8` state plus consecutive counters
//! - Unknown counts as healthy so new endpoints receive traffic
//! - When every endpoint is unhealthy the rotation still picks one, so a
//!   recovered backend is noticed without an active checker

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use crate::backend::BackendError;
use crate::definition::Endpoint;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// One backend target with its passive health state.
#[derive(Debug)]
pub struct EndpointTarget {
    pub name: String,
    pub base_url: Url,
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl EndpointTarget {
    pub fn parse(endpoint: &Endpoint) -> Result<Self, BackendError> {
        let base_url = Url::parse(&endpoint.target).map_err(|e| BackendError::InvalidTarget {
            target: endpoint.target.clone(),
            reason: e.to_string(),
        })?;
        if base_url.scheme() != "http" {
            return Err(BackendError::InvalidTarget {
                target: endpoint.target.clone(),
                reason: format!("unsupported scheme {}", base_url.scheme()),
            });
        }
        Ok(Self {
            name: endpoint.name.clone(),
            base_url,
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        })
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Target URL for a request: base path, then `path_info`, then the query.
    pub fn upstream_url(&self, path_info: &str, query: Option<&str>) -> String {
        let mut url = self.base_url.as_str().trim_end_matches('/').to_string();
        if !path_info.starts_with('/') {
            url.push('/');
        }
        url.push_str(path_info);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub fn mark_success(&self, healthy_threshold: usize) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Healthy {
            return;
        }
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            tracing::info!(endpoint = %self.name, "Endpoint marked healthy");
        }
    }

    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Unhealthy {
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            tracing::warn!(endpoint = %self.name, failures, "Endpoint marked unhealthy");
        }
    }
}

/// The endpoints of one deployed API version.
#[derive(Debug)]
pub struct EndpointGroup {
    deployed_at: i64,
    endpoints: Vec<Arc<EndpointTarget>>,
    counter: AtomicUsize,
}

impl EndpointGroup {
    pub fn new(deployed_at: i64, endpoints: &[Endpoint]) -> Result<Self, BackendError> {
        let endpoints = endpoints
            .iter()
            .map(|e| EndpointTarget::parse(e).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            deployed_at,
            endpoints,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn deployed_at(&self) -> i64 {
        self.deployed_at
    }

    pub fn endpoints(&self) -> &[Arc<EndpointTarget>] {
        &self.endpoints
    }

    /// Next healthy endpoint in rotation, falling back to the next one at all.
    pub fn next(&self) -> Option<Arc<EndpointTarget>> {
        if self.endpoints.is_empty() {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = self.endpoints.len();
        (0..len)
            .map(|i| &self.endpoints[(start + i) % len])
            .find(|endpoint| endpoint.is_healthy())
            .or_else(|| self.endpoints.get(start % len))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, target: &str) -> Endpoint {
        Endpoint {
            name: name.into(),
            target: target.into(),
        }
    }

    #[test]
    fn test_round_robin_skips_unhealthy() {
        let group = EndpointGroup::new(
            1,
            &[endpoint("a", "http://127.0.0.1:8080"), endpoint("b", "http://127.0.0.1:8081")],
        )
        .unwrap();

        assert_eq!(group.next().unwrap().name, "a");
        assert_eq!(group.next().unwrap().name, "b");
        assert_eq!(group.next().unwrap().name, "a");

        group.endpoints()[0].mark_failure(1);
        for _ in 0..3 {
            assert_eq!(group.next().unwrap().name, "b");
        }
    }

    #[test]
    fn test_health_transitions() {
        let target = EndpointTarget::parse(&endpoint("a", "http://localhost:1")).unwrap();
        assert_eq!(target.state(), HealthState::Unknown);
        target.mark_failure(2);
        assert!(target.is_healthy());
        target.mark_failure(2);
        assert_eq!(target.state(), HealthState::Unhealthy);
        target.mark_success(2);
        assert!(!target.is_healthy());
        target.mark_success(2);
        assert_eq!(target.state(), HealthState::Healthy);
    }

    #[test]
    fn test_upstream_url() {
        let target = EndpointTarget::parse(&endpoint("a", "http://backend:8080/api/")).unwrap();
        assert_eq!(target.upstream_url("/users", Some("page=2")), "http://backend:8080/api/users?page=2");
        assert_eq!(target.upstream_url("/", None), "http://backend:8080/api/");

        let root = EndpointTarget::parse(&endpoint("r", "http://backend:8080")).unwrap();
        assert_eq!(root.upstream_url("/x", Some("")), "http://backend:8080/x");
    }

    #[test]
    fn test_invalid_target() {
        assert!(EndpointTarget::parse(&endpoint("bad", "not a url")).is_err());
        assert!(EndpointTarget::parse(&endpoint("ftp", "ftp://host/")).is_err());
    }
}
