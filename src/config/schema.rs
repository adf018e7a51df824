//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Request, cleanup and grace timeouts.
    pub timeouts: TimeoutConfig,

    /// Backend connector settings.
    pub backend: BackendConfig,

    /// Control plane synchronization.
    pub sync: SyncConfig,

    /// Counter store used by rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Introspection surface.
    pub admin: AdminConfig,

    /// Graceful shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8082").
    pub bind_address: String,

    /// Maximum buffered request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8082".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for the request lifecycle.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for the request phase including the backend call. 0 disables it.
    pub request_ms: u64,

    /// Upper bound on response-phase cleanup after cancellation or timeout.
    pub cleanup_ms: u64,

    /// Extra time granted to in-flight requests when shutting down.
    pub grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            cleanup_ms: 2_000,
            grace_ms: 1_000,
        }
    }
}

/// Backend connector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Whole backend exchange timeout in milliseconds.
    pub read_timeout_ms: u64,

    /// Maximum buffered backend response size in bytes.
    pub max_response_bytes: usize,

    /// Consecutive failures before an endpoint is skipped.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before an endpoint is used again.
    pub healthy_threshold: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            max_response_bytes: 10 * 1024 * 1024,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Control plane synchronization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable the synchronization loop.
    pub enabled: bool,

    /// Base URL of the control plane sync API.
    pub control_plane_url: String,

    /// Optional bearer token sent to the control plane.
    pub token: Option<String>,

    /// Delay between two synchronization passes in milliseconds.
    pub interval_ms: u64,

    /// Timeout of a single control plane call in milliseconds.
    pub request_timeout_ms: u64,

    /// Attempts per event before the registry type falls back to a full sync.
    pub max_apply_attempts: u32,

    /// Base delay for apply retries in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Cap on the apply retry delay in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Sharding tags this node deploys. Empty deploys everything; `!tag` excludes.
    pub sharding_tags: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            control_plane_url: "http://localhost:8083".to_string(),
            token: None,
            interval_ms: 5_000,
            request_timeout_ms: 10_000,
            max_apply_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            sharding_tags: Vec::new(),
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Attempts for a counter call before the rate-limit policy fails.
    pub store_attempts: u32,

    /// Interval at which expired counter windows are evicted, in seconds.
    pub eviction_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            store_attempts: 2,
            eviction_interval_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "api_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Introspection surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:18082".to_string(),
            api_key: "admin-secret-key".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests before exiting.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 15_000,
        }
    }
}
