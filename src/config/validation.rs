//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, attempts ≥ 1)
//! - Check addresses and URLs parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: invalid url {value:?}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field}: must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("sync.sharding_tags: empty tag")]
    EmptyShardingTag,

    #[error("admin.api_key: must not be empty when admin is enabled")]
    MissingAdminKey,
}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );
    check_positive(&mut errors, "listener.max_body_bytes", config.listener.max_body_bytes as u64);
    check_positive(&mut errors, "timeouts.cleanup_ms", config.timeouts.cleanup_ms);
    check_positive(&mut errors, "backend.connect_timeout_ms", config.backend.connect_timeout_ms);
    check_positive(&mut errors, "backend.read_timeout_ms", config.backend.read_timeout_ms);
    check_positive(
        &mut errors,
        "backend.unhealthy_threshold",
        config.backend.unhealthy_threshold as u64,
    );
    check_positive(
        &mut errors,
        "backend.healthy_threshold",
        config.backend.healthy_threshold as u64,
    );
    check_positive(&mut errors, "rate_limit.store_attempts", config.rate_limit.store_attempts as u64);

    if config.sync.enabled {
        if url::Url::parse(&config.sync.control_plane_url).is_err() {
            errors.push(ValidationError::InvalidUrl {
                field: "sync.control_plane_url",
                value: config.sync.control_plane_url.clone(),
            });
        }
        check_positive(&mut errors, "sync.interval_ms", config.sync.interval_ms);
        check_positive(&mut errors, "sync.request_timeout_ms", config.sync.request_timeout_ms);
    }
    check_positive(&mut errors, "sync.max_apply_attempts", config.sync.max_apply_attempts as u64);

    if config
        .sync
        .sharding_tags
        .iter()
        .any(|tag| tag.trim_start_matches('!').trim().is_empty())
    {
        errors.push(ValidationError::EmptyShardingTag);
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::MustBePositive { field });
    }
}
