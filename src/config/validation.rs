//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (pool sizes > 0, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is not a socket address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("client.reconnect.base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "server.bind_address", &config.server.bind_address);
    check_nonzero(&mut errors, "server.worker_pool_size", config.server.worker_pool_size as u64);
    check_nonzero(&mut errors, "server.queue_capacity", config.server.queue_capacity as u64);
    check_nonzero(&mut errors, "server.idle_timeout_secs", config.server.idle_timeout_secs);

    let client = &config.client;
    // Upstream may be a host name, so only the port separator is checked.
    if client.upstream_address.rsplit_once(':').is_none() {
        errors.push(ValidationError::InvalidAddress {
            field: "client.upstream_address",
            value: client.upstream_address.clone(),
        });
    }
    if client.server_name.is_empty() {
        errors.push(ValidationError::Empty { field: "client.server_name" });
    }
    if client.subscribe_endpoint.is_empty() {
        errors.push(ValidationError::Empty { field: "client.subscribe_endpoint" });
    }
    check_nonzero(&mut errors, "client.dial_timeout_secs", client.dial_timeout_secs);
    check_nonzero(&mut errors, "client.write_timeout_secs", client.write_timeout_secs);
    check_nonzero(&mut errors, "client.relay_capacity", client.relay_capacity as u64);
    if client.reconnect.base_delay_ms > client.reconnect.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: client.reconnect.base_delay_ms,
            max: client.reconnect.max_delay_ms,
        });
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
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

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}
