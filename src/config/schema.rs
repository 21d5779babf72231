//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for both process modes.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Line server settings (listener, worker pool, sessions).
    pub server: ServerConfig,

    /// Relay client settings (feed subscription, upstream link).
    pub client: ClientConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Line server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Number of long-lived workers; the only bound on concurrent sessions.
    pub worker_pool_size: usize,

    /// Capacity of the pending connection queue.
    pub queue_capacity: usize,

    /// Idle deadline applied before every read, in seconds.
    pub idle_timeout_secs: u64,

    /// Longest accepted line in bytes, excluding the delimiter. 0 disables the bound.
    pub max_line_bytes: usize,

    /// PEM files for the server identity. A self-signed identity is generated when absent.
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            worker_pool_size: 10,
            queue_capacity: 10,
            idle_timeout_secs: 30,
            max_line_bytes: 64 * 1024,
            tls: None,
        }
    }
}

/// TLS identity files for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Relay client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upstream address (e.g., "10.0.0.5:8443").
    pub upstream_address: String,

    /// Name presented in the TLS handshake.
    pub server_name: String,

    /// Local feed endpoint (e.g., "ipc:///temperature").
    pub subscribe_endpoint: String,

    /// Upper bound on TCP connect plus TLS handshake, in seconds.
    pub dial_timeout_secs: u64,

    /// Pause between a completed handshake and the first write, in milliseconds.
    pub settle_ms: u64,

    /// Upper bound on writing one message upstream, in seconds.
    pub write_timeout_secs: u64,

    /// Capacity of the relay buffer between the feed and the upstream link.
    pub relay_capacity: usize,

    /// Pause after a failed feed receive, in milliseconds.
    pub receive_backoff_ms: u64,

    /// Re-establish the feed subscription after a receive error.
    pub redial_on_receive_error: bool,

    /// Backoff between failed upstream dials.
    pub reconnect: BackoffConfig,
}

impl ClientConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn receive_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_backoff_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            upstream_address: "127.0.0.1:8443".to_string(),
            server_name: "localhost".to_string(),
            subscribe_endpoint: "ipc:///temperature".to_string(),
            dial_timeout_secs: 5,
            settle_ms: 1000,
            write_timeout_secs: 10,
            relay_capacity: 1024,
            receive_backoff_ms: 1000,
            redial_on_receive_error: false,
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Ceiling for the delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
