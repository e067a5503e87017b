//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::ServerAddress;

/// Root configuration for the client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Candidate servers, tried in order.
    pub servers: Vec<ServerAddress>,

    /// Inbound decode queue settings.
    pub decode: DecodeConfig,

    /// Authentication handshake settings.
    pub sso: SsoConfig,

    /// Keep-alive settings for the `Ok` state.
    pub heartbeat: HeartbeatConfig,

    /// Retry budget and reconnect backoff.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Decode pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Raw packets buffered before producers are back-pressured.
    pub queue_capacity: usize,

    /// Largest frame the TCP transport accepts, in bytes.
    pub max_frame_length: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_frame_length: 8 * 1024 * 1024,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Verification challenges answered before the login is abandoned.
    pub max_verification_rounds: u32,

    /// How long each login request waits for its response, in seconds.
    pub response_timeout_secs: u64,
}

impl SsoConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            max_verification_rounds: 5,
            response_timeout_secs: 10,
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Send heartbeats while connected.
    pub enabled: bool,

    /// Seconds between heartbeats.
    pub interval_secs: u64,

    /// Seconds to wait for each heartbeat reply.
    pub timeout_secs: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 5,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Size of the shared retry budget.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json: bool,

    /// Expose a Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}
