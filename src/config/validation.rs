//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, ports valid, timeouts ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ClientConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.servers.is_empty() {
        errors.push(ValidationError::new("servers", "at least one server is required"));
    }
    for (i, server) in config.servers.iter().enumerate() {
        if server.host.trim().is_empty() {
            errors.push(ValidationError::new(format!("servers[{i}].host"), "must not be empty"));
        }
        if server.port == 0 {
            errors.push(ValidationError::new(format!("servers[{i}].port"), "must not be 0"));
        }
    }

    if config.decode.queue_capacity == 0 {
        errors.push(ValidationError::new("decode.queue_capacity", "must be greater than 0"));
    }
    if config.decode.max_frame_length < 16 {
        errors.push(ValidationError::new(
            "decode.max_frame_length",
            "must be at least 16 bytes",
        ));
    }

    if config.sso.response_timeout_secs == 0 {
        errors.push(ValidationError::new("sso.response_timeout_secs", "must be greater than 0"));
    }

    let heartbeat = &config.heartbeat;
    if heartbeat.enabled {
        if heartbeat.interval_secs == 0 {
            errors.push(ValidationError::new("heartbeat.interval_secs", "must be greater than 0"));
        }
        if heartbeat.timeout_secs == 0 {
            errors.push(ValidationError::new("heartbeat.timeout_secs", "must be greater than 0"));
        } else if heartbeat.timeout_secs >= heartbeat.interval_secs {
            errors.push(ValidationError::new(
                "heartbeat.timeout_secs",
                "must be shorter than heartbeat.interval_secs",
            ));
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", observability.log_level),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address like 127.0.0.1:9091",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
