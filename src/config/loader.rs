//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    load_config_str(&content)
}

/// Parse and validate configuration held in memory.
pub fn load_config_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::debug!(servers = config.servers.len(), "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = load_config_str(
            r#"
            [[servers]]
            host = "msg.example.net"
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].port, 8080);
        assert_eq!(config.decode.queue_capacity, 256);
        assert_eq!(config.sso.max_verification_rounds, 5);
        assert!(config.heartbeat.enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let config = load_config_str(
            r#"
            [[servers]]
            host = "a.example.net"
            port = 80

            [[servers]]
            host = "b.example.net"
            port = 443

            [heartbeat]
            interval_secs = 30
            timeout_secs = 3

            [retries]
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.servers[1].host, "b.example.net");
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.retries.max_attempts, 2);
        assert_eq!(config.retries.base_delay_ms, 500);
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let err = load_config_str("servers = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_config_fails_validation() {
        let err = load_config_str("").unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors[0].field, "servers"),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/im-link.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
