//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load and validate configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
clients:
  - name: ssh
    listen: "127.0.0.1:2222"
    tunnel: "wss://bridge.example.com/10.0.0.5:22"

servers:
  - name: edge
    listen: "0.0.0.0:8080"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.clients.len(), 1);
        assert_eq!(config.servers.len(), 1);
    }

    #[test]
    fn test_validation_failure_reported() {
        let result = parse_config("global:\n  log_level: info\n");
        match result {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains("at least one client or server"))
            }
            other => panic!("expected validation error, got: {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(result.is_err());
    }
}
