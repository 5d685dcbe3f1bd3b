use crate::application::config::models::ServerConfig;
use crate::common::error::{Result, ServerError};
use std::fs;

/// Parse configuration from TOML file
pub fn parse_config_file(path: &str) -> Result<ServerConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        ServerError::ConfigError(format!("Failed to read config file '{}': {}", path, e))
    })?;

    parse_config(&content)
}

/// Parse configuration from TOML string
pub fn parse_config(content: &str) -> Result<ServerConfig> {
    toml::from_str(content).map_err(|e| {
        ServerError::ConfigError(format!("Failed to parse TOML config: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            name = "echo"
            address = "127.0.0.1:9000"
            worker_count = 4
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.name, "echo");
        assert_eq!(config.address.port(), 9000);
        assert_eq!(config.worker_count, 4);
        assert!(config.tcp_no_delay);
        assert_eq!(config.poll_timeout_ms, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
            name = "echo"
            address = "[::1]:7000"
            worker_count = 2
            tcp_no_delay = false
            poll_timeout_ms = 250
            log_level = "debug"
        "#;

        let config = parse_config(toml).unwrap();
        assert!(config.address.is_ipv6());
        assert!(!config.tcp_no_delay);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_missing_worker_count_is_error() {
        let toml = r#"
            name = "echo"
            address = "127.0.0.1:9000"
        "#;
        assert!(matches!(parse_config(toml), Err(ServerError::ConfigError(_))));
    }
}
