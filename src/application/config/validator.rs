use crate::application::config::models::ServerConfig;
use crate::common::constants::{MAX_WORKERS, VALID_LOG_LEVELS};
use crate::common::error::{Result, ServerError};

/// Validate configuration for correctness and consistency
pub fn validate_config(config: &ServerConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(ServerError::ConfigError(
            "name cannot be empty".to_string(),
        ));
    }

    // The name is a prefix of every connection name.
    if config.name.chars().any(char::is_whitespace) {
        return Err(ServerError::ConfigError(format!(
            "name '{}' cannot contain whitespace",
            config.name
        )));
    }

    // With no workers every accepted connection would be dropped.
    if config.worker_count == 0 {
        return Err(ServerError::ConfigError(
            "worker_count must be greater than 0".to_string(),
        ));
    }

    if config.worker_count > MAX_WORKERS {
        return Err(ServerError::ConfigError(format!(
            "worker_count {} exceeds the maximum of {}",
            config.worker_count, MAX_WORKERS
        )));
    }

    if config.poll_timeout_ms <= 0 {
        return Err(ServerError::ConfigError(
            "poll_timeout_ms must be greater than 0".to_string(),
        ));
    }

    if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
        return Err(ServerError::ConfigError(format!(
            "Invalid log_level '{}'. Valid levels are: {}",
            config.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }

    Ok(())
}
