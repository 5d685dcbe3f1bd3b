use crate::application::config::models::ServerConfig;
use crate::application::config::parser::{parse_config, parse_config_file};
use crate::application::config::validator::validate_config;
use crate::common::error::Result;

/// Load and validate configuration from file
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    pub fn load(path: &str) -> Result<ServerConfig> {
        let config = parse_config_file(path)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from string (useful for testing)
    pub fn load_from_str(content: &str) -> Result<ServerConfig> {
        let config = parse_config(content)?;
        validate_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rejects_zero_workers() {
        let toml = r#"
            name = "echo"
            address = "127.0.0.1:9000"
            worker_count = 0
        "#;

        // Parses fine, fails validation.
        let result = ConfigLoader::load_from_str(toml);
        assert!(result.is_err());
    }
}
