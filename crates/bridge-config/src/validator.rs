use crate::{BridgeConfig, ConfigError, Result};

/// Sanity-checks a loaded config before it is frozen and handed to the
/// lifecycle. A config that fails this never reaches the listener.
pub fn validate_config(config: &BridgeConfig) -> Result<()> {
    if config.max_concurrent_requests == 0 {
        return Err(ConfigError::ValidationError(
            "max_concurrent_requests must be at least 1".to_string(),
        ));
    }
    if config.max_requests_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "max_requests_per_minute must be at least 1".to_string(),
        ));
    }
    if config.max_request_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "max_request_bytes must be at least 1".to_string(),
        ));
    }
    if config.handler_timeout_seconds == 0 {
        return Err(ConfigError::ValidationError(
            "handler_timeout_seconds must be at least 1".to_string(),
        ));
    }
    if config.endpoint_path.is_empty() {
        return Err(ConfigError::ValidationError(
            "endpoint_path must not be empty".to_string(),
        ));
    }

    for pattern in &config.suspicious_patterns {
        regex::Regex::new(pattern).map_err(|e| {
            ConfigError::ValidationError(format!("invalid suspicious pattern {:?}: {}", pattern, e))
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = BridgeConfig::default();
        config.max_concurrent_requests = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_bad_suspicious_pattern() {
        let mut config = BridgeConfig::default();
        config.suspicious_patterns = vec!["(unclosed".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_empty_endpoint_path() {
        let mut config = BridgeConfig::default();
        config.endpoint_path = String::new();
        assert!(validate_config(&config).is_err());
    }
}
