use crate::{BridgeConfig, ConfigError, Result};
use std::path::Path;

/// Parses a YAML file into a `BridgeConfig`. Missing fields take the
/// defaults from [`BridgeConfig::default`].
pub fn parse_config(path: &Path) -> Result<BridgeConfig> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    parse_config_from_str(&content)
}

pub fn parse_config_from_str(yaml: &str) -> Result<BridgeConfig> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Loads the daemon's runtime configuration: an optional YAML file, layered
/// under environment variable overrides (the env vars win), as required by
/// the recognized-environment-variable table. Config is immutable once this
/// returns - nothing re-reads the file or environment after startup.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(p) if p.exists() => parse_config(p)?,
        _ => BridgeConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut BridgeConfig) -> Result<()> {
    if let Ok(v) = std::env::var("DAEMON_SOCKET") {
        config.endpoint_path = v;
    }
    if let Some(v) = parse_env("MAX_CONCURRENT_REQUESTS")? {
        config.max_concurrent_requests = v;
    }
    if let Some(v) = parse_env("MAX_REQUESTS_PER_MINUTE")? {
        config.max_requests_per_minute = v;
    }
    if let Some(v) = parse_env("MAX_MEMORY_MB")? {
        config.max_memory_mb = v;
    }
    if let Some(v) = parse_env("MAX_CPU_PERCENT")? {
        config.max_cpu_percent = v;
    }
    if let Some(v) = parse_bool_env("STRICT_VALIDATION")? {
        config.strict_validation = v;
    }
    if let Some(v) = parse_bool_env("DEBUG")? {
        config.debug = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv(name, raw, e.to_string())),
        Err(_) => Ok(None),
    }
}

fn parse_bool_env(name: &'static str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv(name, raw, "expected a boolean".to_string())),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
endpoint_path: /tmp/custom.sock
max_concurrent_requests: 50
"#;
        let config = parse_config_from_str(yaml).unwrap();
        assert_eq!(config.endpoint_path, "/tmp/custom.sock");
        assert_eq!(config.max_concurrent_requests, 50);
        // untouched fields keep their defaults
        assert_eq!(config.max_requests_per_minute, 2000);
    }

    #[test]
    fn rejects_invalid_yaml() {
        let yaml = "not: [valid: yaml";
        assert!(matches!(
            parse_config_from_str(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = parse_config(Path::new("/nonexistent/bridge.yaml"));
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn load_config_falls_back_to_defaults_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.endpoint_path, BridgeConfig::default().endpoint_path);
    }
}
