//! Ordered admission checks applied to every incoming request, before the
//! throttle gates and before any handler runs. Rejections here are
//! terminal and never reach a handler.

use crate::catalog::ModuleCatalog;
use crate::envelope::RequestEnvelope;
use crate::error::BridgeError;
use bridge_config::BridgeConfig;
use regex::Regex;
use serde_json::Value;

pub struct Validator {
    config: std::sync::Arc<BridgeConfig>,
    suspicious: Vec<Regex>,
}

impl Validator {
    pub fn new(config: std::sync::Arc<BridgeConfig>) -> Self {
        let suspicious = config
            .suspicious_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Validator { config, suspicious }
    }

    /// Runs every check in order, short-circuiting on the first failure.
    /// `raw_len` is the size of the not-yet-decoded request body.
    pub fn validate_size(&self, raw_len: usize) -> Result<(), BridgeError> {
        if raw_len > self.config.max_request_bytes {
            return Err(BridgeError::PayloadTooLarge(raw_len, self.config.max_request_bytes));
        }
        Ok(())
    }

    pub fn validate_shape(&self, env: &RequestEnvelope) -> Result<(), BridgeError> {
        if env.module.is_empty() {
            return Err(BridgeError::InvalidEnvelope("module must not be empty".to_string()));
        }
        if env.function.is_empty() {
            return Err(BridgeError::InvalidEnvelope("function must not be empty".to_string()));
        }
        if !env.params.is_object() && !env.params.is_null() {
            return Err(BridgeError::InvalidEnvelope("params must be an object".to_string()));
        }
        Ok(())
    }

    pub fn validate_catalog_membership(
        &self,
        env: &RequestEnvelope,
        catalog: &ModuleCatalog,
    ) -> Result<(), BridgeError> {
        // system/test introspection bypasses pattern screening further down
        // but still needs to exist in the catalog like everything else.
        if !catalog.contains(&env.module, &env.function) {
            return Err(BridgeError::UnknownHandler(env.module.clone(), env.function.clone()));
        }
        Ok(())
    }

    /// String-valued fields in `params` are scanned against the configured
    /// refusal patterns when `strict_validation` is on. `system`/`test`
    /// handlers bypass this check per spec.
    pub fn validate_suspicious_input(&self, env: &RequestEnvelope) -> Result<(), BridgeError> {
        if !self.config.strict_validation {
            return Ok(());
        }
        if env.module == "system" || env.module == "test" {
            return Ok(());
        }
        self.scan_value(&env.params)
    }

    fn scan_value(&self, value: &Value) -> Result<(), BridgeError> {
        match value {
            Value::String(s) => {
                for pattern in &self.suspicious {
                    if pattern.is_match(s) {
                        return Err(BridgeError::SuspiciousInput(pattern.as_str().to_string()));
                    }
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    self.scan_value(item)?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for v in map.values() {
                    self.scan_value(v)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn validate_required_params(
        &self,
        env: &RequestEnvelope,
        required: &[&'static str],
    ) -> Result<(), BridgeError> {
        let obj = env.params.as_object();
        for key in required {
            let present = obj.map(|o| o.contains_key(*key)).unwrap_or(false);
            if !present {
                return Err(BridgeError::InvalidParams(
                    env.module.clone(),
                    env.function.clone(),
                    format!("missing required param `{}`", key),
                ));
            }
        }
        Ok(())
    }
}
