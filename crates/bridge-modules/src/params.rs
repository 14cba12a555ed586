//! Small helpers for pulling typed fields out of a handler's `params`
//! object. Handlers return `invalid_params` (via `BridgeError::InvalidParams`)
//! rather than panicking on a missing or mistyped field.

use bridge_core::BridgeError;
use serde_json::Value;

pub fn required_str<'a>(
    params: &'a Value,
    module: &str,
    function: &str,
    key: &str,
) -> Result<&'a str, BridgeError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(module, function, key))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub fn required_u64(
    params: &Value,
    module: &str,
    function: &str,
    key: &str,
) -> Result<u64, BridgeError> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(module, function, key))
}

pub fn optional_u64(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

pub fn required_i64(
    params: &Value,
    module: &str,
    function: &str,
    key: &str,
) -> Result<i64, BridgeError> {
    params
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing(module, function, key))
}

fn missing(module: &str, function: &str, key: &str) -> BridgeError {
    BridgeError::InvalidParams(
        module.to_string(),
        function.to_string(),
        format!("missing or mistyped required param `{}`", key),
    )
}
