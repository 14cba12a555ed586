//! Date/time utilities. Pure functions over `chrono` types — no resource
//! handle is minted since nothing here needs to outlive a single call.

use async_trait::async_trait;
use bridge_core::{BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("datetime", "now", Now);
    catalog.register("datetime", "parse", Parse);
    catalog.register("datetime", "format", Format);
    catalog.register("datetime", "add", Add);
    catalog.register("datetime", "diff", Diff);
}

const FALLBACK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

fn parse_input(text: &str) -> Result<NaiveDateTime, BridgeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, FALLBACK_FORMAT) {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).expect("midnight is always valid"));
    }
    Err(BridgeError::InvalidParams(
        "datetime".to_string(),
        "parse".to_string(),
        format!("could not parse `{text}` as RFC 3339, `{FALLBACK_FORMAT}`, or `%Y-%m-%d`"),
    ))
}

struct Now;

#[async_trait]
impl ModuleHandler for Now {
    async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let now = Utc::now();
        Ok(json!({
            "iso8601": now.to_rfc3339(),
            "unix_seconds": now.timestamp(),
        }))
    }
}

struct Parse;

#[async_trait]
impl ModuleHandler for Parse {
    fn required_params(&self) -> &[&'static str] {
        &["value"]
    }

    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let text = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "parse".to_string(), "`value` is required".to_string()))?;
        let parsed = parse_input(text)?;
        Ok(json!({
            "iso8601": parsed.and_utc().to_rfc3339(),
            "unix_seconds": parsed.and_utc().timestamp(),
            "year": parsed.year(),
            "month": parsed.month(),
            "day": parsed.day(),
        }))
    }
}

struct Format;

#[async_trait]
impl ModuleHandler for Format {
    fn required_params(&self) -> &[&'static str] {
        &["value", "pattern"]
    }

    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let text = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "format".to_string(), "`value` is required".to_string()))?;
        let pattern = params
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "format".to_string(), "`pattern` is required".to_string()))?;
        let parsed = parse_input(text)?;
        Ok(json!({ "formatted": parsed.format(pattern).to_string() }))
    }
}

struct Add;

#[async_trait]
impl ModuleHandler for Add {
    fn required_params(&self) -> &[&'static str] {
        &["value", "seconds"]
    }

    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let text = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "add".to_string(), "`value` is required".to_string()))?;
        let seconds = params
            .get("seconds")
            .and_then(Value::as_i64)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "add".to_string(), "`seconds` must be an integer".to_string()))?;
        let parsed = parse_input(text)?;
        let shifted = parsed + Duration::seconds(seconds);
        Ok(json!({ "iso8601": shifted.and_utc().to_rfc3339() }))
    }
}

struct Diff;

#[async_trait]
impl ModuleHandler for Diff {
    fn required_params(&self) -> &[&'static str] {
        &["from", "to"]
    }

    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let from = params
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "diff".to_string(), "`from` is required".to_string()))?;
        let to = params
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("datetime".to_string(), "diff".to_string(), "`to` is required".to_string()))?;
        let from = parse_input(from)?;
        let to = parse_input(to)?;
        Ok(json!({ "seconds": (to - from).num_seconds() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HandlerContext {
        use bridge_config::BridgeConfig;
        use bridge_core::clock::SystemClock;
        use bridge_core::registry::ResourceRegistry;
        use std::sync::Arc;
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        HandlerContext::new(Arc::new(ResourceRegistry::new(&config, clock.clone())), config, clock)
    }

    #[tokio::test]
    async fn parse_accepts_plain_date() {
        let result = Parse.handle(json!({"value": "2024-01-15"}), &ctx()).await.unwrap();
        assert_eq!(result["year"], 2024);
        assert_eq!(result["month"], 1);
        assert_eq!(result["day"], 15);
    }

    #[tokio::test]
    async fn add_shifts_forward_by_seconds() {
        let result = Add
            .handle(json!({"value": "2024-01-01T00:00:00Z", "seconds": 3600}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["iso8601"], "2024-01-01T01:00:00+00:00");
    }

    #[tokio::test]
    async fn diff_computes_seconds_between_two_instants() {
        let result = Diff
            .handle(json!({"from": "2024-01-01T00:00:00Z", "to": "2024-01-01T00:01:00Z"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["seconds"], 60);
    }

    #[tokio::test]
    async fn unparseable_value_is_invalid_params() {
        let err = Parse.handle(json!({"value": "not-a-date"}), &ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_params");
    }
}
