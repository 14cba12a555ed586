//! Structured logging handles. A `logger_id` names a `tracing` span scoped to
//! a caller-chosen target; emitting a record re-enters that span and fires
//! the matching `tracing` event, so host-side subscribers (see bridge-cli's
//! `tracing-subscriber` setup) see these exactly like any other event.

use crate::params::required_str;
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use serde_json::{json, Value};
use tracing::Span;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("logging", "create_logger", CreateLogger);
    catalog.register("logging", "log", Log);
    catalog.register("logging", "close_logger", CloseLogger);
}

struct Logger {
    target: String,
    span: Span,
}

struct CreateLogger;

#[async_trait]
impl ModuleHandler for CreateLogger {
    fn required_params(&self) -> &[&'static str] {
        &["target"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let target = required_str(&params, "logging", "create_logger", "target")?;
        let span = tracing::info_span!("logger", target = %target);
        let logger = Logger { target: target.to_string(), span };
        let handle = ctx.registry.put(ResourceKind::Logger, logger, PutOptions::default()).await;
        Ok(json!({ "logger_id": handle }))
    }
}

struct Log;

#[async_trait]
impl ModuleHandler for Log {
    fn required_params(&self) -> &[&'static str] {
        &["logger_id", "level", "message"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "logging", "log", "logger_id")?;
        let level = required_str(&params, "logging", "log", "level")?;
        let message = required_str(&params, "logging", "log", "message")?;
        let value = ctx.registry.get(ResourceKind::Logger, handle).await?;
        let logger = value
            .downcast::<Logger>()
            .map_err(|_| BridgeError::Internal("logger handle type mismatch".to_string()))?;
        let _entered = logger.span.enter();
        match level.to_ascii_lowercase().as_str() {
            "trace" => tracing::trace!(target = %logger.target, "{message}"),
            "debug" => tracing::debug!(target = %logger.target, "{message}"),
            "info" => tracing::info!(target = %logger.target, "{message}"),
            "warn" => tracing::warn!(target = %logger.target, "{message}"),
            "error" => tracing::error!(target = %logger.target, "{message}"),
            other => {
                return Err(BridgeError::InvalidParams(
                    "logging".to_string(),
                    "log".to_string(),
                    format!("unknown level `{other}`, expected trace|debug|info|warn|error"),
                ))
            }
        }
        Ok(json!({ "logged": true }))
    }
}

struct CloseLogger;

#[async_trait]
impl ModuleHandler for CloseLogger {
    fn required_params(&self) -> &[&'static str] {
        &["logger_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "logging", "close_logger", "logger_id")?;
        ctx.registry.delete(ResourceKind::Logger, handle).await?;
        Ok(json!({ "closed": true }))
    }
}
