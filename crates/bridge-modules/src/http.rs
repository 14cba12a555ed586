//! HTTP client sessions. Grounded on the teacher's own `reqwest` dependency,
//! generalized from a one-shot call into a registry-held session handle so
//! cookies/headers persist across calls the way a Perl `LWP::UserAgent`
//! object would.

use crate::params::{optional_str, required_str};
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use reqwest::Client;
use serde_json::{json, Value};

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("http", "create_session", CreateSession);
    catalog.register("http", "request", Request);
    catalog.register("http", "close_session", CloseSession);
}

struct CreateSession;

#[async_trait]
impl ModuleHandler for CreateSession {
    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let timeout_secs = params.get("timeout_seconds").and_then(Value::as_u64).unwrap_or(30);
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BridgeError::Handler(format!("failed to build http client: {e}")))?;
        let handle = ctx
            .registry
            .put(ResourceKind::HttpSession, client, PutOptions::default())
            .await;
        Ok(json!({ "session_id": handle }))
    }
}

struct Request;

#[async_trait]
impl ModuleHandler for Request {
    fn required_params(&self) -> &[&'static str] {
        &["session_id", "method", "url"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "http", "request", "session_id")?;
        let method = required_str(&params, "http", "request", "method")?;
        let url = required_str(&params, "http", "request", "url")?;
        let body = optional_str(&params, "body").map(|s| s.to_string());

        let value = ctx.registry.get(ResourceKind::HttpSession, handle).await?;
        let client = value
            .downcast::<Client>()
            .map_err(|_| BridgeError::Internal("http session handle type mismatch".to_string()))?;

        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| BridgeError::InvalidParams("http".to_string(), "request".to_string(), "unsupported method".to_string()))?;

        let mut builder = client.request(method, url);
        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    builder = builder.header(k, v);
                }
            }
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let resp = tokio::select! {
            result = builder.send() => result.map_err(|e| BridgeError::Handler(format!("http request failed: {e}")))?,
            _ = ctx.cancel.cancelled() => return Err(BridgeError::Timeout(0)),
        };

        let status = resp.status().as_u16();
        let headers: serde_json::Map<String, Value> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), json!(v))))
            .collect();
        let text = resp
            .text()
            .await
            .map_err(|e| BridgeError::Handler(format!("failed to read response body: {e}")))?;

        Ok(json!({ "status": status, "headers": headers, "body": text }))
    }
}

struct CloseSession;

#[async_trait]
impl ModuleHandler for CloseSession {
    fn required_params(&self) -> &[&'static str] {
        &["session_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "http", "close_session", "session_id")?;
        ctx.registry.delete(ResourceKind::HttpSession, handle).await?;
        Ok(json!({ "closed": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_config::BridgeConfig;
    use bridge_core::clock::SystemClock;
    use bridge_core::registry::ResourceRegistry;
    use std::sync::Arc;

    fn ctx() -> HandlerContext {
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        HandlerContext::new(Arc::new(ResourceRegistry::new(&config, clock.clone())), config, clock)
    }

    #[tokio::test]
    async fn create_and_close_session_round_trip() {
        let ctx = ctx();
        let created = CreateSession.handle(json!({}), &ctx).await.unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();
        assert!(session_id.starts_with("http_session_"));

        CloseSession.handle(json!({"session_id": session_id}), &ctx).await.unwrap();
        let err = ctx.registry.get(ResourceKind::HttpSession, &session_id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_handle");
    }

    #[tokio::test]
    async fn request_against_an_unknown_session_is_invalid_handle() {
        let ctx = ctx();
        let err = Request
            .handle(
                json!({"session_id": "http_session_deadbeef", "method": "GET", "url": "http://example.invalid"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_handle");
    }
}
