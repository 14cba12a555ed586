//! SMTP message composition. Per SPEC_FULL.md this module is
//! composition-only: it builds and validates an RFC 5322-shaped message
//! held behind an `smtp_session` handle, but never opens a network
//! connection — there is no grounded SMTP transport crate in the reference
//! pack, and the spec's core does not require one.

use crate::params::{optional_str, required_str};
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use serde_json::{json, Value};
use std::sync::Mutex as StdMutex;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("smtp", "create_session", CreateSession);
    catalog.register("smtp", "set_header", SetHeader);
    catalog.register("smtp", "set_body", SetBody);
    catalog.register("smtp", "render", Render);
    catalog.register("smtp", "close_session", CloseSession);
}

#[derive(Default)]
struct Message {
    headers: Vec<(String, String)>,
    body: String,
}

struct CreateSession;

#[async_trait]
impl ModuleHandler for CreateSession {
    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let mut message = Message::default();
        if let Some(from) = optional_str(&params, "from") {
            message.headers.push(("From".to_string(), from.to_string()));
        }
        if let Some(to) = optional_str(&params, "to") {
            message.headers.push(("To".to_string(), to.to_string()));
        }
        if let Some(subject) = optional_str(&params, "subject") {
            message.headers.push(("Subject".to_string(), subject.to_string()));
        }
        let handle = ctx
            .registry
            .put(ResourceKind::SmtpSession, StdMutex::new(message), PutOptions::default())
            .await;
        Ok(json!({ "session_id": handle }))
    }
}

struct SetHeader;

#[async_trait]
impl ModuleHandler for SetHeader {
    fn required_params(&self) -> &[&'static str] {
        &["session_id", "name", "value"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "smtp", "set_header", "session_id")?;
        let name = required_str(&params, "smtp", "set_header", "name")?;
        let value = required_str(&params, "smtp", "set_header", "value")?;
        let stored = ctx.registry.get(ResourceKind::SmtpSession, handle).await?;
        let message = stored
            .downcast::<StdMutex<Message>>()
            .map_err(|_| BridgeError::Internal("smtp session handle type mismatch".to_string()))?;
        message.lock().unwrap().headers.push((name.to_string(), value.to_string()));
        Ok(json!({ "set": true }))
    }
}

struct SetBody;

#[async_trait]
impl ModuleHandler for SetBody {
    fn required_params(&self) -> &[&'static str] {
        &["session_id", "body"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "smtp", "set_body", "session_id")?;
        let body = required_str(&params, "smtp", "set_body", "body")?;
        let stored = ctx.registry.get(ResourceKind::SmtpSession, handle).await?;
        let message = stored
            .downcast::<StdMutex<Message>>()
            .map_err(|_| BridgeError::Internal("smtp session handle type mismatch".to_string()))?;
        message.lock().unwrap().body = body.to_string();
        Ok(json!({ "set": true }))
    }
}

struct Render;

#[async_trait]
impl ModuleHandler for Render {
    fn required_params(&self) -> &[&'static str] {
        &["session_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "smtp", "render", "session_id")?;
        let stored = ctx.registry.get(ResourceKind::SmtpSession, handle).await?;
        let message = stored
            .downcast::<StdMutex<Message>>()
            .map_err(|_| BridgeError::Internal("smtp session handle type mismatch".to_string()))?;
        let message = message.lock().unwrap();
        if !message.headers.iter().any(|(k, _)| k == "From") || !message.headers.iter().any(|(k, _)| k == "To") {
            return Err(BridgeError::Handler("message is missing a From or To header".to_string()));
        }
        let mut rendered = String::new();
        for (name, value) in &message.headers {
            rendered.push_str(&format!("{name}: {value}\r\n"));
        }
        rendered.push_str("\r\n");
        rendered.push_str(&message.body);
        Ok(json!({ "rendered": rendered }))
    }
}

struct CloseSession;

#[async_trait]
impl ModuleHandler for CloseSession {
    fn required_params(&self) -> &[&'static str] {
        &["session_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "smtp", "close_session", "session_id")?;
        ctx.registry.delete(ResourceKind::SmtpSession, handle).await?;
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
    async fn renders_a_complete_message() {
        let ctx = ctx();
        let created = CreateSession
            .handle(json!({"from": "a@example.com", "to": "b@example.com", "subject": "hi"}), &ctx)
            .await
            .unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();

        SetBody.handle(json!({"session_id": session_id, "body": "hello"}), &ctx).await.unwrap();
        let rendered = Render.handle(json!({"session_id": session_id}), &ctx).await.unwrap();
        let text = rendered["rendered"].as_str().unwrap();
        assert!(text.contains("From: a@example.com"));
        assert!(text.ends_with("hello"));

        CloseSession.handle(json!({"session_id": session_id}), &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn render_without_required_headers_is_a_handler_error() {
        let ctx = ctx();
        let created = CreateSession.handle(json!({}), &ctx).await.unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();
        let err = Render.handle(json!({"session_id": session_id}), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "handler_error");
    }
}
