//! SFTP session lifecycle. No SSH/SFTP client crate is grounded anywhere in
//! the reference pack, so per SPEC_FULL.md this module is handle-lifecycle
//! only: a "session" addresses a local staging directory standing in for a
//! remote filesystem, sufficient to exercise put/get/list/close without a
//! real wire protocol (see DESIGN.md).

use crate::params::required_str;
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use serde_json::{json, Value};
use std::path::PathBuf;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("sftp", "connect", Connect);
    catalog.register("sftp", "put", Put);
    catalog.register("sftp", "get", Get);
    catalog.register("sftp", "list", List);
    catalog.register("sftp", "disconnect", Disconnect);
}

struct Session {
    root: PathBuf,
}

struct Connect;

#[async_trait]
impl ModuleHandler for Connect {
    fn required_params(&self) -> &[&'static str] {
        &["staging_dir"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let staging_dir = required_str(&params, "sftp", "connect", "staging_dir")?;
        let root = PathBuf::from(staging_dir);
        std::fs::create_dir_all(&root)
            .map_err(|e| BridgeError::Handler(format!("failed to prepare staging dir: {e}")))?;
        let handle = ctx
            .registry
            .put(ResourceKind::SftpSession, Session { root }, PutOptions::default())
            .await;
        Ok(json!({ "session_id": handle }))
    }
}

fn resolve_path(root: &std::path::Path, remote_path: &str) -> Result<PathBuf, BridgeError> {
    let candidate = remote_path.trim_start_matches('/');
    if candidate.split('/').any(|seg| seg == "..") {
        return Err(BridgeError::SuspiciousInput("../".to_string()));
    }
    Ok(root.join(candidate))
}

struct Put;

#[async_trait]
impl ModuleHandler for Put {
    fn required_params(&self) -> &[&'static str] {
        &["session_id", "remote_path", "content"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "sftp", "put", "session_id")?;
        let remote_path = required_str(&params, "sftp", "put", "remote_path")?;
        let content = required_str(&params, "sftp", "put", "content")?;
        let value = ctx.registry.get(ResourceKind::SftpSession, handle).await?;
        let session = value
            .downcast::<Session>()
            .map_err(|_| BridgeError::Internal("sftp session handle type mismatch".to_string()))?;
        let path = resolve_path(&session.root, remote_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BridgeError::Handler(e.to_string()))?;
        }
        std::fs::write(&path, content).map_err(|e| BridgeError::Handler(format!("put failed: {e}")))?;
        Ok(json!({ "bytes_written": content.len() }))
    }
}

struct Get;

#[async_trait]
impl ModuleHandler for Get {
    fn required_params(&self) -> &[&'static str] {
        &["session_id", "remote_path"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "sftp", "get", "session_id")?;
        let remote_path = required_str(&params, "sftp", "get", "remote_path")?;
        let value = ctx.registry.get(ResourceKind::SftpSession, handle).await?;
        let session = value
            .downcast::<Session>()
            .map_err(|_| BridgeError::Internal("sftp session handle type mismatch".to_string()))?;
        let path = resolve_path(&session.root, remote_path)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BridgeError::Handler(format!("get failed: {e}")))?;
        Ok(json!({ "content": content }))
    }
}

struct List;

#[async_trait]
impl ModuleHandler for List {
    fn required_params(&self) -> &[&'static str] {
        &["session_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "sftp", "list", "session_id")?;
        let remote_dir = params.get("remote_path").and_then(Value::as_str).unwrap_or("");
        let value = ctx.registry.get(ResourceKind::SftpSession, handle).await?;
        let session = value
            .downcast::<Session>()
            .map_err(|_| BridgeError::Internal("sftp session handle type mismatch".to_string()))?;
        let path = resolve_path(&session.root, remote_dir)?;
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&path).map_err(|e| BridgeError::Handler(format!("list failed: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| BridgeError::Handler(e.to_string()))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(json!({ "entries": names }))
    }
}

struct Disconnect;

#[async_trait]
impl ModuleHandler for Disconnect {
    fn required_params(&self) -> &[&'static str] {
        &["session_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "sftp", "disconnect", "session_id")?;
        ctx.registry.delete(ResourceKind::SftpSession, handle).await?;
        Ok(json!({ "disconnected": true }))
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
    async fn put_then_get_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let connected = Connect
            .handle(json!({"staging_dir": dir.path().to_str().unwrap()}), &ctx)
            .await
            .unwrap();
        let session_id = connected["session_id"].as_str().unwrap().to_string();

        Put.handle(json!({"session_id": session_id, "remote_path": "a/b.txt", "content": "hi"}), &ctx)
            .await
            .unwrap();
        let got = Get.handle(json!({"session_id": session_id, "remote_path": "a/b.txt"}), &ctx).await.unwrap();
        assert_eq!(got["content"], "hi");

        let listed = List.handle(json!({"session_id": session_id, "remote_path": "a"}), &ctx).await.unwrap();
        assert_eq!(listed["entries"][0], "b.txt");
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let connected = Connect
            .handle(json!({"staging_dir": dir.path().to_str().unwrap()}), &ctx)
            .await
            .unwrap();
        let session_id = connected["session_id"].as_str().unwrap().to_string();
        let err = Get
            .handle(json!({"session_id": session_id, "remote_path": "../../etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "suspicious_input");
    }
}
