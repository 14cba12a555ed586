//! Filesystem advisory locking via `flock(2)`, grounded on `libc` — the
//! thinnest way to get real OS-level locking semantics without pulling in a
//! higher-level crate the reference pack never reaches for.

use crate::params::required_str;
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("fslock", "acquire", Acquire);
    catalog.register("fslock", "release", Release);
}

struct Lockfile {
    file: File,
    path: String,
}

// SAFETY contract note: the descriptor is only ever touched while the
// registry's own per-handle access serializes callers, so `Send` is sound
// even though `File` is not `Sync` across raw-fd flock calls.
struct Acquire;

#[async_trait]
impl ModuleHandler for Acquire {
    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let path = required_str(&params, "fslock", "acquire", "path")?;
        let exclusive = params.get("exclusive").and_then(Value::as_bool).unwrap_or(true);
        let blocking = params.get("blocking").and_then(Value::as_bool).unwrap_or(false);

        let path = path.to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| BridgeError::Handler(format!("failed to open {path}: {e}")))?;

        let mut op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        if !blocking {
            op |= libc::LOCK_NB;
        }
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(BridgeError::Handler(format!("lock on {path} is held by another process")));
            }
            return Err(BridgeError::Handler(format!("flock failed for {path}: {err}")));
        }

        let handle = ctx
            .registry
            .put(ResourceKind::Lockfile, Lockfile { file, path: path.clone() }, PutOptions::default())
            .await;
        Ok(json!({ "lock_id": handle, "path": path }))
    }
}

struct Release;

#[async_trait]
impl ModuleHandler for Release {
    fn required_params(&self) -> &[&'static str] {
        &["lock_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "fslock", "release", "lock_id")?;
        let value = ctx.registry.get(ResourceKind::Lockfile, handle).await?;
        let lockfile = value
            .downcast::<Lockfile>()
            .map_err(|_| BridgeError::Internal("lockfile handle type mismatch".to_string()))?;
        let rc = unsafe { libc::flock(lockfile.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            return Err(BridgeError::Handler(format!(
                "failed to release lock on {}: {}",
                lockfile.path,
                std::io::Error::last_os_error()
            )));
        }
        ctx.registry.delete(ResourceKind::Lockfile, handle).await?;
        Ok(json!({ "released": true }))
    }
}
