//! Hashing, HMAC, and a registry-held cipher context for streaming digest
//! operations. Grounded on `sha2`/`hmac`, the RustCrypto crates used
//! elsewhere in the reference pack for exactly this purpose.

use crate::params::required_str;
use async_trait::async_trait;
use base64::Engine;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256, Sha512};
use std::sync::Mutex as StdMutex;

type HmacSha256 = Hmac<Sha256>;

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("crypto", "sha256", Sha256Hash);
    catalog.register("crypto", "sha512", Sha512Hash);
    catalog.register("crypto", "hmac_sha256", HmacSha256Sign);
    catalog.register("crypto", "create_cipher", CreateCipher);
    catalog.register("crypto", "cipher_update", CipherUpdate);
    catalog.register("crypto", "cipher_digest", CipherDigest);
    catalog.register("crypto", "close_cipher", CloseCipher);
}

fn decode_input(params: &Value, module: &str, function: &str) -> Result<Vec<u8>, BridgeError> {
    if let Some(text) = params.get("data").and_then(Value::as_str) {
        return Ok(text.as_bytes().to_vec());
    }
    if let Some(b64) = params.get("data_base64").and_then(Value::as_str) {
        return base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| BridgeError::InvalidParams(module.to_string(), function.to_string(), format!("bad base64 in data_base64: {e}")));
    }
    Err(BridgeError::InvalidParams(
        module.to_string(),
        function.to_string(),
        "one of `data` or `data_base64` is required".to_string(),
    ))
}

struct Sha256Hash;

#[async_trait]
impl ModuleHandler for Sha256Hash {
    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let data = decode_input(&params, "crypto", "sha256")?;
        let digest = Sha256::digest(&data);
        Ok(json!({ "hex": hex_encode(&digest) }))
    }
}

struct Sha512Hash;

#[async_trait]
impl ModuleHandler for Sha512Hash {
    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let data = decode_input(&params, "crypto", "sha512")?;
        let digest = Sha512::digest(&data);
        Ok(json!({ "hex": hex_encode(&digest) }))
    }
}

struct HmacSha256Sign;

#[async_trait]
impl ModuleHandler for HmacSha256Sign {
    fn required_params(&self) -> &[&'static str] {
        &["key"]
    }

    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let key = required_str(&params, "crypto", "hmac_sha256", "key")?;
        let data = decode_input(&params, "crypto", "hmac_sha256")?;
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| BridgeError::Handler(format!("invalid hmac key: {e}")))?;
        mac.update(&data);
        Ok(json!({ "hex": hex_encode(&mac.finalize().into_bytes()) }))
    }
}

/// A streaming digest context, for callers that feed data incrementally.
/// Only SHA-256 is supported; the set can grow without a wire change since
/// `algorithm` is just a string param.
struct CreateCipher;

#[async_trait]
impl ModuleHandler for CreateCipher {
    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let algorithm = params.get("algorithm").and_then(Value::as_str).unwrap_or("sha256");
        if algorithm != "sha256" {
            return Err(BridgeError::InvalidParams(
                "crypto".to_string(),
                "create_cipher".to_string(),
                format!("unsupported algorithm `{algorithm}`, only sha256 is implemented"),
            ));
        }
        let handle = ctx
            .registry
            .put(ResourceKind::Cipher, StdMutex::new(Sha256::new()), PutOptions::default())
            .await;
        Ok(json!({ "cipher_id": handle }))
    }
}

struct CipherUpdate;

#[async_trait]
impl ModuleHandler for CipherUpdate {
    fn required_params(&self) -> &[&'static str] {
        &["cipher_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "crypto", "cipher_update", "cipher_id")?;
        let data = decode_input(&params, "crypto", "cipher_update")?;
        let value = ctx.registry.get(ResourceKind::Cipher, handle).await?;
        let cipher = value
            .downcast::<StdMutex<Sha256>>()
            .map_err(|_| BridgeError::Internal("cipher handle type mismatch".to_string()))?;
        cipher.lock().unwrap().update(&data);
        Ok(json!({ "updated": true }))
    }
}

struct CipherDigest;

#[async_trait]
impl ModuleHandler for CipherDigest {
    fn required_params(&self) -> &[&'static str] {
        &["cipher_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "crypto", "cipher_digest", "cipher_id")?;
        let value = ctx.registry.get(ResourceKind::Cipher, handle).await?;
        let cipher = value
            .downcast::<StdMutex<Sha256>>()
            .map_err(|_| BridgeError::Internal("cipher handle type mismatch".to_string()))?;
        let digest = cipher.lock().unwrap().clone().finalize();
        Ok(json!({ "hex": hex_encode(&digest) }))
    }
}

struct CloseCipher;

#[async_trait]
impl ModuleHandler for CloseCipher {
    fn required_params(&self) -> &[&'static str] {
        &["cipher_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "crypto", "close_cipher", "cipher_id")?;
        ctx.registry.delete(ResourceKind::Cipher, handle).await?;
        Ok(json!({ "closed": true }))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
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
    async fn sha256_matches_a_known_vector() {
        let result = Sha256Hash.handle(json!({"data": ""}), &ctx()).await.unwrap();
        assert_eq!(
            result["hex"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn cipher_context_accumulates_across_updates() {
        let ctx = ctx();
        let created = CreateCipher.handle(json!({}), &ctx).await.unwrap();
        let cipher_id = created["cipher_id"].as_str().unwrap().to_string();

        CipherUpdate.handle(json!({"cipher_id": cipher_id, "data": "hello "}), &ctx).await.unwrap();
        CipherUpdate.handle(json!({"cipher_id": cipher_id, "data": "world"}), &ctx).await.unwrap();
        let streamed = CipherDigest.handle(json!({"cipher_id": cipher_id}), &ctx).await.unwrap();

        let whole = Sha256Hash.handle(json!({"data": "hello world"}), &ctx).await.unwrap();
        assert_eq!(streamed["hex"], whole["hex"]);

        CloseCipher.handle(json!({"cipher_id": cipher_id}), &ctx).await.unwrap();
    }
}
