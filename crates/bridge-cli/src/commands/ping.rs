use anyhow::Result;
use bridge_client::{Client, ClientConfig};
use std::time::Duration;

/// Manual client smoke test: calls `system.ping` through the full client
/// transport (daemon-first, subprocess fallback on failure) and prints the
/// response envelope.
pub async fn execute(timeout_secs: u64) -> Result<i32> {
    let config = ClientConfig::default().with_env_overrides();
    let client = Client::new(config);
    let response = client
        .call_with_deadline("system", "ping", serde_json::json!({}), Duration::from_secs(timeout_secs))
        .await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.success { 0 } else { 1 })
}
