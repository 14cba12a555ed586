use anyhow::{Context, Result};
use bridge_config::load_config;
use bridge_core::catalog::ModuleCatalog;
use bridge_core::clock::SystemClock;
use bridge_core::envelope;
use bridge_core::server::{handle_request_bytes, Broker, BrokerSharedState};
use bridge_modules::system::SystemDeps;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One-shot dispatch mode: reads a single request envelope from stdin,
/// runs it through the ordinary validate/throttle/dispatch pipeline
/// in-process (no socket, no daemon), and writes the response envelope to
/// stdout. This is the subprocess fallback's contract from the client
/// transport's side — it must never itself attempt a daemon connection.
pub async fn execute(config_path: Option<&str>) -> Result<i32> {
    let config = match config_path {
        Some(p) if Path::new(p).exists() => load_config(Some(Path::new(p))).context("failed to load config")?,
        _ => bridge_config::BridgeConfig::default(),
    };
    bridge_config::validate_config(&config).context("invalid bridge configuration")?;
    let config = Arc::new(config);

    let shared = BrokerSharedState::new();
    let system_deps = SystemDeps {
        metrics: shared.metrics.clone(),
        pressure: shared.pressure.clone(),
        started_at: Instant::now(),
        max_memory_mb: config.max_memory_mb,
        max_cpu_percent: config.max_cpu_percent,
        catalog_surface: Arc::new(OnceLock::new()),
        listening: shared.listening.clone(),
        active_connections: shared.active_connections.clone(),
    };

    let mut catalog = ModuleCatalog::new();
    bridge_modules::register_all(&mut catalog, system_deps.clone());
    bridge_modules::system::finalize_catalog_surface(&system_deps, &catalog);

    let clock = Arc::new(SystemClock);
    let broker = Arc::new(Broker::with_shared_state(config, catalog, clock, shared));

    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await.context("failed to read request from stdin")?;

    let response = handle_request_bytes(&raw, &broker).await;
    let bytes = envelope::encode(&response).unwrap_or_else(|_| {
        br#"{"success":false,"error":"internal_error","error_code":"internal_error"}"#.to_vec()
    });

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&bytes).await.context("failed to write response to stdout")?;
    stdout.flush().await?;

    Ok(if response.success { 0 } else { 1 })
}
