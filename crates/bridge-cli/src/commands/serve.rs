use anyhow::{Context, Result};
use bridge_config::load_config;
use bridge_core::catalog::ModuleCatalog;
use bridge_core::clock::SystemClock;
use bridge_core::lifecycle;
use bridge_core::server::{Broker, BrokerSharedState};
use bridge_modules::system::SystemDeps;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

pub async fn execute(config_path: &str) -> Result<i32> {
    let config = load_config(Some(Path::new(config_path)))
        .context("failed to load bridge configuration")?;
    bridge_config::validate_config(&config).context("invalid bridge configuration")?;
    let config = Arc::new(config);

    let shared = BrokerSharedState::new();
    let catalog_surface = Arc::new(OnceLock::new());
    let system_deps = SystemDeps {
        metrics: shared.metrics.clone(),
        pressure: shared.pressure.clone(),
        started_at: Instant::now(),
        max_memory_mb: config.max_memory_mb,
        max_cpu_percent: config.max_cpu_percent,
        catalog_surface: catalog_surface.clone(),
        listening: shared.listening.clone(),
        active_connections: shared.active_connections.clone(),
    };

    let mut catalog = ModuleCatalog::new();
    bridge_modules::register_all(&mut catalog, system_deps.clone());
    bridge_modules::system::finalize_catalog_surface(&system_deps, &catalog);

    tracing::info!(
        endpoint = %config.endpoint_path,
        version = env!("CARGO_PKG_VERSION"),
        "bridge daemon starting"
    );

    let clock = Arc::new(SystemClock);
    let broker = Arc::new(Broker::with_shared_state(config.clone(), catalog, clock, shared));
    let code = lifecycle::run(config, broker).await;
    Ok(code)
}
