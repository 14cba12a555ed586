#![no_main]

use arbitrary::Arbitrary;
use bridge_config::BridgeConfig;
use bridge_core::clock::SystemClock;
use bridge_core::{HandlerContext, ModuleCatalog, ResourceRegistry};
use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Arbitrary)]
struct DispatchInput {
    module: String,
    function: String,
    params_json: String,
}

static CATALOG: OnceLock<ModuleCatalog> = OnceLock::new();
static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn catalog() -> &'static ModuleCatalog {
    CATALOG.get_or_init(|| {
        let mut catalog = ModuleCatalog::new();
        let deps = bridge_modules::system::SystemDeps {
            metrics: Arc::new(bridge_core::MetricsCollector::new()),
            pressure: bridge_core::pressure::PressureSampler::new(),
            started_at: std::time::Instant::now(),
            max_memory_mb: 1024,
            max_cpu_percent: 200.0,
            catalog_surface: Arc::new(OnceLock::new()),
            listening: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            active_connections: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        };
        bridge_modules::register_all(&mut catalog, deps.clone());
        bridge_modules::system::finalize_catalog_surface(&deps, &catalog);
        catalog
    })
}

// Dispatching an arbitrary (module, function, params) triple through the
// fully registered catalog must never panic: unknown pairs return
// `unknown_handler`, and malformed params must be rejected by each
// handler's own parameter parsing, not by an unwrap deep in a module.
fuzz_target!(|input: DispatchInput| {
    let params: serde_json::Value =
        serde_json::from_str(&input.params_json).unwrap_or(serde_json::Value::Null);

    let runtime = RUNTIME.get_or_init(|| tokio::runtime::Runtime::new().unwrap());
    runtime.block_on(async {
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        let registry = Arc::new(ResourceRegistry::new(&config, clock.clone()));
        let ctx = HandlerContext::new(registry, config, clock);
        let _ = catalog().dispatch(&input.module, &input.function, params, &ctx).await;
    });
});
