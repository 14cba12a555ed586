#![no_main]

use bridge_config::BridgeConfig;
use bridge_core::envelope::decode_request;
use bridge_core::{ModuleCatalog, Validator};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::OnceLock;

static CATALOG: OnceLock<ModuleCatalog> = OnceLock::new();

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

// Arbitrary request bytes must never panic the validator, however
// malformed the envelope or however deeply nested the params.
fuzz_target!(|data: &[u8]| {
    let Ok(env) = decode_request(data) else { return };
    let validator = Validator::new(Arc::new(BridgeConfig::default()));
    let catalog = catalog();

    let _ = validator.validate_shape(&env);
    let _ = validator.validate_catalog_membership(&env, catalog);
    let _ = validator.validate_suspicious_input(&env);
    if let Some(handler) = catalog.lookup(&env.module, &env.function) {
        let _ = validator.validate_required_params(&env, handler.required_params());
    }
});
