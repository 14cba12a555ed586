//! The built-in `system` introspection module. Every handler here is a pure
//! mapping over the broker's metrics and registry state; none mutate
//! anything except `cleanup`, which triggers the ordinary reaper.

use async_trait::async_trait;
use bridge_core::{BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use bridge_config::ResourceKind;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// The full `(module, function)` surface, filled in once after every
/// module has registered — including `system` itself — so `system.config`
/// can report a complete catalog without needing the `ModuleCatalog` it is
/// itself a member of.
pub type CatalogSurface = Arc<OnceLock<Vec<(String, String)>>>;

/// Dependencies `system` needs that live on the broker rather than in this
/// crate: the metrics collector, the process start time, and a pressure
/// reader for `system.health`.
#[derive(Clone)]
pub struct SystemDeps {
    pub metrics: Arc<bridge_core::MetricsCollector>,
    pub pressure: Arc<bridge_core::pressure::PressureSampler>,
    pub started_at: Instant,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f32,
    pub catalog_surface: CatalogSurface,
    pub listening: Arc<AtomicBool>,
    pub active_connections: Arc<AtomicU64>,
}

pub fn register(catalog: &mut ModuleCatalog, deps: SystemDeps) {
    catalog.register("system", "ping", Ping { started_at: deps.started_at });
    catalog.register("system", "metrics", Metrics { deps: deps.clone() });
    catalog.register("system", "health", Health { deps: deps.clone() });
    catalog.register("system", "performance", Performance { deps: deps.clone() });
    catalog.register("system", "connections", Connections);
    catalog.register("system", "cleanup", Cleanup);
    catalog.register("system", "config", Config { catalog_surface: deps.catalog_surface.clone() });
}

/// Call once, after every module (including `system`) has registered
/// against the catalog: freezes the final `(module, function)` list so
/// `system.config` can report it. A no-op if already set.
pub fn finalize_catalog_surface(deps: &SystemDeps, catalog: &ModuleCatalog) {
    let _ = deps.catalog_surface.set(catalog.catalog_surface());
}

struct Ping {
    started_at: Instant,
}

#[async_trait]
impl ModuleHandler for Ping {
    async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        Ok(json!({
            "pong": true,
            "uptime_seconds": self.started_at.elapsed().as_secs(),
        }))
    }
}

struct Metrics {
    deps: SystemDeps,
}

#[async_trait]
impl ModuleHandler for Metrics {
    async fn handle(&self, _params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let stats = ctx.registry.stats().await;
        let resource_status: Vec<(String, usize)> =
            stats.into_iter().map(|(kind, s)| (kind.to_string(), s.count)).collect();
        let active_connections = self.deps.active_connections.load(Ordering::Relaxed);
        let snapshot = self.deps.metrics.snapshot(active_connections, resource_status);
        serde_json::to_value(snapshot).map_err(|e| BridgeError::Internal(e.to_string()))
    }
}

struct Health {
    deps: SystemDeps,
}

#[async_trait]
impl ModuleHandler for Health {
    async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let pressure = self.deps.pressure.current();
        let report = self.deps.metrics.health(
            pressure.cpu_percent,
            pressure.memory_bytes,
            self.deps.max_memory_mb,
            self.deps.listening.load(Ordering::Relaxed),
        );
        serde_json::to_value(report).map_err(|e| BridgeError::Internal(e.to_string()))
    }
}

struct Performance {
    deps: SystemDeps,
}

#[async_trait]
impl ModuleHandler for Performance {
    async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let top = self.deps.metrics.top_handlers(10);
        let failure_rate = self.deps.metrics.recent_failure_rate();
        let mut concerns = Vec::new();
        let mut recommendations = Vec::new();
        if failure_rate >= 0.05 {
            concerns.push("failure rate over the last 200 requests exceeds 5%".to_string());
            recommendations.push("inspect recent handler_error entries in the security log".to_string());
        }
        if let Some(slowest) = top.first() {
            if slowest.avg_latency_micros > 500_000 {
                concerns.push(format!(
                    "{}.{} averages over 500ms per call",
                    slowest.module, slowest.function
                ));
                recommendations.push("consider a dedicated timeout or caching layer for this handler".to_string());
            }
        }
        Ok(json!({
            "top_handlers": top,
            "recent_failure_rate": failure_rate,
            "concerns": concerns,
            "recommendations": recommendations,
        }))
    }
}

struct Connections;

#[async_trait]
impl ModuleHandler for Connections {
    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let kind = params
            .get("kind")
            .and_then(Value::as_str)
            .and_then(ResourceKind::from_prefix);
        let summaries = ctx.registry.list(kind).await;
        let by_kind: Value = json!(summaries
            .into_iter()
            .map(|s| json!({
                "handle": s.handle,
                "kind": s.kind.to_string(),
                "age_secs": s.age_secs,
                "idle_secs": s.idle_secs,
                "owner_conn_id": s.owner_conn_id,
            }))
            .collect::<Vec<_>>());
        Ok(json!({ "connections": by_kind }))
    }
}

struct Cleanup;

#[async_trait]
impl ModuleHandler for Cleanup {
    async fn handle(&self, _params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let cleaned = ctx.registry.reap_idle().await;
        Ok(json!({ "cleaned": cleaned }))
    }
}

struct Config {
    catalog_surface: CatalogSurface,
}

#[async_trait]
impl ModuleHandler for Config {
    async fn handle(&self, _params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let c = &ctx.config;
        let empty = Vec::new();
        let surface = self.catalog_surface.get().unwrap_or(&empty);
        Ok(json!({
            "endpoint_path": c.endpoint_path,
            "max_concurrent_requests": c.max_concurrent_requests,
            "max_requests_per_minute": c.max_requests_per_minute,
            "max_memory_mb": c.max_memory_mb,
            "max_cpu_percent": c.max_cpu_percent,
            "strict_validation": c.strict_validation,
            "handler_timeout_seconds": c.handler_timeout_seconds,
            "catalog": surface
                .iter()
                .map(|(m, f)| format!("{}.{}", m, f))
                .collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_config::BridgeConfig;
    use bridge_core::clock::SystemClock;
    use bridge_core::registry::ResourceRegistry;

    fn ctx() -> HandlerContext {
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        HandlerContext::new(Arc::new(ResourceRegistry::new(&config, clock.clone())), config, clock)
    }

    #[tokio::test]
    async fn ping_reports_uptime_and_pong() {
        let handler = Ping { started_at: Instant::now() };
        let result = handler.handle(json!({}), &ctx()).await.unwrap();
        assert_eq!(result["pong"], true);
        assert!(result["uptime_seconds"].as_u64().is_some());
    }

    #[tokio::test]
    async fn cleanup_returns_zero_when_nothing_is_idle() {
        let handler = Cleanup;
        let result = handler.handle(json!({}), &ctx()).await.unwrap();
        assert_eq!(result["cleaned"], 0);
    }
}
