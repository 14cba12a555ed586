//! The six end-to-end scenarios spec.md calls out by name: ping, an
//! unknown handler, a full handle lifecycle through `excel`, throttle
//! admission under `max_concurrent_requests: 2`, client fallback toggling
//! on `FALLBACK_ENABLED`, and graceful shutdown on SIGTERM.

use async_trait::async_trait;
use bridge_config::BridgeConfig;
use bridge_core::clock::SystemClock;
use bridge_core::server::{serve_connection, Broker, BrokerSharedState};
use bridge_core::{BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use bridge_modules::system::SystemDeps;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn build_broker(config: BridgeConfig) -> Arc<Broker> {
    let config = Arc::new(config);
    let shared = BrokerSharedState::new();
    let catalog_surface = Arc::new(std::sync::OnceLock::new());
    let system_deps = SystemDeps {
        metrics: shared.metrics.clone(),
        pressure: shared.pressure.clone(),
        started_at: Instant::now(),
        max_memory_mb: config.max_memory_mb,
        max_cpu_percent: config.max_cpu_percent,
        catalog_surface,
        listening: shared.listening.clone(),
        active_connections: shared.active_connections.clone(),
    };

    let mut catalog = ModuleCatalog::new();
    bridge_modules::register_all(&mut catalog, system_deps.clone());
    bridge_modules::system::finalize_catalog_surface(&system_deps, &catalog);

    Arc::new(Broker::with_shared_state(config, catalog, Arc::new(SystemClock), shared))
}

async fn call(broker: &Arc<Broker>, module: &str, function: &str, params: Value) -> Value {
    let (mut client, server) = duplex(64 * 1024);
    let req = json!({ "module": module, "function": function, "params": params });
    client.write_all(&serde_json::to_vec(&req).unwrap()).await.unwrap();
    client.shutdown().await.unwrap();

    serve_connection(server, broker.clone()).await;

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    serde_json::from_slice(&out).unwrap()
}

/// Scenario 1: ping.
#[tokio::test]
async fn scenario_ping() {
    let broker = build_broker(BridgeConfig::default());
    let resp = call(&broker, "system", "ping", json!({})).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["result"]["pong"], true);
}

/// Scenario 2: unknown handler.
#[tokio::test]
async fn scenario_unknown_handler() {
    let broker = build_broker(BridgeConfig::default());
    let resp = call(&broker, "not_a_module", "not_a_function", json!({})).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error_code"], "unknown_handler");
    assert_eq!(resp["daemon_error"], true);
}

/// Scenario 3: handle lifecycle via excel — create, write, reject an
/// invalid handle, then clean up.
#[tokio::test]
async fn scenario_excel_handle_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.xlsx");
    let broker = build_broker(BridgeConfig::default());

    let created = call(&broker, "excel", "create_workbook", json!({"filename": path.to_str().unwrap()})).await;
    assert_eq!(created["success"], true);
    let workbook_id = created["result"]["workbook_id"].as_str().unwrap().to_string();

    let write = call(
        &broker,
        "excel",
        "write_cell",
        json!({"workbook_id": workbook_id, "row": 0, "col": 0, "value": "total"}),
    )
    .await;
    assert_eq!(write["success"], true);

    let bad_handle = call(
        &broker,
        "excel",
        "write_cell",
        json!({"workbook_id": "workbook_deadbeefdeadbeef", "row": 0, "col": 0, "value": "x"}),
    )
    .await;
    assert_eq!(bad_handle["success"], false);
    assert_eq!(bad_handle["error_code"], "invalid_handle");

    let saved = call(&broker, "excel", "save_workbook", json!({"workbook_id": workbook_id})).await;
    assert_eq!(saved["success"], true);

    let closed = call(&broker, "excel", "close_workbook", json!({"workbook_id": workbook_id})).await;
    assert_eq!(closed["success"], true);

    let reused = call(&broker, "excel", "write_cell", json!({"workbook_id": workbook_id, "row": 0, "col": 0, "value": "x"})).await;
    assert_eq!(reused["success"], false);
    assert_eq!(reused["error_code"], "invalid_handle");
}

struct SlowEcho;

#[async_trait]
impl ModuleHandler for SlowEcho {
    async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(params)
    }
}

/// Scenario 4: throttle admission under `max_concurrent_requests: 2`.
/// Three concurrent 500ms calls; the third is rejected with
/// `capacity_full` and a positive `retry_after_ms`, and succeeds once one
/// of the first two finishes.
#[tokio::test]
async fn scenario_throttle_rejects_the_third_concurrent_call() {
    let config = BridgeConfig { max_concurrent_requests: 2, ..BridgeConfig::default() };
    let config = Arc::new(config);
    let shared = BrokerSharedState::new();
    let catalog_surface = Arc::new(std::sync::OnceLock::new());
    let system_deps = SystemDeps {
        metrics: shared.metrics.clone(),
        pressure: shared.pressure.clone(),
        started_at: Instant::now(),
        max_memory_mb: config.max_memory_mb,
        max_cpu_percent: config.max_cpu_percent,
        catalog_surface,
        listening: shared.listening.clone(),
        active_connections: shared.active_connections.clone(),
    };
    let mut catalog = ModuleCatalog::new();
    bridge_modules::register_all(&mut catalog, system_deps.clone());
    catalog.register("test", "slow", SlowEcho);
    bridge_modules::system::finalize_catalog_surface(&system_deps, &catalog);
    let broker = Arc::new(Broker::with_shared_state(config, catalog, Arc::new(SystemClock), shared));

    let b1 = broker.clone();
    let b2 = broker.clone();
    let first = tokio::spawn(async move { call(&b1, "test", "slow", json!({"n": 1})).await });
    let second = tokio::spawn(async move { call(&b2, "test", "slow", json!({"n": 2})).await });

    // Give the first two a moment to occupy both concurrency slots before
    // the third is attempted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let third = call(&broker, "test", "slow", json!({"n": 3})).await;
    assert_eq!(third["success"], false);
    assert_eq!(third["error_code"], "capacity_full");
    let retry_after_ms = third["details"]["retry_after_ms"].as_u64().unwrap();
    assert!(retry_after_ms > 0);

    let (r1, r2) = tokio::join!(first, second);
    assert_eq!(r1.unwrap()["success"], true);
    assert_eq!(r2.unwrap()["success"], true);

    // Capacity has been released; a fourth call now succeeds.
    let fourth = call(&broker, "test", "slow", json!({"n": 4})).await;
    assert_eq!(fourth["success"], true);
}

/// Scenario 5: client fallback toggling on `FALLBACK_ENABLED`. With no
/// daemon listening, fallback disabled means `daemon_unreachable`;
/// fallback enabled routes through the `bridge-daemon once` subprocess
/// and succeeds.
#[tokio::test]
async fn scenario_fallback_toggle() {
    use bridge_client::{Client, ClientConfig};

    let missing_socket = "/tmp/bridge-e2e-missing-daemon.sock".to_string();
    let _ = std::fs::remove_file(&missing_socket);

    let disabled = ClientConfig {
        endpoint_path: missing_socket.clone(),
        fallback_enabled: false,
        connect_attempts: 1,
        backoff_base: Duration::from_millis(1),
        daemon_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    let client = Client::new(disabled);
    let resp = client.call("system", "ping", json!({})).await;
    assert!(!resp.success);
    assert_eq!(resp.error_code.as_deref(), Some("daemon_unreachable"));

    let enabled = ClientConfig {
        endpoint_path: missing_socket,
        fallback_enabled: true,
        fallback_binary: env!("CARGO_BIN_EXE_bridge-daemon").into(),
        connect_attempts: 1,
        backoff_base: Duration::from_millis(1),
        daemon_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let client = Client::new(enabled);
    let resp = client.call("system", "ping", json!({})).await;
    assert!(resp.success);
    assert_eq!(resp.result.unwrap()["pong"], true);
}

/// Scenario 6: SIGTERM triggers graceful shutdown within
/// `shutdown_grace_seconds`, removing the endpoint file so a subsequent
/// connect attempt fails.
#[tokio::test]
async fn scenario_sigterm_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("bridge.sock");
    let config = Arc::new(BridgeConfig {
        endpoint_path: socket_path.to_str().unwrap().to_string(),
        shutdown_grace_seconds: 3,
        ..BridgeConfig::default()
    });

    let broker = build_broker((*config).clone());
    let run_config = config.clone();
    let run_broker = broker.clone();
    let daemon = tokio::spawn(async move { bridge_core::lifecycle::run(run_config, run_broker).await });

    // Wait for the listener to come up before sending the signal.
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(socket_path.exists(), "daemon never bound its endpoint");

    unsafe {
        libc::raise(libc::SIGTERM);
    }

    let exit_code = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon did not shut down within the grace period")
        .unwrap();
    assert_eq!(exit_code, bridge_core::lifecycle::exit_code::OK);
    assert!(!socket_path.exists(), "endpoint file must be removed on shutdown");

    assert!(tokio::net::UnixStream::connect(&socket_path).await.is_err());
}
