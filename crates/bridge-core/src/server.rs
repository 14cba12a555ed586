//! The socket server: accepts connections on a local endpoint and runs one
//! worker per connection through the validate → throttle → dispatch
//! pipeline.

use crate::catalog::ModuleCatalog;
use crate::clock::Clock;
use crate::envelope::{self, RequestEnvelope, ResponseEnvelope};
use crate::error::BridgeError;
use crate::handler::HandlerContext;
use crate::metrics::MetricsCollector;
use crate::pressure::PressureSampler;
use crate::registry::ResourceRegistry;
use crate::throttle::Throttle;
use crate::validator::Validator;
use bridge_config::BridgeConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// All shared state a connection worker needs. One instance per daemon
/// process, held behind `Arc`.
pub struct Broker {
    pub config: Arc<BridgeConfig>,
    pub catalog: Arc<ModuleCatalog>,
    pub validator: Arc<Validator>,
    pub throttle: Arc<Throttle>,
    pub metrics: Arc<MetricsCollector>,
    pub registry: Arc<ResourceRegistry>,
    pub pressure: Arc<PressureSampler>,
    pub clock: Arc<dyn Clock>,
    pub active_connections: Arc<AtomicU64>,
    pub listening: Arc<std::sync::atomic::AtomicBool>,
}

/// The pieces of [`Broker`] that `system` handlers also need a handle to.
/// Built before the catalog (so `system::register` can capture clones of
/// these same `Arc`s) and then threaded into [`Broker::with_shared_state`]
/// so both sides observe the same counters.
#[derive(Clone)]
pub struct BrokerSharedState {
    pub metrics: Arc<MetricsCollector>,
    pub pressure: Arc<PressureSampler>,
    pub active_connections: Arc<AtomicU64>,
    pub listening: Arc<std::sync::atomic::AtomicBool>,
}

impl BrokerSharedState {
    pub fn new() -> Self {
        BrokerSharedState {
            metrics: Arc::new(MetricsCollector::new()),
            pressure: PressureSampler::new(),
            active_connections: Arc::new(AtomicU64::new(0)),
            listening: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl Default for BrokerSharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new(config: Arc<BridgeConfig>, catalog: ModuleCatalog, clock: Arc<dyn Clock>) -> Self {
        Broker::with_shared_state(config, catalog, clock, BrokerSharedState::new())
    }

    /// Like [`Broker::new`] but takes a pre-built [`BrokerSharedState`] so a
    /// caller can register `system` handlers against the same metrics and
    /// pressure instances the broker itself will drive.
    pub fn with_shared_state(
        config: Arc<BridgeConfig>,
        catalog: ModuleCatalog,
        clock: Arc<dyn Clock>,
        shared: BrokerSharedState,
    ) -> Self {
        let registry = Arc::new(ResourceRegistry::new(&config, clock.clone()));
        let throttle = Arc::new(Throttle::new(&config, shared.pressure.clone(), clock.clone()));
        let validator = Arc::new(Validator::new(config.clone()));
        Broker {
            config,
            catalog: Arc::new(catalog),
            validator,
            throttle,
            metrics: shared.metrics,
            registry,
            pressure: shared.pressure,
            clock,
            active_connections: shared.active_connections,
            listening: shared.listening,
        }
    }
}

/// Reads the full request body, honoring the half-close framing: the
/// client writes, shuts down its write half, and we read to EOF.
async fn read_request_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut limited = stream.take(max_bytes as u64 + 1);
    limited.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Processes one connection end-to-end: read, validate, throttle,
/// dispatch, respond, close. Never panics on handler misbehavior.
pub async fn serve_connection<S>(mut stream: S, broker: Arc<Broker>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    broker.active_connections.fetch_add(1, Ordering::Relaxed);
    let result = serve_connection_inner(&mut stream, &broker).await;
    broker.active_connections.fetch_sub(1, Ordering::Relaxed);
    if let Err(e) = result {
        warn!(error = %e, "connection worker failed before a response could be written");
    }
}

async fn serve_connection_inner<S>(stream: &mut S, broker: &Arc<Broker>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = read_request_body(stream, broker.config.max_request_bytes).await?;
    broker.metrics.record_received();

    let response = handle_request(&raw, broker).await;
    let bytes = envelope::encode(&response).unwrap_or_else(|_| {
        br#"{"success":false,"error":"internal_error","error_code":"internal_error"}"#.to_vec()
    });
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Runs the validate/throttle/dispatch pipeline over a raw request body
/// without a socket, for callers that already have the bytes in hand (the
/// one-shot subprocess-fallback entry point).
pub async fn handle_request_bytes(raw: &[u8], broker: &Arc<Broker>) -> ResponseEnvelope {
    broker.metrics.record_received();
    handle_request(raw, broker).await
}

async fn handle_request(raw: &[u8], broker: &Arc<Broker>) -> ResponseEnvelope {
    let started = Instant::now();

    if let Err(e) = broker.validator.validate_size(raw.len()) {
        broker.metrics.record_validation_rejection();
        return ResponseEnvelope::daemon_failure(&e, None);
    }

    let env: RequestEnvelope = match envelope::decode_request(raw) {
        Ok(env) => env,
        Err(e) => {
            broker.metrics.record_validation_rejection();
            return ResponseEnvelope::daemon_failure(&e, None);
        }
    };
    let request_id = env.request_id.clone();

    if let Some(reject) = validate_before_dispatch(&env, broker) {
        broker.metrics.record_validation_rejection();
        if reject.is_security_event() {
            broker.metrics.record_security_event();
        }
        return ResponseEnvelope::daemon_failure(&reject, request_id);
    }

    let admission = match broker.throttle.admit().await {
        Ok(guard) => guard,
        Err(e) => {
            broker.metrics.record_throttle_rejection();
            return ResponseEnvelope::daemon_failure(&e, request_id);
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctx = HandlerContext::new(broker.registry.clone(), broker.config.clone(), broker.clock.clone())
        .with_cancel(cancel.clone())
        .with_request_id(request_id.clone());

    let timeout = Duration::from_secs(broker.config.handler_timeout_seconds);
    let dispatch_fut = broker.catalog.dispatch(&env.module, &env.function, env.params.clone(), &ctx);

    let outcome = tokio::time::timeout(timeout, dispatch_fut).await;
    drop(admission);

    let duration = started.elapsed();
    match outcome {
        Ok(Ok(result)) => {
            broker.metrics.record_outcome(&env.module, &env.function, duration, true);
            ResponseEnvelope::ok(result, request_id, duration.as_millis() as u64)
        }
        Ok(Err(e)) => {
            broker.metrics.record_outcome(&env.module, &env.function, duration, false);
            ResponseEnvelope::handler_failure(&e, request_id, duration.as_millis() as u64)
        }
        Err(_) => {
            cancel.cancel();
            let e = BridgeError::Timeout(timeout.as_millis() as u64);
            broker.metrics.record_outcome(&env.module, &env.function, duration, false);
            ResponseEnvelope::handler_failure(&e, request_id, duration.as_millis() as u64)
        }
    }
}

/// Runs the validator's ordered checks that must pass before admission:
/// shape, catalog membership, suspicious-input screening, and the
/// per-handler required-params schema.
fn validate_before_dispatch(env: &RequestEnvelope, broker: &Arc<Broker>) -> Option<BridgeError> {
    if let Err(e) = broker.validator.validate_shape(env) {
        return Some(e);
    }
    if let Err(e) = broker.validator.validate_catalog_membership(env, &broker.catalog) {
        return Some(e);
    }
    if let Err(e) = broker.validator.validate_suspicious_input(env) {
        return Some(e);
    }
    if let Some(handler) = broker.catalog.lookup(&env.module, &env.function) {
        if let Err(e) = broker.validator.validate_required_params(env, handler.required_params()) {
            return Some(e);
        }
    }
    None
}

/// Accepts connections on a Unix domain socket until `shutdown` fires.
#[cfg(unix)]
pub async fn run_unix(
    listener: tokio::net::UnixListener,
    broker: Arc<Broker>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    broker.listening.store(true, Ordering::Relaxed);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let broker = broker.clone();
                        tokio::spawn(serve_connection(stream, broker));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
    broker.listening.store(false, Ordering::Relaxed);
}

/// Accepts connections on a loopback TCP socket until `shutdown` fires.
pub async fn run_tcp(
    listener: tokio::net::TcpListener,
    broker: Arc<Broker>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    broker.listening.store(true, Ordering::Relaxed);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let broker = broker.clone();
                        tokio::spawn(serve_connection(stream, broker));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
    broker.listening.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::handler::ModuleHandler;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::io::duplex;

    struct Ping;

    #[async_trait]
    impl ModuleHandler for Ping {
        async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
            Ok(json!({"pong": true}))
        }
    }

    struct SlowEcho;

    #[async_trait]
    impl ModuleHandler for SlowEcho {
        async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(params)
        }
    }

    fn test_broker() -> Arc<Broker> {
        let mut catalog = ModuleCatalog::new();
        catalog.register("system", "ping", Ping);
        catalog.register("test", "slow", SlowEcho);
        let config = Arc::new(BridgeConfig::default());
        Arc::new(Broker::new(config, catalog, Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn ping_round_trip_via_duplex_stream() {
        let broker = test_broker();
        let (mut client, server) = duplex(4096);
        let req = br#"{"module":"system","function":"ping","params":{}}"#.to_vec();
        client.write_all(&req).await.unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut client).await.unwrap();

        serve_connection(server, broker.clone()).await;

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let resp: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["pong"], true);
        assert_eq!(broker.metrics.requests_total(), 1);
        assert_eq!(broker.metrics.requests_successful(), 1);
    }

    #[tokio::test]
    async fn unknown_handler_is_a_validation_rejection() {
        let broker = test_broker();
        let (mut client, server) = duplex(4096);
        let req = br#"{"module":"nope","function":"nope","params":{}}"#.to_vec();
        client.write_all(&req).await.unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut client).await.unwrap();

        serve_connection(server, broker.clone()).await;

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let resp: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_code.as_deref(), Some("unknown_handler"));
        assert_eq!(broker.metrics.validation_rejections(), 1);
        assert_eq!(broker.metrics.requests_failed(), 0);
    }
}
