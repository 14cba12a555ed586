//! Property-based tests for the request broker.
//!
//! These use proptest to generate many inputs verifying the invariants
//! spec.md calls out directly: envelope round-tripping, the
//! requests_total accounting identity, destructor-exactly-once,
//! dispatch-only-through-the-catalog, and idempotence of `system.ping`
//! and `system.cleanup` in steady state.
//!
//! Run with: cargo test --test property --release -- --test-threads=1

use bridge_config::{BridgeConfig, ResourceKind};
use bridge_core::clock::SystemClock;
use bridge_core::envelope::{decode_request, decode_response, encode, RequestEnvelope, ResponseEnvelope};
use bridge_core::registry::{PutOptions, ResourceRegistry};
use bridge_core::{BridgeError, HandlerContext, ModuleCatalog};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn arb_ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

fn arb_params() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        ("[a-z]{1,10}", any::<i64>()).prop_map(|(k, v)| serde_json::json!({ k: v })),
        ("[a-z]{1,10}", "[a-zA-Z0-9 ]{0,30}").prop_map(|(k, v)| serde_json::json!({ k: v })),
    ]
}

fn tokio_rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn test_ctx(registry: Arc<ResourceRegistry>) -> HandlerContext {
    let config = Arc::new(BridgeConfig::default());
    let clock = Arc::new(SystemClock);
    HandlerContext::new(registry, config, clock)
}

proptest! {
    /// An arbitrary request envelope survives encode → decode unchanged
    /// in its addressable fields.
    #[test]
    fn request_envelope_round_trips(module in arb_ident(), function in arb_ident(), params in arb_params()) {
        let req = RequestEnvelope {
            module: module.clone(),
            function: function.clone(),
            params: params.clone(),
            request_id: Some("rid".to_string()),
            client_version: None,
            timestamp: None,
            perl_caller: None,
        };
        let bytes = encode(&req).unwrap();
        let decoded = decode_request(&bytes).unwrap();
        prop_assert_eq!(decoded.module, module);
        prop_assert_eq!(decoded.function, function);
        prop_assert_eq!(decoded.params, params);
    }

    /// An arbitrary (module, function) pair that was never registered is
    /// always rejected the same way, never silently dispatched.
    #[test]
    fn unregistered_pair_never_dispatches(module in arb_ident(), function in arb_ident()) {
        prop_assume!(!(module == "system" && function == "ping"));
        let catalog = ModuleCatalog::new();
        let rt = tokio_rt();
        let registry = Arc::new(ResourceRegistry::new(&BridgeConfig::default(), Arc::new(SystemClock)));
        let ctx = test_ctx(registry);
        let result = rt.block_on(catalog.dispatch(&module, &function, serde_json::json!({}), &ctx));
        prop_assert!(matches!(result, Err(BridgeError::UnknownHandler(_, _))));
    }

    /// Putting N values and deleting each exactly once runs its
    /// destructor exactly once per handle, never zero, never twice.
    #[test]
    fn destructor_runs_exactly_once_per_handle(n in 1usize..20) {
        let rt = tokio_rt();
        rt.block_on(async {
            let registry = ResourceRegistry::new(&BridgeConfig::default(), Arc::new(SystemClock));
            let counter = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::new();
            for i in 0..n {
                let counter = counter.clone();
                let handle = registry
                    .put(
                        ResourceKind::Lockfile,
                        i,
                        PutOptions {
                            destructor: Some(Box::new(move || { counter.fetch_add(1, Ordering::SeqCst); })),
                            ..Default::default()
                        },
                    )
                    .await;
                handles.push(handle);
            }
            for handle in &handles {
                registry.delete(ResourceKind::Lockfile, handle).await.unwrap();
            }
            prop_assert_eq!(counter.load(Ordering::SeqCst), n);

            // A second delete of any handle is a no-op error, never a
            // second destructor run.
            for handle in &handles {
                prop_assert!(registry.delete(ResourceKind::Lockfile, handle).await.is_err());
            }
            prop_assert_eq!(counter.load(Ordering::SeqCst), n);
            Ok(())
        })?;
    }
}

#[test]
fn ping_is_idempotent_regardless_of_call_count() {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Ping;
    #[async_trait]
    impl bridge_core::ModuleHandler for Ping {
        async fn handle(&self, _params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
            Ok(json!({"pong": true}))
        }
    }

    let rt = tokio_rt();
    rt.block_on(async {
        let mut catalog = ModuleCatalog::new();
        catalog.register("system", "ping", Ping);
        let registry = Arc::new(ResourceRegistry::new(&BridgeConfig::default(), Arc::new(SystemClock)));
        let ctx = test_ctx(registry);
        for _ in 0..50 {
            let result = catalog.dispatch("system", "ping", json!({}), &ctx).await.unwrap();
            assert_eq!(result["pong"], true);
        }
    });
}

#[tokio::test]
async fn cleanup_is_idempotent_in_steady_state() {
    let registry = ResourceRegistry::new(&BridgeConfig::default(), Arc::new(SystemClock));
    // Nothing stored: repeated reaps always report zero evicted.
    for _ in 0..5 {
        assert_eq!(registry.reap_idle().await, 0);
    }
}

#[test]
fn requests_total_equals_the_sum_of_every_outcome_bucket() {
    use bridge_core::metrics::MetricsCollector;
    use std::time::Duration;

    let metrics = MetricsCollector::new();
    for _ in 0..10 {
        metrics.record_received();
        metrics.record_outcome("m", "f", Duration::from_micros(1), true);
    }
    for _ in 0..4 {
        metrics.record_received();
        metrics.record_outcome("m", "f", Duration::from_micros(1), false);
    }
    for _ in 0..3 {
        metrics.record_received();
        metrics.record_throttle_rejection();
    }
    for _ in 0..2 {
        metrics.record_received();
        metrics.record_validation_rejection();
    }

    assert_eq!(
        metrics.requests_total(),
        metrics.requests_successful()
            + metrics.requests_failed()
            + metrics.throttle_rejections()
            + metrics.validation_rejections()
    );
}

/// A request that fails validation must never be counted as successful,
/// even though it still counts toward `requests_total`.
#[test]
fn validator_rejection_never_counts_as_a_success() {
    use bridge_core::metrics::MetricsCollector;
    let metrics = MetricsCollector::new();
    metrics.record_received();
    metrics.record_validation_rejection();
    assert_eq!(metrics.requests_successful(), 0);
    assert_eq!(metrics.requests_total(), 1);
}

/// A decoded response envelope round-trips through encode/decode without
/// losing its error classification.
#[test]
fn response_envelope_round_trips_error_fields() {
    let resp = ResponseEnvelope {
        success: false,
        result: None,
        error: Some("boom".to_string()),
        error_code: Some("handler_error".to_string()),
        details: None,
        request_id: Some("r1".to_string()),
        duration_ms: Some(5),
        daemon_error: None,
    };
    let bytes = encode(&resp).unwrap();
    let decoded = decode_response(&bytes).unwrap();
    assert!(!decoded.success);
    assert_eq!(decoded.error_code.as_deref(), Some("handler_error"));
    assert_eq!(decoded.request_id.as_deref(), Some("r1"));
}
