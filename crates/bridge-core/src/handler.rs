//! The handler contract and the context passed to every invocation.

use crate::clock::Clock;
use crate::error::BridgeError;
use crate::registry::ResourceRegistry;
use async_trait::async_trait;
use bridge_config::BridgeConfig;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single `(module, function)` operation. Implementations are pure across
/// calls — any persistent state lives in the registry, addressed by handle.
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError>;

    /// Optional per-handler schema: required top-level keys in `params`.
    /// The validator consults this after catalog-membership checks.
    fn required_params(&self) -> &[&'static str] {
        &[]
    }
}

/// Exposed to every handler invocation: the registry, a read-only config
/// view, a logger target, a clock, and a cancellation token wired to the
/// connection's handler timeout.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<ResourceRegistry>,
    pub config: Arc<BridgeConfig>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
    pub request_id: Option<String>,
}

impl HandlerContext {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        config: Arc<BridgeConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        HandlerContext {
            registry,
            config,
            clock,
            cancel: CancellationToken::new(),
            request_id: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
