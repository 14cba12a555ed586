//! The module dispatcher: a registration-time table mapping
//! `(module, function)` to a handler, looked up at request time.

use crate::error::BridgeError;
use crate::handler::{HandlerContext, ModuleHandler};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

#[derive(Default)]
pub struct ModuleCatalog {
    handlers: FxHashMap<(String, String), Arc<dyn ModuleHandler>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        ModuleCatalog { handlers: FxHashMap::default() }
    }

    /// Registers a handler under `module.function`. Startup-only: there is
    /// no unregister, matching the "registration-time table" design note.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        function: impl Into<String>,
        handler: impl ModuleHandler + 'static,
    ) {
        self.handlers
            .insert((module.into(), function.into()), Arc::new(handler));
    }

    pub fn contains(&self, module: &str, function: &str) -> bool {
        self.handlers
            .contains_key(&(module.to_string(), function.to_string()))
    }

    pub fn lookup(&self, module: &str, function: &str) -> Option<Arc<dyn ModuleHandler>> {
        self.handlers.get(&(module.to_string(), function.to_string())).cloned()
    }

    /// Every registered `(module, function)` pair, for `system.config`.
    pub fn catalog_surface(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self.handlers.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    pub async fn dispatch(
        &self,
        module: &str,
        function: &str,
        params: Value,
        ctx: &HandlerContext,
    ) -> Result<Value, BridgeError> {
        match self.lookup(module, function) {
            Some(handler) => handler.handle(params, ctx).await,
            None => Err(BridgeError::UnknownHandler(module.to_string(), function.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::ResourceRegistry;
    use async_trait::async_trait;
    use bridge_config::BridgeConfig;

    struct Echo;

    #[async_trait]
    impl ModuleHandler for Echo {
        async fn handle(&self, params: Value, _ctx: &HandlerContext) -> Result<Value, BridgeError> {
            Ok(params)
        }
    }

    fn ctx() -> HandlerContext {
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        HandlerContext::new(Arc::new(ResourceRegistry::new(&config, clock.clone())), config, clock)
    }

    #[tokio::test]
    async fn dispatches_to_a_registered_handler() {
        let mut catalog = ModuleCatalog::new();
        catalog.register("echo", "call", Echo);
        let result = catalog
            .dispatch("echo", "call", serde_json::json!({"x": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["x"], 1);
    }

    #[tokio::test]
    async fn unregistered_pair_is_unknown_handler() {
        let catalog = ModuleCatalog::new();
        let err = catalog
            .dispatch("nope", "nope", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_handler");
    }
}
