//! `{apiName -> {operationName -> handler}}`, built once at startup.

use crate::handler::OperationHandler;
use dashmap::DashMap;
use std::sync::Arc;

/// Registered operation handlers, keyed by `(apiName, operationName)`.
///
/// Per Design Note "Global state": constructed once during startup and
/// shared behind an `Arc`, not reached for as an ambient global.
#[derive(Default)]
pub struct OperationRegistry {
    handlers: DashMap<(String, String), Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register (or replace) the handler for `(api_name, op_name)`.
    pub fn register(
        &self,
        api_name: impl Into<String>,
        op_name: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) {
        self.handlers.insert((api_name.into(), op_name.into()), handler);
    }

    /// Look up the handler for `(api_name, op_name)`.
    pub fn get(&self, api_name: &str, op_name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers
            .get(&(api_name.to_string(), op_name.to_string()))
            .map(|h| h.clone())
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
