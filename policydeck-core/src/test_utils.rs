//! Test utilities for policydeck-core.
//!
//! This module provides a mock gateway for exercising the console without a
//! running gateway.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! policydeck-core = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::gateway::{methods, GatewayClient, RemoteError};

/// A mock gateway client.
///
/// Canned responses are returned per method on every call. When seeded with a
/// configuration document, `config.get` and `config.set` behave like a real
/// gateway: writes replace the document and bump the revision hash, and a
/// stale `baseHash` is rejected with [`RemoteError::Conflict`].
#[derive(Clone, Default)]
pub struct MockGatewayClient {
    responses: Arc<Mutex<HashMap<String, Result<Value, RemoteError>>>>,
    config: Arc<Mutex<Option<(Value, u64)>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockGatewayClient {
    /// Create a new mock with no responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `config.get`/`config.set` from an in-memory document.
    pub fn with_config(self, config: Value) -> Self {
        *self.config.lock().unwrap() = Some((config, 1));
        self
    }

    /// Answer every call to `method` with `response`.
    pub fn with_response(self, method: &str, response: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), Ok(response));
        self
    }

    /// Fail every call to `method` with `error`.
    pub fn with_error(self, method: &str, error: RemoteError) -> Self {
        self.fail(method, error);
        self
    }

    /// Start failing calls to `method` on an already shared mock.
    pub fn fail(&self, method: &str, error: RemoteError) {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), Err(error));
    }

    /// Stop overriding `method`.
    pub fn clear(&self, method: &str) {
        self.responses.lock().unwrap().remove(method);
    }

    /// The current configuration document, if seeded.
    pub fn config(&self) -> Option<Value> {
        self.config.lock().unwrap().as_ref().map(|(c, _)| c.clone())
    }

    /// Current revision hash of the seeded document.
    pub fn hash(&self) -> Option<String> {
        self.config
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, rev)| format!("rev-{}", rev))
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Parameters of every call to `method`.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Number of calls made to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }

    fn handle_config(&self, method: &str, params: &Value) -> Option<Result<Value, RemoteError>> {
        let mut guard = self.config.lock().unwrap();
        let (config, rev) = guard.as_mut()?;
        match method {
            methods::CONFIG_GET => Some(Ok(json!({
                "config": config.clone(),
                "hash": format!("rev-{}", rev),
            }))),
            methods::CONFIG_SET => {
                let current = format!("rev-{}", rev);
                if let Some(base) = params.get("baseHash").and_then(Value::as_str) {
                    if base != current {
                        return Some(Err(RemoteError::Conflict(format!(
                            "base hash {} does not match {}",
                            base, current
                        ))));
                    }
                }
                let raw = params.get("raw").and_then(Value::as_str).unwrap_or("");
                match serde_json::from_str(raw) {
                    Ok(next) => {
                        *config = next;
                        *rev += 1;
                        Some(Ok(json!({ "ok": true })))
                    }
                    Err(e) => Some(Err(RemoteError::request(method, e.to_string()))),
                }
            }
            _ => None,
        }
    }
}

#[async_trait]
impl GatewayClient for MockGatewayClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        if let Some(response) = self.responses.lock().unwrap().get(method) {
            return response.clone();
        }
        if let Some(response) = self.handle_config(method, &params) {
            return response;
        }
        Err(RemoteError::request(method, "no mock response configured"))
    }
}
