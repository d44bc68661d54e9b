//! Boundary to the remote configuration gateway.
//!
//! The gateway is reached only through named request/response calls. This
//! module defines that seam ([`GatewayClient`]), typed wrappers for the calls
//! the console makes ([`GatewayClientExt`]), and a typed view over the parts of
//! the configuration document that carry tool policies ([`config`]).

pub mod client;
pub mod config;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{AgentList, AgentSummary, ConfigSnapshot, GatewayClientExt, NewAgent};
pub use config::{AgentToAgentPolicy, AgentToolsConfig, SubagentPolicy, ToolsConfig};

/// Gateway method names.
pub mod methods {
    pub const CONFIG_GET: &str = "config.get";
    pub const CONFIG_SET: &str = "config.set";
    pub const AGENTS_LIST: &str = "agents.list";
    pub const AGENTS_CREATE: &str = "agents.create";
    pub const AGENTS_UPDATE: &str = "agents.update";
    pub const AGENTS_DELETE: &str = "agents.delete";
}

/// Errors returned by gateway calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The gateway rejected the request
    #[error("{method} failed: {message}")]
    Request { method: String, message: String },

    /// The request never reached the gateway or the connection dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway answered with a payload of the wrong shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The configuration changed since it was read
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RemoteError {
    pub fn request(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Returns true if the write lost a race against another writer
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Request/response transport to the gateway.
///
/// Implementations carry `params` to the named method and return its result
/// payload. Transport details are opaque to the policy engine.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RemoteError>;
}

#[async_trait]
impl<C: GatewayClient + ?Sized> GatewayClient for std::sync::Arc<C> {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        (**self).request(method, params).await
    }
}
