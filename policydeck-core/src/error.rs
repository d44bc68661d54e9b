//! Top-level error types for policydeck
//!
//! Most of the engine never fails across its boundaries: preset persistence
//! degrades silently and optimistic mutations roll back instead of returning
//! errors. This type covers the remaining fallible entry points, such as
//! loading the console and explicit saves.

use thiserror::Error;

use crate::gateway::RemoteError;
use crate::preset::StoreError;

/// Top-level error type for policydeck operations
///
/// - [`Error::Remote`] - The gateway rejected or never received a request
/// - [`Error::Conflict`] - The configuration changed underneath a write
/// - [`Error::Store`] - Durable preset storage failed
/// - [`Error::Config`] - Bad local configuration or arguments
#[derive(Debug, Error)]
pub enum Error {
    /// Gateway request failed
    #[error("gateway error: {0}")]
    Remote(String),

    /// Configuration was modified since it was read
    #[error("conflict: {0}")]
    Conflict(String),

    /// Preset storage failed
    #[error("storage error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this is a gateway error
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Returns true if a concurrent write won
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is a storage error
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if reloading and retrying could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Remote(_))
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Remote(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type for policydeck operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_error() {
        let err: Error = RemoteError::Conflict("stale hash".into()).into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());

        let err: Error = RemoteError::request("config.get", "unauthorized").into();
        assert!(err.is_remote());
        assert_eq!(
            err.to_string(),
            "gateway error: config.get failed: unauthorized"
        );
    }

    #[test]
    fn test_from_store_error() {
        let err: Error = StoreError::Write("disk full".into()).into();
        assert!(err.is_store());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "storage error: Failed to write record: disk full"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("missing store path".into());
        assert!(err.is_config());
        assert!(!err.is_remote());
    }
}
