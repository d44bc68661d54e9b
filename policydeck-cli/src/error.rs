//! CLI-specific error types

use thiserror::Error;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    /// Preset storage error
    #[error("Store error: {0}")]
    Store(#[from] policydeck_core::StoreError),

    /// Malformed configuration document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (filesystem, stdout, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A preset id that does not exist
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    /// An argument the command cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
