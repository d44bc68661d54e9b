//! Command-line tooling for policydeck
//!
//! This crate provides:
//! - SQLite-based record storage for tool policy presets
//! - The `policydeck` command for managing presets and assignments
//! - Offline resolution and drift reports against a saved configuration

pub mod commands;
mod error;
pub mod store;

pub use commands::{App, Cli, Commands, PresetAction, PresetFields};
pub use error::CliError;
pub use store::SqliteRecordStore;
