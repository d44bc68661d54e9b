//! Saved tool policy presets and their assignments.
//!
//! The whole collection lives in one persisted envelope that is re-read on
//! every access and rewritten as a whole on every mutation:
//!
//! ```text
//! { "version": 2, "presets": [...], "assignments": { "agents": {}, "providers": {} } }
//! ```
//!
//! An older `version: 1` envelope is migrated once, the first time the store is
//! read without a current envelope.
//!
//! # Example
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use policydeck_core::policy::Profile;
//! use policydeck_core::preset::{
//!     AssignmentRegistry, AssignmentScope, PresetInput, PresetRepository, PresetStore,
//! };
//!
//! let repository = Arc::new(PresetRepository::in_memory());
//! let presets = PresetStore::new(repository.clone());
//! let assignments = AssignmentRegistry::new(repository);
//!
//! let created = presets
//!     .create(PresetInput::new("Locked down", Profile::Minimal).with_deny(&["exec"]))
//!     .await;
//! assignments
//!     .assign(AssignmentScope::Agent, "a1", Some(created[0].id.as_str()))
//!     .await;
//!
//! presets.delete(&created[0].id).await;
//! assert!(assignments.load().await.is_empty());
//! # });
//! ```

pub mod assignments;
pub mod codec;
pub mod repository;
pub mod store;
pub mod types;

pub use assignments::{
    drift_status, AssignmentLookup, AssignmentRegistry, DanglingAssignment, DriftStatus,
};
pub use repository::{
    FileRecordStore, MemoryRecordStore, PresetRepository, RecordStore, StoreError, StoreKeys,
    LEGACY_STORE_KEY, STORE_KEY,
};
pub use store::{PresetStore, COPY_SUFFIX};
pub use types::{
    AssignmentScope, PersistedStore, PresetInput, ToolPolicyPreset, ToolPolicyPresetAssignments,
    LEGACY_STORE_VERSION, STORE_VERSION,
};
