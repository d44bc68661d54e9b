//! # Policydeck
//!
//! Tool access policy engine for agent gateways.
//!
//! Policydeck decides which tools an agent (or an agent on a given provider)
//! may use, lets operators save those decisions as reusable, versioned presets,
//! and keeps a console's local view consistent with the remote configuration
//! through optimistic writes.
//!
//! ## Quick Start
//!
//! ```rust
//! use policydeck_core::policy::{apply_tool_updates, is_allowed, Profile, ToolPolicy, ToolToggle};
//!
//! let policy = ToolPolicy::from_profile(Profile::Coding);
//! assert!(is_allowed("exec", &policy).allowed);
//!
//! // Turn exec off and cron on in one batch
//! let overrides = apply_tool_updates(
//!     &policy,
//!     &[ToolToggle::disable("exec"), ToolToggle::enable("cron")],
//! )
//! .unwrap();
//! assert_eq!(overrides.deny, vec!["exec"]);
//! assert_eq!(overrides.also_allow, vec!["cron"]);
//! ```
//!
//! ## Modules
//!
//! - **[`policy`]**: Matching, profiles, the tool catalog and resolution
//! - **[`preset`]**: Versioned preset store, migration and assignments
//! - **[`optimistic`]**: Apply-then-confirm-or-rollback mutation executor
//! - **[`gateway`]**: Request/response boundary to the remote configuration
//! - **[`console`]**: Read and write accessors for a policy console
//! - **[`events`]**: Console events and hooks
//!
//! ## Persistence
//!
//! Presets are stored through the [`preset::RecordStore`] trait. The crate ships
//! an in-memory store and a JSON file store; other back-ends implement the
//! trait.

pub mod console;
pub mod error;
pub mod events;
pub mod gateway;
pub mod optimistic;
pub mod policy;
pub mod preset;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use console::{ConsoleConfig, ToolPolicyConsole};
pub use error::{Error, Result};
pub use events::{ConsoleEvent, ConsoleHook, Hooks};
pub use gateway::{GatewayClient, GatewayClientExt, RemoteError};
pub use optimistic::{snapshot, MutationLocks, MutationPhase, OptimisticMutation};
pub use policy::{
    are_policies_equivalent, is_allowed, matches, matches_any, normalize_tool_name, ExecSecurity,
    ExecSettings, Profile, ProfileOrCustom, ToolAccess, ToolPolicy, ToolToggle,
};
pub use preset::{
    AssignmentLookup, AssignmentRegistry, AssignmentScope, DriftStatus, FileRecordStore,
    MemoryRecordStore, PersistedStore, PresetInput, PresetRepository, PresetStore, RecordStore,
    StoreError, ToolPolicyPreset, ToolPolicyPresetAssignments,
};
