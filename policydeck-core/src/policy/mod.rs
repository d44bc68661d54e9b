//! Tool access policy matching and resolution.
//!
//! # Overview
//!
//! - **[`matcher`]**: Tool name normalization and wildcard pattern matching
//! - **[`profile`]**: Named profiles and their fixed base allow sets
//! - **[`catalog`]**: The tools shown in the console, grouped into sections
//! - **[`resolver`]**: Effective allow/deny decisions and override editing
//! - **[`exec`]**: Command security for an allowed `exec` tool
//!
//! # Precedence
//!
//! In profile mode, deny always overrides both the profile base set and
//! `also_allow`. In explicit mode (non-empty `allow`), only `allow` counts.
//!
//! # Example
//!
//! ```rust
//! use policydeck_core::policy::{is_allowed, Profile, ToolPolicy};
//!
//! let policy = ToolPolicy::from_profile(Profile::Coding).with_deny(&["exec"]);
//!
//! assert!(is_allowed("read", &policy).allowed);
//! assert!(!is_allowed("exec", &policy).allowed);
//! ```

pub mod catalog;
pub mod exec;
pub mod matcher;
pub mod profile;
pub mod resolver;

pub use catalog::{CatalogSection, CatalogTool, RiskLevel};
pub use exec::{reconcile_exec_settings, ExecSecurity, ExecSettings, UnknownExecSecurity};
pub use matcher::{matches, matches_any, normalize_list, normalize_tool_name};
pub use profile::{
    detect_profile, resolve_base_policy, BasePolicy, Profile, ProfileOrCustom, UnknownProfile,
};
pub use resolver::{
    apply_tool_updates, are_policies_equivalent, detected_profile, enabled_map, is_allowed,
    section_toggles, switch_profile, tool_counts, tool_states, with_overrides, ToolAccess,
    ToolCounts, ToolOverrides, ToolPolicy, ToolState, ToolToggle,
};
