//! Preset, assignment and envelope types.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::policy::{normalize_list, Profile, ToolPolicy};

/// Schema version of the current persisted envelope.
pub const STORE_VERSION: u32 = 2;

/// Schema version of the legacy envelope consulted only for migration.
pub const LEGACY_STORE_VERSION: u32 = 1;

/// A named, versioned, reusable tool policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicyPreset {
    /// Unique, immutable identifier.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub profile: Profile,
    #[serde(default)]
    pub also_allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    /// Starts at 1 and increments by exactly one on every update.
    pub version: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ToolPolicyPreset {
    /// The policy this preset applies when assigned.
    pub fn to_policy(&self) -> ToolPolicy {
        ToolPolicy {
            profile: Some(self.profile.as_str().to_string()),
            allow: Vec::new(),
            also_allow: self.also_allow.clone(),
            deny: self.deny.clone(),
        }
    }
}

/// The mutable fields of a preset, as accepted by create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub profile: Profile,
    #[serde(default)]
    pub also_allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PresetInput {
    pub fn new(name: impl Into<String>, profile: Profile) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            profile,
            also_allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_also_allow<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.also_allow = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn with_deny<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.deny = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    /// Capture a live policy as preset input.
    ///
    /// Returns `None` when the policy cannot be expressed as a preset: explicit
    /// mode, or no recognized profile.
    pub fn from_policy(name: impl Into<String>, policy: &ToolPolicy) -> Option<Self> {
        if policy.is_explicit() {
            return None;
        }
        let profile = policy.parsed_profile()?;
        Some(Self {
            name: name.into(),
            description: String::new(),
            profile,
            also_allow: policy.also_allow.clone(),
            deny: policy.deny.clone(),
        })
    }

    /// The trimmed name, or `None` when it is blank.
    pub(crate) fn valid_name(&self) -> Option<&str> {
        let name = self.name.trim();
        (!name.is_empty()).then_some(name)
    }

    pub(crate) fn normalized_lists(&self) -> (Vec<String>, Vec<String>) {
        (normalize_list(&self.also_allow), normalize_list(&self.deny))
    }
}

/// Which kind of key an assignment maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentScope {
    Agent,
    Provider,
}

impl std::fmt::Display for AssignmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentScope::Agent => write!(f, "agent"),
            AssignmentScope::Provider => write!(f, "provider"),
        }
    }
}

impl FromStr for AssignmentScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "agent" | "agents" => Ok(AssignmentScope::Agent),
            "provider" | "providers" => Ok(AssignmentScope::Provider),
            other => Err(format!("unknown assignment scope: {}", other)),
        }
    }
}

/// Agent and provider keys mapped to preset ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicyPresetAssignments {
    #[serde(default)]
    pub agents: BTreeMap<String, String>,
    #[serde(default)]
    pub providers: BTreeMap<String, String>,
}

impl ToolPolicyPresetAssignments {
    pub fn scope(&self, scope: AssignmentScope) -> &BTreeMap<String, String> {
        match scope {
            AssignmentScope::Agent => &self.agents,
            AssignmentScope::Provider => &self.providers,
        }
    }

    pub fn scope_mut(&mut self, scope: AssignmentScope) -> &mut BTreeMap<String, String> {
        match scope {
            AssignmentScope::Agent => &mut self.agents,
            AssignmentScope::Provider => &mut self.providers,
        }
    }

    /// The preset id assigned to a key, if any.
    pub fn get(&self, scope: AssignmentScope, key: &str) -> Option<&str> {
        self.scope(scope).get(key.trim()).map(String::as_str)
    }

    /// Remove every entry pointing at `preset_id`. Returns how many were removed.
    pub fn prune(&mut self, preset_id: &str) -> usize {
        let before = self.agents.len() + self.providers.len();
        self.agents.retain(|_, id| id != preset_id);
        self.providers.retain(|_, id| id != preset_id);
        before - (self.agents.len() + self.providers.len())
    }

    /// True if any entry in either scope points at `preset_id`.
    pub fn references(&self, preset_id: &str) -> bool {
        self.agents.values().any(|id| id == preset_id)
            || self.providers.values().any(|id| id == preset_id)
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.providers.is_empty()
    }
}

/// The durable envelope, written as a whole on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStore {
    pub version: u32,
    pub presets: Vec<ToolPolicyPreset>,
    pub assignments: ToolPolicyPresetAssignments,
}

impl Default for PersistedStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            presets: Vec::new(),
            assignments: ToolPolicyPresetAssignments::default(),
        }
    }
}

impl PersistedStore {
    /// Presets in canonical read order: most recently updated first.
    pub fn sorted_presets(&self) -> Vec<ToolPolicyPreset> {
        let mut presets = self.presets.clone();
        presets.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
        presets
    }

    pub fn preset(&self, id: &str) -> Option<&ToolPolicyPreset> {
        self.presets.iter().find(|p| p.id == id)
    }
}
