//! Agent and provider to preset mappings.

use std::sync::Arc;

use serde::Serialize;

use super::repository::PresetRepository;
use super::types::{AssignmentScope, ToolPolicyPreset, ToolPolicyPresetAssignments};
use crate::policy::{are_policies_equivalent, ToolPolicy};

/// Result of looking up the preset assigned to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentLookup {
    /// No preset is assigned.
    Unassigned,
    /// The assigned preset id does not exist in the store.
    Missing(String),
    /// The assigned preset.
    Preset(ToolPolicyPreset),
}

impl AssignmentLookup {
    pub fn preset(&self) -> Option<&ToolPolicyPreset> {
        match self {
            AssignmentLookup::Preset(preset) => Some(preset),
            _ => None,
        }
    }
}

/// How a live policy compares with its assigned preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftStatus {
    Unassigned,
    MissingPreset { preset_id: String },
    InSync { preset: ToolPolicyPreset },
    Diverged { preset: ToolPolicyPreset },
}

impl DriftStatus {
    pub fn is_diverged(&self) -> bool {
        matches!(self, DriftStatus::Diverged { .. })
    }

    /// True when the operator should be warned.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            DriftStatus::Diverged { .. } | DriftStatus::MissingPreset { .. }
        )
    }
}

/// Compare a live policy with the preset an assignment points at.
pub fn drift_status(lookup: AssignmentLookup, live: &ToolPolicy) -> DriftStatus {
    match lookup {
        AssignmentLookup::Unassigned => DriftStatus::Unassigned,
        AssignmentLookup::Missing(preset_id) => DriftStatus::MissingPreset { preset_id },
        AssignmentLookup::Preset(preset) => {
            if are_policies_equivalent(&preset.to_policy(), live) {
                DriftStatus::InSync { preset }
            } else {
                DriftStatus::Diverged { preset }
            }
        }
    }
}

/// An assignment whose preset no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingAssignment {
    pub scope: AssignmentScope,
    pub key: String,
    pub preset_id: String,
}

/// Registry of preset assignments.
///
/// Writes are permissive: a preset id is not checked against the store when it
/// is assigned. Lookups report ids that no longer resolve.
#[derive(Clone)]
pub struct AssignmentRegistry {
    repository: Arc<PresetRepository>,
}

impl AssignmentRegistry {
    pub fn new(repository: Arc<PresetRepository>) -> Self {
        Self { repository }
    }

    pub async fn load(&self) -> ToolPolicyPresetAssignments {
        self.repository.load().await.assignments
    }

    /// Set or clear the preset assigned to one key.
    pub async fn assign(
        &self,
        scope: AssignmentScope,
        key: &str,
        preset_id: Option<&str>,
    ) -> ToolPolicyPresetAssignments {
        self.bulk_assign(scope, &[key], preset_id).await
    }

    /// Set or clear the preset assigned to every key in one write.
    ///
    /// Blank keys are ignored. A blank preset id clears the mapping.
    pub async fn bulk_assign<S: AsRef<str>>(
        &self,
        scope: AssignmentScope,
        keys: &[S],
        preset_id: Option<&str>,
    ) -> ToolPolicyPresetAssignments {
        let keys: Vec<&str> = keys
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .collect();
        let preset_id = preset_id.map(str::trim).filter(|id| !id.is_empty());

        if keys.is_empty() {
            return self.load().await;
        }

        self.repository
            .modify(|store| {
                let map = store.assignments.scope_mut(scope);
                let mut changed = false;
                for key in &keys {
                    let previous = match preset_id {
                        Some(id) => map.insert(key.to_string(), id.to_string()),
                        None => map.remove(*key),
                    };
                    changed |= previous.as_deref() != preset_id;
                }
                if changed {
                    log::debug!(
                        "Assigned {:?} to {} {} key(s)",
                        preset_id,
                        keys.len(),
                        scope
                    );
                }
                changed
            })
            .await
            .assignments
    }

    /// Look up the preset assigned to a key.
    pub async fn resolve(&self, scope: AssignmentScope, key: &str) -> AssignmentLookup {
        let store = self.repository.load().await;
        match store.assignments.get(scope, key) {
            None => AssignmentLookup::Unassigned,
            Some(id) => match store.preset(id) {
                Some(preset) => AssignmentLookup::Preset(preset.clone()),
                None => AssignmentLookup::Missing(id.to_string()),
            },
        }
    }

    /// Every assignment whose preset does not exist.
    pub async fn dangling(&self) -> Vec<DanglingAssignment> {
        let store = self.repository.load().await;
        [AssignmentScope::Agent, AssignmentScope::Provider]
            .into_iter()
            .flat_map(|scope| {
                store
                    .assignments
                    .scope(scope)
                    .iter()
                    .filter(|(_, id)| store.preset(id).is_none())
                    .map(move |(key, id)| DanglingAssignment {
                        scope,
                        key: key.clone(),
                        preset_id: id.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
