//! Create, update, duplicate and delete operations over the preset envelope.

use std::sync::Arc;

use super::repository::PresetRepository;
use super::types::{PresetInput, ToolPolicyPreset};

/// Suffix appended to the name of a duplicated preset.
pub const COPY_SUFFIX: &str = " Copy";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The collection of saved presets.
///
/// Every operation re-reads the envelope, applies its change and returns the
/// resulting collection sorted most-recently-updated first. Invalid input
/// (blank name, blank or unknown id) is a silent no-op that returns the
/// unchanged collection.
#[derive(Clone)]
pub struct PresetStore {
    repository: Arc<PresetRepository>,
}

impl PresetStore {
    pub fn new(repository: Arc<PresetRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<PresetRepository> {
        &self.repository
    }

    /// All presets, most recently updated first.
    pub async fn list(&self) -> Vec<ToolPolicyPreset> {
        self.repository.load().await.sorted_presets()
    }

    pub async fn get(&self, id: &str) -> Option<ToolPolicyPreset> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        self.repository.load().await.preset(id).cloned()
    }

    /// Insert a new preset with `version = 1`.
    pub async fn create(&self, input: PresetInput) -> Vec<ToolPolicyPreset> {
        let Some(name) = input.valid_name().map(str::to_string) else {
            log::debug!("Ignoring preset create with blank name");
            return self.list().await;
        };
        let (also_allow, deny) = input.normalized_lists();

        self.repository
            .modify(|store| {
                let now = now_ms();
                let preset = ToolPolicyPreset {
                    id: new_id(),
                    name,
                    description: input.description.trim().to_string(),
                    profile: input.profile,
                    also_allow,
                    deny,
                    version: 1,
                    created_at_ms: now,
                    updated_at_ms: now,
                };
                log::debug!("Creating preset {} ({})", preset.id, preset.name);
                store.presets.insert(0, preset);
                true
            })
            .await
            .sorted_presets()
    }

    /// Replace the mutable fields of a preset and bump its version.
    pub async fn update(&self, id: &str, input: PresetInput) -> Vec<ToolPolicyPreset> {
        let id = id.trim();
        let name = input.valid_name().map(str::to_string);
        let (Some(name), false) = (name, id.is_empty()) else {
            log::debug!("Ignoring preset update with blank id or name");
            return self.list().await;
        };
        let (also_allow, deny) = input.normalized_lists();

        self.repository
            .modify(|store| {
                let Some(preset) = store.presets.iter_mut().find(|p| p.id == id) else {
                    log::debug!("Ignoring update of unknown preset {}", id);
                    return false;
                };
                preset.name = name;
                preset.description = input.description.trim().to_string();
                preset.profile = input.profile;
                preset.also_allow = also_allow;
                preset.deny = deny;
                preset.version += 1;
                preset.updated_at_ms = now_ms();
                true
            })
            .await
            .sorted_presets()
    }

    /// Clone a preset under a new id with `version = 1`. Assignments are not
    /// copied.
    pub async fn duplicate(&self, id: &str) -> Vec<ToolPolicyPreset> {
        let id = id.trim();
        self.repository
            .modify(|store| {
                let Some(source) = store.preset(id) else {
                    log::debug!("Ignoring duplicate of unknown preset {}", id);
                    return false;
                };
                let now = now_ms();
                let copy = ToolPolicyPreset {
                    id: new_id(),
                    name: format!("{}{}", source.name, COPY_SUFFIX),
                    version: 1,
                    created_at_ms: now,
                    updated_at_ms: now,
                    ..source.clone()
                };
                store.presets.insert(0, copy);
                true
            })
            .await
            .sorted_presets()
    }

    /// Remove a preset and every assignment pointing at it in one write.
    pub async fn delete(&self, id: &str) -> Vec<ToolPolicyPreset> {
        let id = id.trim();
        self.repository
            .modify(|store| {
                let before = store.presets.len();
                store.presets.retain(|p| p.id != id);
                let removed = before != store.presets.len();
                let pruned = store.assignments.prune(id);
                if removed || pruned > 0 {
                    log::debug!("Deleted preset {} and {} assignments", id, pruned);
                }
                removed || pruned > 0
            })
            .await
            .sorted_presets()
    }
}
