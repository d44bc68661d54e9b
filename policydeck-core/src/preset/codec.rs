//! Strict parsing of persisted envelopes and legacy migration.
//!
//! Decoding produces either a fully-typed [`PersistedStore`] or `None`. An
//! envelope with the wrong top-level shape or version is treated as absent.
//! Individual preset records that fail validation are dropped with a warning
//! so one bad record does not discard the rest.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use super::types::{
    PersistedStore, ToolPolicyPreset, ToolPolicyPresetAssignments, LEGACY_STORE_VERSION,
    STORE_VERSION,
};
use crate::policy::{normalize_list, Profile};

/// Preset record as written by the current schema.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPreset {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    profile: String,
    #[serde(default)]
    also_allow: Option<Vec<String>>,
    #[serde(default)]
    deny: Option<Vec<String>>,
    version: u64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

/// Preset record from the version 1 schema: no version counter and at most
/// one timestamp.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPreset {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    profile: String,
    #[serde(default)]
    also_allow: Option<Vec<String>>,
    #[serde(default)]
    deny: Option<Vec<String>>,
    #[serde(default)]
    created_at_ms: Option<i64>,
    #[serde(default)]
    updated_at_ms: Option<i64>,
}

/// Common validated fields of either record shape.
struct ValidFields {
    id: String,
    name: String,
    description: String,
    profile: Profile,
    also_allow: Vec<String>,
    deny: Vec<String>,
}

fn validate_fields(
    id: &str,
    name: &str,
    description: Option<String>,
    profile: &str,
    also_allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
) -> Option<ValidFields> {
    let id = id.trim();
    let name = name.trim();
    if id.is_empty() || name.is_empty() {
        return None;
    }
    let profile = profile.parse::<Profile>().ok()?;
    Some(ValidFields {
        id: id.to_string(),
        name: name.to_string(),
        description: description.unwrap_or_default().trim().to_string(),
        profile,
        also_allow: normalize_list(&also_allow.unwrap_or_default()),
        deny: normalize_list(&deny.unwrap_or_default()),
    })
}

/// Split a JSON document into its version tag and preset array.
fn envelope_parts(raw: &str) -> Option<(u64, Value, Option<Value>)> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let mut object = match value {
        Value::Object(map) => map,
        _ => return None,
    };
    let version = object.get("version")?.as_u64()?;
    let presets = object.remove("presets")?;
    if !presets.is_array() {
        return None;
    }
    let assignments = object.remove("assignments");
    Some((version, presets, assignments))
}

/// Keep the first record for each id.
fn dedupe_by_id(presets: Vec<ToolPolicyPreset>) -> Vec<ToolPolicyPreset> {
    let mut seen = HashSet::new();
    presets
        .into_iter()
        .filter(|p| {
            let fresh = seen.insert(p.id.clone());
            if !fresh {
                log::warn!("dropping duplicate preset record with id {}", p.id);
            }
            fresh
        })
        .collect()
}

fn decode_assignment_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(key, preset_id)| {
            let key = key.trim();
            let preset_id = preset_id.as_str()?.trim();
            (!key.is_empty() && !preset_id.is_empty())
                .then(|| (key.to_string(), preset_id.to_string()))
        })
        .collect()
}

fn decode_assignments(value: Option<Value>) -> ToolPolicyPresetAssignments {
    match value {
        Some(Value::Object(map)) => ToolPolicyPresetAssignments {
            agents: decode_assignment_map(map.get("agents")),
            providers: decode_assignment_map(map.get("providers")),
        },
        _ => ToolPolicyPresetAssignments::default(),
    }
}

/// Decode a current-version envelope.
pub fn decode_current(raw: &str) -> Option<PersistedStore> {
    let (version, presets, assignments) = envelope_parts(raw)?;
    if version != u64::from(STORE_VERSION) {
        return None;
    }

    let presets = presets
        .as_array()?
        .iter()
        .filter_map(|record| {
            let parsed: RawPreset = match serde_json::from_value(record.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("dropping malformed preset record: {}", e);
                    return None;
                }
            };
            if parsed.version == 0 {
                log::warn!("dropping preset {} with version 0", parsed.id);
                return None;
            }
            let fields = validate_fields(
                &parsed.id,
                &parsed.name,
                parsed.description,
                &parsed.profile,
                parsed.also_allow,
                parsed.deny,
            );
            let Some(fields) = fields else {
                log::warn!("dropping invalid preset record {}", parsed.id);
                return None;
            };
            Some(ToolPolicyPreset {
                id: fields.id,
                name: fields.name,
                description: fields.description,
                profile: fields.profile,
                also_allow: fields.also_allow,
                deny: fields.deny,
                version: parsed.version,
                created_at_ms: parsed.created_at_ms,
                updated_at_ms: parsed.updated_at_ms,
            })
        })
        .collect();

    Some(PersistedStore {
        version: STORE_VERSION,
        presets: dedupe_by_id(presets),
        assignments: decode_assignments(assignments),
    })
}

/// Decode a legacy envelope and convert it to the current shape.
///
/// Each preset gets `version = 1`. A single legacy timestamp fills both
/// `created_at_ms` and `updated_at_ms`; `now_ms` is used only when the record
/// carries no timestamp at all. Assignments start empty.
pub fn decode_legacy(raw: &str, now_ms: i64) -> Option<PersistedStore> {
    let (version, presets, _) = envelope_parts(raw)?;
    if version != u64::from(LEGACY_STORE_VERSION) {
        return None;
    }

    let presets = presets
        .as_array()?
        .iter()
        .filter_map(|record| {
            let parsed: LegacyPreset = match serde_json::from_value(record.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("dropping malformed legacy preset record: {}", e);
                    return None;
                }
            };
            let created_at_ms = parsed
                .created_at_ms
                .or(parsed.updated_at_ms)
                .unwrap_or(now_ms);
            let updated_at_ms = parsed.updated_at_ms.unwrap_or(created_at_ms);
            let fields = validate_fields(
                &parsed.id,
                &parsed.name,
                parsed.description,
                &parsed.profile,
                parsed.also_allow,
                parsed.deny,
            );
            let Some(fields) = fields else {
                log::warn!("dropping invalid legacy preset record {}", parsed.id);
                return None;
            };
            Some(ToolPolicyPreset {
                id: fields.id,
                name: fields.name,
                description: fields.description,
                profile: fields.profile,
                also_allow: fields.also_allow,
                deny: fields.deny,
                version: 1,
                created_at_ms,
                updated_at_ms,
            })
        })
        .collect();

    Some(PersistedStore {
        version: STORE_VERSION,
        presets: dedupe_by_id(presets),
        assignments: ToolPolicyPresetAssignments::default(),
    })
}

/// Serialize an envelope for storage.
pub fn encode(store: &PersistedStore) -> Result<String, serde_json::Error> {
    serde_json::to_string(store)
}
