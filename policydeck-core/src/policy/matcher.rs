//! Tool name normalization and allow/deny pattern matching.
//!
//! Patterns come in three forms:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `*` | Every tool id |
//! | `group:*` | Any id in the `group:` namespace |
//! | `exec` | Only `exec` (after normalization) |

use std::collections::HashSet;

/// The universal wildcard.
pub const WILDCARD: &str = "*";

/// Canonical spellings for tool names that have historical aliases.
const TOOL_NAME_ALIASES: &[(&str, &str)] = &[("bash", "exec"), ("apply-patch", "apply_patch")];

/// Canonicalize a tool id or pattern so equivalent spellings compare equal.
///
/// Trims, lowercases and maps known aliases. Idempotent.
pub fn normalize_tool_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    TOOL_NAME_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// Check a single tool id against a single pattern.
pub fn matches(tool_id: &str, pattern: &str) -> bool {
    let pattern = normalize_tool_name(pattern);
    if pattern.is_empty() {
        return false;
    }
    if pattern == WILDCARD {
        return true;
    }

    let tool_id = normalize_tool_name(tool_id);
    if let Some(namespace) = pattern.strip_suffix(":*") {
        // Keep the colon so "group:*" never matches "groupie"
        return tool_id.len() > namespace.len() + 1
            && tool_id.starts_with(namespace)
            && tool_id.as_bytes()[namespace.len()] == b':';
    }

    tool_id == pattern
}

/// True if any pattern in the list matches the tool id.
pub fn matches_any<S: AsRef<str>>(tool_id: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| matches(tool_id, p.as_ref()))
}

/// Clean a pattern list for storage.
///
/// Entries are trimmed, empty entries dropped and duplicates removed. The
/// first occurrence of each entry keeps its position.
pub fn normalize_list<S: AsRef<str>>(patterns: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    patterns
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .filter(|p| seen.insert(p.to_string()))
        .map(str::to_string)
        .collect()
}

/// Remove every entry that names the same tool as `tool_id`.
pub(crate) fn remove_tool(list: &mut Vec<String>, tool_id: &str) {
    let target = normalize_tool_name(tool_id);
    list.retain(|entry| normalize_tool_name(entry) != target);
}

/// Append `tool_id` unless an entry for the same tool is already present.
pub(crate) fn insert_tool(list: &mut Vec<String>, tool_id: &str) {
    let target = normalize_tool_name(tool_id);
    if !list.iter().any(|entry| normalize_tool_name(entry) == target) {
        list.push(tool_id.trim().to_string());
    }
}
