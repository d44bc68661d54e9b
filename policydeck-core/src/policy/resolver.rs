//! Effective tool access resolution.
//!
//! A [`ToolPolicy`] is in one of two modes:
//!
//! - **Explicit mode**: `allow` is non-empty. Only `allow` decides; `profile`,
//!   `also_allow` and `deny` are ignored.
//! - **Profile mode**: the profile's base set plus `also_allow`, minus `deny`.
//!   Deny always wins over both the base set and `also_allow`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::catalog::{self, CatalogTool, RiskLevel};
use super::matcher::{insert_tool, matches_any, normalize_list, remove_tool};
use super::profile::{detect_profile, resolve_base_policy, Profile, ProfileOrCustom};

/// Tool policy for one scope (global, agent, or provider).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicy {
    /// Named profile. Kept as raw text so unknown names resolve fail-closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Exhaustive allow list. Non-empty switches the policy to explicit mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    /// Extra patterns allowed on top of the profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_allow: Vec<String>,

    /// Patterns denied in profile mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// A profile-mode policy with no overrides.
    pub fn from_profile(profile: Profile) -> Self {
        Self {
            profile: Some(profile.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn with_also_allow<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.also_allow = normalize_list(patterns);
        self
    }

    pub fn with_deny<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.deny = normalize_list(patterns);
        self
    }

    pub fn with_allow<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.allow = normalize_list(patterns);
        self
    }

    /// True when a non-empty `allow` list replaces profile resolution.
    ///
    /// Explicit-mode policies are not editable through profile or override
    /// controls.
    pub fn is_explicit(&self) -> bool {
        self.allow.iter().any(|p| !p.trim().is_empty())
    }

    /// True when no field is set at all.
    pub fn is_empty(&self) -> bool {
        self.profile.as_deref().map_or(true, |p| p.trim().is_empty())
            && self.allow.is_empty()
            && self.also_allow.is_empty()
            && self.deny.is_empty()
    }

    /// The parsed profile, if the stored name is recognized.
    pub fn parsed_profile(&self) -> Option<Profile> {
        self.profile.as_deref().and_then(|p| p.parse().ok())
    }
}

/// Resolution result for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAccess {
    /// Final decision.
    pub allowed: bool,
    /// Allowed by the profile base set (or by `allow` in explicit mode).
    pub base_allowed: bool,
    /// Matched by the deny list (always false in explicit mode).
    pub denied: bool,
}

/// Resolve whether a tool is allowed under a policy.
pub fn is_allowed(tool_id: &str, policy: &ToolPolicy) -> ToolAccess {
    if policy.is_explicit() {
        let allowed = matches_any(tool_id, &policy.allow);
        return ToolAccess {
            allowed,
            base_allowed: allowed,
            denied: false,
        };
    }

    let base_allowed = policy
        .profile
        .as_deref()
        .and_then(resolve_base_policy)
        .map(|base| matches_any(tool_id, &base.allow))
        .unwrap_or(false);
    let extra_allowed = matches_any(tool_id, &policy.also_allow);
    let denied = matches_any(tool_id, &policy.deny);

    ToolAccess {
        allowed: (base_allowed || extra_allowed) && !denied,
        base_allowed,
        denied,
    }
}

/// A requested on/off change for a single tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolToggle {
    pub tool_id: String,
    pub enabled: bool,
}

impl ToolToggle {
    pub fn enable(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            enabled: true,
        }
    }

    pub fn disable(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            enabled: false,
        }
    }
}

/// The override lists produced by a batch of toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverrides {
    pub also_allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Compute new `also_allow`/`deny` lists for a batch of toggles.
///
/// All toggles are applied to one working copy so the caller persists a single
/// consistent update. Returns `None` for explicit-mode policies, which cannot
/// be edited through overrides.
///
/// Only entries naming the tool itself are added or removed. A wildcard deny
/// such as `group:*` stays in place and keeps winning.
pub fn apply_tool_updates(policy: &ToolPolicy, updates: &[ToolToggle]) -> Option<ToolOverrides> {
    if policy.is_explicit() {
        return None;
    }

    let mut also_allow = normalize_list(&policy.also_allow);
    let mut deny = normalize_list(&policy.deny);

    for update in updates {
        let tool_id = update.tool_id.trim();
        if tool_id.is_empty() {
            continue;
        }
        if update.enabled {
            let base_allowed = is_allowed(tool_id, policy).base_allowed;
            if !base_allowed {
                insert_tool(&mut also_allow, tool_id);
            }
            remove_tool(&mut deny, tool_id);
        } else {
            remove_tool(&mut also_allow, tool_id);
            insert_tool(&mut deny, tool_id);
        }
    }

    Some(ToolOverrides { also_allow, deny })
}

/// Return a copy of `policy` with the overrides swapped in.
pub fn with_overrides(policy: &ToolPolicy, overrides: ToolOverrides) -> ToolPolicy {
    ToolPolicy {
        also_allow: overrides.also_allow,
        deny: overrides.deny,
        ..policy.clone()
    }
}

/// Switch a policy to another profile.
///
/// `deny` is always kept: denials are explicit operator intent and survive
/// profile changes. `also_allow` is cleared only on request.
pub fn switch_profile(
    policy: &ToolPolicy,
    profile: Option<Profile>,
    clear_also_allow: bool,
) -> ToolPolicy {
    ToolPolicy {
        profile: profile.map(|p| p.as_str().to_string()),
        allow: policy.allow.clone(),
        also_allow: if clear_also_allow {
            Vec::new()
        } else {
            policy.also_allow.clone()
        },
        deny: policy.deny.clone(),
    }
}

fn trimmed_set(list: &[String]) -> BTreeSet<&str> {
    list.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Two policies are equivalent when the profile is identical and the
/// `also_allow` and `deny` sets are equal, ignoring order, duplicates and
/// surrounding whitespace.
pub fn are_policies_equivalent(a: &ToolPolicy, b: &ToolPolicy) -> bool {
    let profile_a = a.profile.as_deref().map(str::trim).unwrap_or("");
    let profile_b = b.profile.as_deref().map(str::trim).unwrap_or("");
    profile_a == profile_b
        && trimmed_set(&a.also_allow) == trimmed_set(&b.also_allow)
        && trimmed_set(&a.deny) == trimmed_set(&b.deny)
}

/// A catalog tool together with its resolved access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolState {
    pub section: &'static str,
    pub tool: &'static CatalogTool,
    pub access: ToolAccess,
}

/// Enabled and total tool counts over the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCounts {
    pub enabled: usize,
    pub total: usize,
    /// Enabled tools rated [`RiskLevel::High`].
    pub high_risk: usize,
}

/// Resolve every catalog tool in display order.
pub fn tool_states(policy: &ToolPolicy) -> Vec<ToolState> {
    catalog::SECTIONS
        .iter()
        .flat_map(|section| {
            section.tools.iter().map(move |tool| ToolState {
                section: section.id,
                tool,
                access: is_allowed(tool.id, policy),
            })
        })
        .collect()
}

pub fn tool_counts(policy: &ToolPolicy) -> ToolCounts {
    let states = tool_states(policy);
    let enabled = || states.iter().filter(|s| s.access.allowed);
    ToolCounts {
        enabled: enabled().count(),
        total: states.len(),
        high_risk: enabled().filter(|s| s.tool.risk == RiskLevel::High).count(),
    }
}

/// The catalog-wide enabled map for a policy.
pub fn enabled_map(policy: &ToolPolicy) -> BTreeMap<String, bool> {
    tool_states(policy)
        .into_iter()
        .map(|s| (s.tool.id.to_string(), s.access.allowed))
        .collect()
}

/// Which profile the policy's effective tool set corresponds to.
pub fn detected_profile(policy: &ToolPolicy) -> ProfileOrCustom {
    detect_profile(&enabled_map(policy))
}

/// Toggles that switch every tool in a catalog section at once.
///
/// Returns an empty batch for an unknown section.
pub fn section_toggles(section: &str, enabled: bool) -> Vec<ToolToggle> {
    catalog::section(section)
        .map(|s| {
            s.tools
                .iter()
                .map(|t| ToolToggle {
                    tool_id: t.id.to_string(),
                    enabled,
                })
                .collect()
        })
        .unwrap_or_default()
}
