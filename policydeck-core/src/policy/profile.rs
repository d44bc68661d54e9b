//! Named tool profiles and their fixed base allow sets.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::catalog;
use super::matcher::{matches_any, WILDCARD};

/// A named, fixed base set of permitted tool patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Minimal,
    Coding,
    Messaging,
    Full,
}

impl Profile {
    /// Every named profile, from narrowest to widest.
    pub const ALL: [Profile; 4] = [
        Profile::Minimal,
        Profile::Messaging,
        Profile::Coding,
        Profile::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Minimal => "minimal",
            Profile::Coding => "coding",
            Profile::Messaging => "messaging",
            Profile::Full => "full",
        }
    }

    /// Short human description of what the profile enables.
    pub fn description(&self) -> &'static str {
        match self {
            Profile::Minimal => "Read & edit files only",
            Profile::Messaging => "Files + messaging & web",
            Profile::Coding => "Files + code execution & web",
            Profile::Full => "Everything enabled",
        }
    }

    /// The fixed base allow set for this profile.
    pub fn base_policy(&self) -> BasePolicy {
        let allow: &[&str] = match self {
            Profile::Minimal => &["read", "write", "edit"],
            Profile::Messaging => &[
                "read",
                "write",
                "edit",
                "message",
                "web_search",
                "web_fetch",
                "tts",
            ],
            Profile::Coding => &[
                "read",
                "write",
                "edit",
                "exec",
                "process",
                "web_search",
                "web_fetch",
                "browser",
            ],
            Profile::Full => &[WILDCARD],
        };
        BasePolicy {
            allow: allow.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown profile name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool profile: {0}")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Ok(Profile::Minimal),
            "coding" => Ok(Profile::Coding),
            "messaging" => Ok(Profile::Messaging),
            "full" => Ok(Profile::Full),
            other => Err(UnknownProfile(other.to_string())),
        }
    }
}

/// The allow patterns a profile grants before any overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePolicy {
    pub allow: Vec<String>,
}

/// Resolve the base set for a profile name.
///
/// Returns `None` for unrecognized names. Callers must treat `None` as
/// "nothing is base-allowed".
pub fn resolve_base_policy(profile: &str) -> Option<BasePolicy> {
    profile.parse::<Profile>().ok().map(|p| p.base_policy())
}

/// A named profile, or the derived state where no profile fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrCustom {
    Profile(Profile),
    Custom,
}

impl std::fmt::Display for ProfileOrCustom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileOrCustom::Profile(p) => write!(f, "{}", p),
            ProfileOrCustom::Custom => write!(f, "custom"),
        }
    }
}

/// Detect which profile, if any, produces exactly the given enabled map.
///
/// Comparison runs over every catalog tool; a tool missing from `tools` counts
/// as disabled. Never cached: the answer is derived on every call.
pub fn detect_profile(tools: &BTreeMap<String, bool>) -> ProfileOrCustom {
    let ids = catalog::all_tool_ids();
    Profile::ALL
        .iter()
        .find(|profile| {
            let base = profile.base_policy();
            ids.iter().all(|id| {
                let expected = matches_any(id, &base.allow);
                let actual = tools.get(*id).copied().unwrap_or(false);
                expected == actual
            })
        })
        .map(|p| ProfileOrCustom::Profile(*p))
        .unwrap_or(ProfileOrCustom::Custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(ids: &[&str]) -> BTreeMap<String, bool> {
        catalog::all_tool_ids()
            .into_iter()
            .map(|id| (id.to_string(), ids.contains(&id)))
            .collect()
    }

    #[test]
    fn test_profile_round_trips_through_str() {
        for profile in Profile::ALL {
            assert_eq!(profile.as_str().parse::<Profile>().unwrap(), profile);
        }
        assert_eq!(" Coding ".parse::<Profile>().unwrap(), Profile::Coding);
        assert!("custom".parse::<Profile>().is_err());
    }

    #[test]
    fn test_resolve_base_policy_fails_closed() {
        assert!(resolve_base_policy("nonsense").is_none());
        assert!(resolve_base_policy("").is_none());
        assert_eq!(resolve_base_policy("full").unwrap().allow, vec!["*"]);
    }

    #[test]
    fn test_detect_named_profiles() {
        assert_eq!(
            detect_profile(&enabled(&["read", "write", "edit"])),
            ProfileOrCustom::Profile(Profile::Minimal)
        );
        assert_eq!(
            detect_profile(&enabled(&catalog::all_tool_ids())),
            ProfileOrCustom::Profile(Profile::Full)
        );
    }

    #[test]
    fn test_detect_custom() {
        assert_eq!(
            detect_profile(&enabled(&["read", "exec"])),
            ProfileOrCustom::Custom
        );
        assert_eq!(detect_profile(&BTreeMap::new()), ProfileOrCustom::Custom);
    }

    #[test]
    fn test_detect_treats_missing_as_disabled() {
        let mut tools = BTreeMap::new();
        tools.insert("read".to_string(), true);
        tools.insert("write".to_string(), true);
        tools.insert("edit".to_string(), true);
        assert_eq!(
            detect_profile(&tools),
            ProfileOrCustom::Profile(Profile::Minimal)
        );
    }
}
