//! Shell command security for the `exec` tool.
//!
//! Whether `exec` is allowed at all is decided by the [`ToolPolicy`]. These
//! settings narrow what an allowed `exec` may run. They are only meaningful
//! while `exec` is enabled: once a policy stops allowing it, the mode falls
//! back to [`ExecSecurity::Deny`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::resolver::{is_allowed, ToolPolicy};

/// The tool these settings apply to.
pub const EXEC_TOOL: &str = "exec";

/// Which shell commands an agent may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecSecurity {
    /// No commands.
    #[default]
    Deny,
    /// Only commands starting with an allowlist entry.
    Allowlist,
    /// Any command.
    Full,
}

impl ExecSecurity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecSecurity::Deny => "deny",
            ExecSecurity::Allowlist => "allowlist",
            ExecSecurity::Full => "full",
        }
    }
}

impl fmt::Display for ExecSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown exec security mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exec security mode: {0}")]
pub struct UnknownExecSecurity(pub String);

impl FromStr for ExecSecurity {
    type Err = UnknownExecSecurity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deny" => Ok(ExecSecurity::Deny),
            "allowlist" => Ok(ExecSecurity::Allowlist),
            "full" => Ok(ExecSecurity::Full),
            other => Err(UnknownExecSecurity(other.to_string())),
        }
    }
}

/// Security mode plus the command prefixes used in allowlist mode.
///
/// The allowlist is kept when the mode changes so switching back to
/// [`ExecSecurity::Allowlist`] restores it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSettings {
    #[serde(default)]
    pub security: ExecSecurity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<String>,
}

impl ExecSettings {
    pub fn new(security: ExecSecurity) -> Self {
        Self {
            security,
            allowlist: Vec::new(),
        }
    }

    /// Set the allowlist, trimming entries and dropping blanks and repeats.
    pub fn with_allowlist<S: AsRef<str>>(mut self, commands: &[S]) -> Self {
        let mut allowlist: Vec<String> = Vec::new();
        for command in commands {
            let command = command.as_ref().trim();
            if !command.is_empty() && !allowlist.iter().any(|c| c == command) {
                allowlist.push(command.to_string());
            }
        }
        self.allowlist = allowlist;
        self
    }

    /// Whether a command line may run under these settings.
    ///
    /// In allowlist mode an entry matches the whole command or a prefix that
    /// ends at a word boundary, so `git` admits `git status` but not `gitk`.
    pub fn allows_command(&self, command: &str) -> bool {
        let command = command.trim();
        match self.security {
            ExecSecurity::Deny => false,
            ExecSecurity::Full => !command.is_empty(),
            ExecSecurity::Allowlist => self.allowlist.iter().any(|entry| {
                command
                    .strip_prefix(entry.as_str())
                    .map_or(false, |rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
            }),
        }
    }
}

/// Settings as they apply under `policy`: a policy that does not allow `exec`
/// forces [`ExecSecurity::Deny`].
pub fn reconcile_exec_settings(policy: &ToolPolicy, settings: &ExecSettings) -> ExecSettings {
    if is_allowed(EXEC_TOOL, policy).allowed {
        settings.clone()
    } else {
        ExecSettings {
            security: ExecSecurity::Deny,
            allowlist: settings.allowlist.clone(),
        }
    }
}
