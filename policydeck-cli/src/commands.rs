//! Command definitions and their execution.
//!
//! Commands write to any [`Write`] so they can be exercised without a
//! terminal.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use policydeck_core::gateway::config::{agent_ids, effective_agent_policy, effective_exec_settings};
use policydeck_core::gateway::{AgentToolsConfig, ConfigSnapshot, ToolsConfig};
use policydeck_core::policy::{
    detected_profile, is_allowed, tool_counts, tool_states, ExecSecurity, ExecSettings, Profile,
    ToolPolicy,
};
use policydeck_core::preset::{
    drift_status, AssignmentRegistry, AssignmentScope, DriftStatus, PresetInput,
    PresetRepository, PresetStore, ToolPolicyPreset,
};

use crate::error::CliError;
use crate::store::SqliteRecordStore;

// ============================================================================
// CLI Types
// ============================================================================

/// Manage tool policy presets and inspect tool access for agents
#[derive(Parser, Debug)]
#[command(name = "policydeck", version, about, long_about = None)]
pub struct Cli {
    /// Path to the preset database
    #[arg(long, env = "POLICYDECK_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The database path, defaulting to the user's data directory.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(SqliteRecordStore::default_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, edit and remove saved presets
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },

    /// Assign a preset to one or more agents or providers
    Assign {
        /// Preset id to assign
        #[arg(short, long)]
        preset: String,

        /// Whether keys name agents or providers
        #[arg(short, long, default_value = "agent")]
        scope: AssignmentScope,

        /// Agent ids or provider keys
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Clear the preset assigned to one or more keys
    Unassign {
        #[arg(short, long, default_value = "agent")]
        scope: AssignmentScope,

        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List assignments
    Assignments {
        /// Only show assignments whose preset no longer exists
        #[arg(long)]
        dangling: bool,
    },

    /// Show resolved tool access from a configuration document
    Tools {
        /// Configuration document (JSON), or a saved `config.get` response
        #[arg(short, long)]
        config: PathBuf,

        /// Agent whose policy to resolve (global policy when omitted)
        #[arg(short, long)]
        agent: Option<String>,

        /// Resolve the provider override for this provider key
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Compare live policies with their assigned presets
    Drift {
        /// Configuration document (JSON), or a saved `config.get` response
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum PresetAction {
    /// List presets, most recently updated first
    List,

    /// Show one preset
    Show { id: String },

    /// Create a preset
    Create(PresetFields),

    /// Replace a preset's fields and bump its version
    Update {
        id: String,

        #[command(flatten)]
        fields: PresetFields,
    },

    /// Copy a preset under a new id
    Duplicate { id: String },

    /// Delete a preset and every assignment pointing at it
    Delete { id: String },
}

#[derive(Args, Debug, Clone)]
pub struct PresetFields {
    /// Display name
    #[arg(short, long)]
    pub name: String,

    /// Base profile: minimal, messaging, coding or full
    #[arg(short, long, default_value = "minimal")]
    pub profile: Profile,

    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Extra tool patterns to allow (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub also_allow: Vec<String>,

    /// Tool patterns to deny (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub deny: Vec<String>,
}

impl From<PresetFields> for PresetInput {
    fn from(fields: PresetFields) -> Self {
        PresetInput {
            name: fields.name,
            description: fields.description,
            profile: fields.profile,
            also_allow: fields.also_allow,
            deny: fields.deny,
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Preset store and assignment registry over one repository.
pub struct App {
    presets: PresetStore,
    assignments: AssignmentRegistry,
    json: bool,
}

impl App {
    pub fn new(repository: Arc<PresetRepository>, json: bool) -> Self {
        Self {
            presets: PresetStore::new(repository.clone()),
            assignments: AssignmentRegistry::new(repository),
            json,
        }
    }

    /// Open the SQLite database at `path`.
    pub fn open(path: &Path, json: bool) -> Result<Self, CliError> {
        let records = SqliteRecordStore::new(path)?;
        log::debug!("Using preset database {}", path.display());
        Ok(Self::new(Arc::new(PresetRepository::new(records)), json))
    }

    pub async fn execute(&self, command: Commands, out: &mut dyn Write) -> Result<(), CliError> {
        match command {
            Commands::Presets { action } => self.preset_action(action, out).await,
            Commands::Assign {
                preset,
                scope,
                keys,
            } => {
                self.require_preset(&preset).await?;
                self.assignments
                    .bulk_assign(scope, &keys, Some(preset.as_str()))
                    .await;
                writeln!(out, "Assigned {} to {} {}(s)", preset, keys.len(), scope)?;
                Ok(())
            }
            Commands::Unassign { scope, keys } => {
                self.assignments.bulk_assign(scope, &keys, None).await;
                writeln!(out, "Cleared {} {}(s)", keys.len(), scope)?;
                Ok(())
            }
            Commands::Assignments { dangling } => self.list_assignments(dangling, out).await,
            Commands::Tools {
                config,
                agent,
                provider,
            } => {
                let document = read_document(&config)?;
                let policy = resolve_policy(&document, agent.as_deref(), provider.as_deref());
                let exec = effective_exec_settings(&document, agent.as_deref());
                self.print_tools(&policy, &exec, out)
            }
            Commands::Drift { config } => {
                let document = read_document(&config)?;
                self.drift(&document, out).await
            }
        }
    }

    async fn preset_action(&self, action: PresetAction, out: &mut dyn Write) -> Result<(), CliError> {
        match action {
            PresetAction::List => {
                let presets = self.presets.list().await;
                if self.json {
                    writeln!(out, "{}", serde_json::to_string_pretty(&presets)?)?;
                } else if presets.is_empty() {
                    writeln!(out, "No presets")?;
                } else {
                    for preset in &presets {
                        write_preset_line(out, preset)?;
                    }
                }
            }
            PresetAction::Show { id } => {
                let preset = self.require_preset(&id).await?;
                self.print_preset(&preset, out)?;
            }
            PresetAction::Create(fields) => {
                require_name(&fields.name)?;
                let before = self.preset_ids().await;
                let presets = self.presets.create(fields.into()).await;
                let created = newest_unseen(presets, &before)?;
                self.print_preset(&created, out)?;
            }
            PresetAction::Update { id, fields } => {
                require_name(&fields.name)?;
                self.require_preset(&id).await?;
                self.presets.update(&id, fields.into()).await;
                let updated = self.require_preset(&id).await?;
                self.print_preset(&updated, out)?;
            }
            PresetAction::Duplicate { id } => {
                self.require_preset(&id).await?;
                let before = self.preset_ids().await;
                let presets = self.presets.duplicate(&id).await;
                let copy = newest_unseen(presets, &before)?;
                self.print_preset(&copy, out)?;
            }
            PresetAction::Delete { id } => {
                let preset = self.require_preset(&id).await?;
                self.presets.delete(&id).await;
                writeln!(out, "Deleted preset {} ({})", preset.name, preset.id)?;
            }
        }
        Ok(())
    }

    async fn list_assignments(&self, dangling: bool, out: &mut dyn Write) -> Result<(), CliError> {
        if dangling {
            for entry in self.assignments.dangling().await {
                writeln!(out, "{}\t{}\t{} (missing)", entry.scope, entry.key, entry.preset_id)?;
            }
            return Ok(());
        }

        let assignments = self.assignments.load().await;
        if self.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&assignments)?)?;
            return Ok(());
        }
        for scope in [AssignmentScope::Agent, AssignmentScope::Provider] {
            for (key, preset_id) in assignments.scope(scope) {
                let name = self
                    .presets
                    .get(preset_id)
                    .await
                    .map(|p| p.name)
                    .unwrap_or_else(|| "(missing)".to_string());
                writeln!(out, "{}\t{}\t{}\t{}", scope, key, preset_id, name)?;
            }
        }
        Ok(())
    }

    fn print_tools(
        &self,
        policy: &ToolPolicy,
        exec: &ExecSettings,
        out: &mut dyn Write,
    ) -> Result<(), CliError> {
        let states = tool_states(policy);
        if self.json {
            let enabled: serde_json::Map<String, Value> = states
                .iter()
                .map(|s| (s.tool.id.to_string(), Value::Bool(s.access.allowed)))
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&enabled)?)?;
            return Ok(());
        }

        for state in &states {
            let mark = if state.access.allowed { "on" } else { "off" };
            let note = if state.access.denied { " (denied)" } else { "" };
            writeln!(
                out,
                "{:<10} {:<18} {:<4} {}{}",
                state.section, state.tool.id, mark, state.tool.risk, note
            )?;
        }
        let counts = tool_counts(policy);
        writeln!(
            out,
            "{}/{} enabled ({} high risk), profile: {}",
            counts.enabled,
            counts.total,
            counts.high_risk,
            detected_profile(policy)
        )?;
        if is_allowed("exec", policy).allowed {
            match exec.security {
                ExecSecurity::Allowlist => writeln!(
                    out,
                    "exec security: allowlist ({})",
                    exec.allowlist.join(", ")
                )?,
                mode => writeln!(out, "exec security: {}", mode)?,
            }
        }
        Ok(())
    }

    async fn drift(&self, document: &Value, out: &mut dyn Write) -> Result<(), CliError> {
        let mut rows = Vec::new();
        for agent_id in agent_ids(document) {
            let lookup = self
                .assignments
                .resolve(AssignmentScope::Agent, &agent_id)
                .await;
            let live = effective_agent_policy(document, &agent_id);
            rows.push((AssignmentScope::Agent, agent_id, drift_status(lookup, &live)));
        }

        let tools = ToolsConfig::from_config(document);
        let providers = self.assignments.load().await.providers;
        for provider in providers.keys() {
            let lookup = self
                .assignments
                .resolve(AssignmentScope::Provider, provider)
                .await;
            let live = tools.provider_policy(None, provider).unwrap_or_default();
            rows.push((
                AssignmentScope::Provider,
                provider.clone(),
                drift_status(lookup, &live),
            ));
        }

        if self.json {
            let report: Vec<Value> = rows
                .iter()
                .map(|(scope, key, status)| {
                    serde_json::json!({ "scope": scope, "key": key, "drift": status })
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            return Ok(());
        }

        for (scope, key, status) in &rows {
            writeln!(out, "{}\t{}\t{}", scope, key, describe_drift(status))?;
        }
        Ok(())
    }

    fn print_preset(&self, preset: &ToolPolicyPreset, out: &mut dyn Write) -> Result<(), CliError> {
        if self.json {
            writeln!(out, "{}", serde_json::to_string_pretty(preset)?)?;
            return Ok(());
        }
        write_preset_line(out, preset)?;
        if !preset.description.is_empty() {
            writeln!(out, "  {}", preset.description)?;
        }
        if !preset.also_allow.is_empty() {
            writeln!(out, "  also allow: {}", preset.also_allow.join(", "))?;
        }
        if !preset.deny.is_empty() {
            writeln!(out, "  deny: {}", preset.deny.join(", "))?;
        }
        Ok(())
    }

    async fn require_preset(&self, id: &str) -> Result<ToolPolicyPreset, CliError> {
        self.presets
            .get(id)
            .await
            .ok_or_else(|| CliError::PresetNotFound(id.to_string()))
    }

    async fn preset_ids(&self) -> BTreeSet<String> {
        self.presets.list().await.into_iter().map(|p| p.id).collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn require_name(name: &str) -> Result<(), CliError> {
    if name.trim().is_empty() {
        return Err(CliError::InvalidArgument(
            "preset name must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// The first preset whose id was not present before a write.
fn newest_unseen(
    presets: Vec<ToolPolicyPreset>,
    before: &BTreeSet<String>,
) -> Result<ToolPolicyPreset, CliError> {
    presets
        .into_iter()
        .find(|p| !before.contains(&p.id))
        .ok_or_else(|| CliError::InvalidArgument("preset was not saved".to_string()))
}

fn write_preset_line(out: &mut dyn Write, preset: &ToolPolicyPreset) -> std::io::Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\tv{}",
        preset.id, preset.name, preset.profile, preset.version
    )
}

fn describe_drift(status: &DriftStatus) -> String {
    match status {
        DriftStatus::Unassigned => "unassigned".to_string(),
        DriftStatus::MissingPreset { preset_id } => format!("preset {} is missing", preset_id),
        DriftStatus::InSync { preset } => format!("in sync with {}", preset.name),
        DriftStatus::Diverged { preset } => format!("diverged from {}", preset.name),
    }
}

/// Read a configuration document from disk.
///
/// Accepts either the document itself or a `config.get` response carrying
/// `config` or `raw`.
pub fn read_document(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    if value.get("config").is_some() || value.get("raw").is_some() {
        return ConfigSnapshot::from_response(value)
            .map(|snapshot| snapshot.config)
            .map_err(|e| CliError::InvalidArgument(e.to_string()));
    }
    if !value.is_object() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a configuration object",
            path.display()
        )));
    }
    Ok(value)
}

/// The policy in effect for an agent, or for a provider when one is named.
///
/// A provider without an override falls back to the agent (or global) policy.
pub fn resolve_policy(document: &Value, agent: Option<&str>, provider: Option<&str>) -> ToolPolicy {
    let tools = ToolsConfig::from_config(document);
    let agent_config = agent.and_then(|id| AgentToolsConfig::from_config(document, id));

    let base = match agent {
        Some(id) => effective_agent_policy(document, id),
        None => tools.policy.clone(),
    };
    provider
        .and_then(|provider| tools.provider_policy(agent_config.as_ref(), provider))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "tools": {
                "profile": "coding",
                "byProvider": { "slack": { "profile": "messaging" } }
            },
            "agents": {
                "list": [
                    { "id": "a1", "tools": { "profile": "minimal" } },
                    { "id": "a2" }
                ]
            }
        })
    }

    #[test]
    fn test_resolve_policy_prefers_provider_override() {
        let doc = document();
        assert_eq!(
            resolve_policy(&doc, Some("a1"), None).profile.as_deref(),
            Some("minimal")
        );
        assert_eq!(
            resolve_policy(&doc, Some("a2"), None).profile.as_deref(),
            Some("coding")
        );
        assert_eq!(
            resolve_policy(&doc, Some("a1"), Some("slack")).profile.as_deref(),
            Some("messaging")
        );
        assert_eq!(
            resolve_policy(&doc, None, Some("email")).profile.as_deref(),
            Some("coding")
        );
    }

    #[test]
    fn test_read_document_unwraps_responses() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.json");
        std::fs::write(&plain, document().to_string()).unwrap();
        assert_eq!(read_document(&plain).unwrap(), document());

        let wrapped = dir.path().join("wrapped.json");
        let response = json!({ "raw": document().to_string(), "hash": "h9" });
        std::fs::write(&wrapped, response.to_string()).unwrap();
        assert_eq!(read_document(&wrapped).unwrap(), document());

        let list = dir.path().join("list.json");
        std::fs::write(&list, "[1, 2]").unwrap();
        assert!(matches!(
            read_document(&list),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_describe_drift() {
        assert_eq!(describe_drift(&DriftStatus::Unassigned), "unassigned");
        assert_eq!(
            describe_drift(&DriftStatus::MissingPreset {
                preset_id: "p9".into()
            }),
            "preset p9 is missing"
        );
    }
}
