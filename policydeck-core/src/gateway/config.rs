//! Typed view and edits over the tool policy parts of a configuration document.
//!
//! Policies live in two places:
//!
//! ```text
//! tools                      global policy, byProvider, agentToAgent, subagents
//! agents.list[i].tools       per-agent policy and byProvider, matched on agents.list[i].id
//! <tools>.exec               exec security and allowlist, next to other exec options
//! ```
//!
//! Reads are lenient: a section that fails to parse is treated as empty. Edits
//! touch only the keys they own and leave the rest of the document intact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::{reconcile_exec_settings, ExecSettings, ToolPolicy};

/// Whether agents may message each other, and which ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentToAgentPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
}

/// Tool patterns available to spawned subagents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// The global `tools` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(flatten)]
    pub policy: ToolPolicy,
    #[serde(default)]
    pub by_provider: BTreeMap<String, ToolPolicy>,
    #[serde(default)]
    pub agent_to_agent: Option<AgentToAgentPolicy>,
    #[serde(default)]
    pub subagents: Option<SubagentPolicy>,
}

/// The `tools` section of one agent entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentToolsConfig {
    #[serde(flatten)]
    pub policy: ToolPolicy,
    #[serde(default)]
    pub by_provider: BTreeMap<String, ToolPolicy>,
}

fn parse_lenient<T: Default + for<'de> Deserialize<'de>>(value: Option<&Value>, what: &str) -> T {
    match value {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed {}: {}", what, e);
            T::default()
        }),
    }
}

impl ToolsConfig {
    /// Read the global `tools` section of a configuration document.
    pub fn from_config(config: &Value) -> Self {
        parse_lenient(config.get("tools"), "tools section")
    }

    /// Effective policy for an agent.
    ///
    /// An agent that sets any policy field replaces the global policy
    /// entirely; otherwise the global policy applies.
    pub fn agent_policy(&self, agent: Option<&AgentToolsConfig>) -> ToolPolicy {
        match agent {
            Some(agent) if !agent.policy.is_empty() => agent.policy.clone(),
            _ => self.policy.clone(),
        }
    }

    /// Provider-scoped policy for an agent.
    ///
    /// The agent's own override for `provider` wins, then the global override
    /// for the same key. `None` means no provider-specific policy exists.
    pub fn provider_policy(
        &self,
        agent: Option<&AgentToolsConfig>,
        provider: &str,
    ) -> Option<ToolPolicy> {
        let provider = provider.trim();
        agent
            .and_then(|a| a.by_provider.get(provider))
            .or_else(|| self.by_provider.get(provider))
            .cloned()
    }
}

impl AgentToolsConfig {
    /// Read the tools section of the agent entry with `agent_id`.
    ///
    /// Returns `None` when the agent has no entry in `agents.list`.
    pub fn from_config(config: &Value, agent_id: &str) -> Option<Self> {
        let entry = agent_entry(config, agent_id)?;
        Some(parse_lenient(entry.get("tools"), "agent tools section"))
    }
}

/// Effective policy for an agent, read straight from a configuration document.
pub fn effective_agent_policy(config: &Value, agent_id: &str) -> ToolPolicy {
    let agent = AgentToolsConfig::from_config(config, agent_id);
    ToolsConfig::from_config(config).agent_policy(agent.as_ref())
}

/// Exec settings stored on a tools section. `None` when no mode is set.
fn read_exec(tools: Option<&Value>) -> Option<ExecSettings> {
    let exec = tools?.get("exec")?;
    exec.get("security")?;
    Some(parse_lenient(Some(exec), "exec settings"))
}

/// Exec settings stored for an agent, falling back to the global ones.
///
/// These are the raw stored values; see [`effective_exec_settings`].
pub fn exec_settings(config: &Value, agent_id: Option<&str>) -> Option<ExecSettings> {
    agent_id
        .and_then(|id| agent_entry(config, id))
        .and_then(|entry| read_exec(entry.get("tools")))
        .or_else(|| read_exec(config.get("tools")))
}

/// Exec settings in effect for an agent (or globally when `agent_id` is
/// `None`), reset to deny when the applicable policy does not allow `exec`.
pub fn effective_exec_settings(config: &Value, agent_id: Option<&str>) -> ExecSettings {
    let policy = match agent_id {
        Some(id) => effective_agent_policy(config, id),
        None => ToolsConfig::from_config(config).policy,
    };
    let stored = exec_settings(config, agent_id).unwrap_or_default();
    reconcile_exec_settings(&policy, &stored)
}

/// Ids of every agent entry in `agents.list`.
pub fn agent_ids(config: &Value) -> Vec<String> {
    config
        .pointer("/agents/list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn agent_entry<'a>(config: &'a Value, agent_id: &str) -> Option<&'a Map<String, Value>> {
    config
        .pointer("/agents/list")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| entry.get("id").and_then(Value::as_str) == Some(agent_id))
}

/// Get `parent[key]` as an object, replacing any non-object value.
fn object_at<'a>(parent: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just set to an object"),
    }
}

fn root(config: &mut Value) -> &mut Map<String, Value> {
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }
    match config {
        Value::Object(map) => map,
        _ => unreachable!("config was just set to an object"),
    }
}

/// The agent entry with `agent_id`, appended to `agents.list` when absent.
fn agent_entry_mut<'a>(config: &'a mut Value, agent_id: &str) -> &'a mut Map<String, Value> {
    let agents = object_at(root(config), "agents");
    let list = agents
        .entry("list".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    let Value::Array(list) = list else {
        unreachable!("list was just set to an array")
    };

    let position = list
        .iter()
        .position(|entry| entry.get("id").and_then(Value::as_str) == Some(agent_id));
    let index = match position {
        Some(index) => index,
        None => {
            let mut entry = Map::new();
            entry.insert("id".to_string(), Value::String(agent_id.to_string()));
            list.push(Value::Object(entry));
            list.len() - 1
        }
    };
    match &mut list[index] {
        Value::Object(entry) => entry,
        _ => unreachable!("agent entries are matched by id on objects"),
    }
}

/// Replace the policy fields of a tools map, keeping every other key.
fn write_policy(tools: &mut Map<String, Value>, policy: &ToolPolicy) {
    for key in ["profile", "allow", "alsoAllow", "deny"] {
        tools.remove(key);
    }
    if let Ok(Value::Object(fields)) = serde_json::to_value(policy) {
        tools.extend(fields);
    }
}

fn write_provider(
    tools: &mut Map<String, Value>,
    provider: &str,
    policy: Option<&ToolPolicy>,
) {
    let by_provider = object_at(tools, "byProvider");
    match policy {
        Some(policy) => {
            let value = serde_json::to_value(policy).unwrap_or_else(|_| Value::Object(Map::new()));
            by_provider.insert(provider.to_string(), value);
        }
        None => {
            by_provider.remove(provider);
        }
    }
    if by_provider.is_empty() {
        tools.remove("byProvider");
    }
}

/// Replace the security fields of `tools.exec`, keeping other exec options.
fn write_exec(tools: &mut Map<String, Value>, settings: &ExecSettings) {
    let exec = object_at(tools, "exec");
    exec.remove("allowlist");
    if let Ok(Value::Object(fields)) = serde_json::to_value(settings) {
        exec.extend(fields);
    }
}

/// Store exec settings for an agent, or globally when `agent_id` is `None`.
pub fn set_exec_settings(config: &mut Value, agent_id: Option<&str>, settings: &ExecSettings) {
    match agent_id {
        Some(id) => write_exec(object_at(agent_entry_mut(config, id), "tools"), settings),
        None => write_exec(object_at(root(config), "tools"), settings),
    }
}

/// Reset a stored exec mode to deny when the policy at the same level no
/// longer allows `exec`.
fn reset_exec_security(config: &mut Value, agent_id: Option<&str>) {
    let (policy, stored) = match agent_id {
        Some(id) => (
            effective_agent_policy(config, id),
            agent_entry(config, id).and_then(|entry| read_exec(entry.get("tools"))),
        ),
        None => (
            ToolsConfig::from_config(config).policy,
            read_exec(config.get("tools")),
        ),
    };
    let Some(stored) = stored else {
        return;
    };
    let reconciled = reconcile_exec_settings(&policy, &stored);
    if reconciled != stored {
        log::debug!("exec is no longer allowed; resetting exec security to deny");
        set_exec_settings(config, agent_id, &reconciled);
    }
}

/// Set the global policy fields of `tools`.
pub fn set_global_policy(config: &mut Value, policy: &ToolPolicy) {
    write_policy(object_at(root(config), "tools"), policy);
    reset_exec_security(config, None);
}

/// Set an agent's policy fields. An empty policy makes the agent inherit the
/// global policy again.
///
/// A stored exec mode on the agent is reset to deny when the new policy
/// does not allow `exec`.
pub fn set_agent_policy(config: &mut Value, agent_id: &str, policy: &ToolPolicy) {
    {
        let entry = agent_entry_mut(config, agent_id);
        let tools = object_at(entry, "tools");
        write_policy(tools, policy);
        if tools.is_empty() {
            entry.remove("tools");
        }
    }
    reset_exec_security(config, Some(agent_id));
}

/// Set or clear the global override for a provider.
pub fn set_global_provider_policy(config: &mut Value, provider: &str, policy: Option<&ToolPolicy>) {
    write_provider(object_at(root(config), "tools"), provider.trim(), policy);
}

/// Set or clear an agent's override for a provider.
pub fn set_agent_provider_policy(
    config: &mut Value,
    agent_id: &str,
    provider: &str,
    policy: Option<&ToolPolicy>,
) {
    let entry = agent_entry_mut(config, agent_id);
    let tools = object_at(entry, "tools");
    write_provider(tools, provider.trim(), policy);
    if tools.is_empty() {
        entry.remove("tools");
    }
}

/// Replace `tools.agentToAgent`.
pub fn set_agent_to_agent(config: &mut Value, policy: &AgentToAgentPolicy) {
    let tools = object_at(root(config), "tools");
    if let Ok(value) = serde_json::to_value(policy) {
        tools.insert("agentToAgent".to_string(), value);
    }
}

/// Replace `tools.subagents`.
pub fn set_subagent_policy(config: &mut Value, policy: &SubagentPolicy) {
    let tools = object_at(root(config), "tools");
    if let Ok(value) = serde_json::to_value(policy) {
        tools.insert("subagents".to_string(), value);
    }
}
