//! The console-facing surface of the policy engine.
//!
//! [`ToolPolicyConsole`] holds the last configuration snapshot read from the
//! gateway and exposes:
//!
//! - read accessors that resolve tool access from that snapshot
//! - optimistic write accessors that edit the snapshot locally, send the whole
//!   document with `config.set`, then either keep the edit (refreshing with
//!   `config.get`) or roll it back
//! - the preset store and assignment registry, which persist locally and do
//!   not go through the gateway
//!
//! Write accessors return `true` when the gateway accepted the change. They
//! never return errors; failures roll back and surface as
//! [`ConsoleEvent::MutationFailed`] and [`ToolPolicyConsole::last_error`].
//!
//! ```rust,ignore
//! let console = ToolPolicyConsole::new(client, FileRecordStore::new(dir));
//! console.load().await?;
//!
//! console.set_agent_tools("main", &[ToolToggle::disable("exec")]).await;
//! assert!(!console.tool_access("main", "exec").allowed);
//! ```

use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::events::{ConsoleEvent, ConsoleHook, Hooks};
use crate::gateway::config::{self as config_edit, AgentToAgentPolicy, SubagentPolicy};
use crate::gateway::{
    AgentList, AgentToolsConfig, ConfigSnapshot, GatewayClient, GatewayClientExt, NewAgent,
    RemoteError, ToolsConfig,
};
use crate::optimistic::{snapshot, MutationLocks, OptimisticMutation};
use crate::policy::exec::EXEC_TOOL;
use crate::policy::{
    apply_tool_updates, detected_profile, is_allowed, section_toggles, switch_profile,
    tool_counts, tool_states, with_overrides, ExecSecurity, ExecSettings, Profile,
    ProfileOrCustom, ToolAccess, ToolCounts, ToolPolicy, ToolState, ToolToggle,
};
use crate::preset::{
    drift_status, AssignmentLookup, AssignmentRegistry, AssignmentScope, DriftStatus,
    PresetInput, PresetRepository, PresetStore, RecordStore, StoreKeys, ToolPolicyPreset,
};

/// Console behavior settings.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Emit [`ConsoleEvent::MutationFailed`] when a write is rolled back (default: true)
    pub notify_on_error: bool,
    /// Queue writes that touch the same resource instead of racing them (default: false)
    pub serialize_mutations: bool,
    /// Re-read the configuration after every accepted write (default: true).
    /// When off, only the revision hash is updated: from the `config.set`
    /// response, or from a `config.get` when the response carries none.
    pub refresh_after_write: bool,
    /// Record keys for the preset envelope
    pub store_keys: StoreKeys,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            notify_on_error: true,
            serialize_mutations: false,
            refresh_after_write: true,
            store_keys: StoreKeys::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn with_notify_on_error(mut self, notify: bool) -> Self {
        self.notify_on_error = notify;
        self
    }

    pub fn with_serialize_mutations(mut self, serialize: bool) -> Self {
        self.serialize_mutations = serialize;
        self
    }

    pub fn with_refresh_after_write(mut self, refresh: bool) -> Self {
        self.refresh_after_write = refresh;
        self
    }

    pub fn with_store_keys(mut self, keys: StoreKeys) -> Self {
        self.store_keys = keys;
        self
    }
}

#[derive(Debug, Default)]
struct ConsoleState {
    snapshot: ConfigSnapshot,
    agents: AgentList,
    last_error: Option<String>,
}

type StateRef = Weak<Mutex<ConsoleState>>;

/// Tool policy console over a gateway and a local preset store.
pub struct ToolPolicyConsole {
    client: Arc<dyn GatewayClient>,
    state: Arc<Mutex<ConsoleState>>,
    presets: PresetStore,
    assignments: AssignmentRegistry,
    hooks: Hooks,
    locks: MutationLocks,
    config: ConsoleConfig,
}

impl ToolPolicyConsole {
    /// Create a console with default settings.
    pub fn new(client: impl GatewayClient + 'static, records: impl RecordStore + 'static) -> Self {
        Self::with_config(client, records, ConsoleConfig::default())
    }

    pub fn with_config(
        client: impl GatewayClient + 'static,
        records: impl RecordStore + 'static,
        config: ConsoleConfig,
    ) -> Self {
        let repository =
            PresetRepository::new(records).with_keys(config.store_keys.clone());
        Self::with_repository(Arc::new(client), Arc::new(repository), config)
    }

    /// Create a console sharing an existing preset repository.
    pub fn with_repository(
        client: Arc<dyn GatewayClient>,
        repository: Arc<PresetRepository>,
        config: ConsoleConfig,
    ) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(ConsoleState::default())),
            presets: PresetStore::new(repository.clone()),
            assignments: AssignmentRegistry::new(repository),
            hooks: Hooks::new(),
            locks: MutationLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Register a hook for console events.
    pub fn add_hook(&self, hook: impl ConsoleHook + 'static) {
        self.hooks.add(hook);
    }

    /// Read the configuration and agent list from the gateway.
    pub async fn load(&self) -> Result<()> {
        let snapshot = self.client.read_config().await?;
        let agents = self.client.list_agents().await?;
        log::debug!(
            "Loaded configuration {:?} with {} agents",
            snapshot.hash,
            agents.agents.len()
        );
        self.hooks.emit(ConsoleEvent::ConfigLoaded {
            hash: snapshot.hash.clone(),
            agent_count: agents.agents.len(),
        });

        let mut state = self.state.lock();
        state.snapshot = snapshot;
        state.agents = agents;
        Ok(())
    }

    // ===== Read accessors =====

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn agents(&self) -> AgentList {
        self.state.lock().agents.clone()
    }

    /// Message of the most recent rolled-back write.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn clear_last_error(&self) {
        self.state.lock().last_error = None;
    }

    pub fn tools_config(&self) -> ToolsConfig {
        ToolsConfig::from_config(&self.state.lock().snapshot.config)
    }

    pub fn agent_tools_config(&self, agent_id: &str) -> Option<AgentToolsConfig> {
        AgentToolsConfig::from_config(&self.state.lock().snapshot.config, agent_id)
    }

    /// Effective policy for an agent: its own override, else the global policy.
    pub fn agent_policy(&self, agent_id: &str) -> ToolPolicy {
        config_edit::effective_agent_policy(&self.state.lock().snapshot.config, agent_id)
    }

    /// True when the agent defines its own policy instead of inheriting.
    pub fn has_agent_override(&self, agent_id: &str) -> bool {
        self.agent_tools_config(agent_id)
            .map_or(false, |agent| !agent.policy.is_empty())
    }

    pub fn tool_access(&self, agent_id: &str, tool_id: &str) -> ToolAccess {
        is_allowed(tool_id, &self.agent_policy(agent_id))
    }

    pub fn tool_states(&self, agent_id: &str) -> Vec<ToolState> {
        tool_states(&self.agent_policy(agent_id))
    }

    pub fn tool_counts(&self, agent_id: &str) -> ToolCounts {
        tool_counts(&self.agent_policy(agent_id))
    }

    pub fn detected_profile(&self, agent_id: &str) -> ProfileOrCustom {
        detected_profile(&self.agent_policy(agent_id))
    }

    /// Exec security in effect for an agent. Always deny while the agent's
    /// policy does not allow `exec`.
    pub fn exec_settings(&self, agent_id: &str) -> ExecSettings {
        config_edit::effective_exec_settings(&self.state.lock().snapshot.config, Some(agent_id))
    }

    /// Provider override in effect for an agent (or globally when `agent_id`
    /// is `None`).
    pub fn provider_policy(&self, agent_id: Option<&str>, provider: &str) -> Option<ToolPolicy> {
        let state = self.state.lock();
        let tools = ToolsConfig::from_config(&state.snapshot.config);
        let agent =
            agent_id.and_then(|id| AgentToolsConfig::from_config(&state.snapshot.config, id));
        tools.provider_policy(agent.as_ref(), provider)
    }

    /// Tool access on a provider: the provider override when one exists,
    /// otherwise the agent's (or global) policy.
    pub fn provider_tool_access(
        &self,
        agent_id: Option<&str>,
        provider: &str,
        tool_id: &str,
    ) -> ToolAccess {
        let policy = match self.provider_policy(agent_id, provider) {
            Some(policy) => policy,
            None => match agent_id {
                Some(agent_id) => self.agent_policy(agent_id),
                None => self.tools_config().policy,
            },
        };
        is_allowed(tool_id, &policy)
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn assignments(&self) -> &AssignmentRegistry {
        &self.assignments
    }

    pub async fn assignment_for_agent(&self, agent_id: &str) -> AssignmentLookup {
        self.assignments
            .resolve(AssignmentScope::Agent, agent_id)
            .await
    }

    pub async fn assignment_for_provider(&self, provider: &str) -> AssignmentLookup {
        self.assignments
            .resolve(AssignmentScope::Provider, provider)
            .await
    }

    /// Compare an agent's live policy with its assigned preset.
    pub async fn agent_drift(&self, agent_id: &str) -> DriftStatus {
        let lookup = self.assignment_for_agent(agent_id).await;
        drift_status(lookup, &self.agent_policy(agent_id))
    }

    /// Compare a provider's global override with its assigned preset.
    pub async fn provider_drift(&self, provider: &str) -> DriftStatus {
        let lookup = self.assignment_for_provider(provider).await;
        let live = self.provider_policy(None, provider).unwrap_or_default();
        drift_status(lookup, &live)
    }

    // ===== Write accessors =====

    /// Switch an agent to another profile. Explicit-mode policies are left
    /// untouched.
    pub async fn set_agent_profile(
        &self,
        agent_id: &str,
        profile: Option<Profile>,
        clear_also_allow: bool,
    ) -> bool {
        self.write_config(
            format!("Switch profile for {}", agent_id),
            vec![agent_key(agent_id)],
            |config| {
                let current = config_edit::effective_agent_policy(config, agent_id);
                if current.is_explicit() {
                    log::debug!("Agent {} uses an explicit allow list; not switching profile", agent_id);
                    return false;
                }
                let next = switch_profile(&current, profile, clear_also_allow);
                config_edit::set_agent_policy(config, agent_id, &next);
                true
            },
        )
        .await
    }

    /// Turn tools on or off for an agent in one write.
    pub async fn set_agent_tools(&self, agent_id: &str, updates: &[ToolToggle]) -> bool {
        self.write_config(
            format!("Update tools for {}", agent_id),
            vec![agent_key(agent_id)],
            |config| {
                let current = config_edit::effective_agent_policy(config, agent_id);
                let Some(overrides) = apply_tool_updates(&current, updates) else {
                    log::debug!("Agent {} uses an explicit allow list; not editable", agent_id);
                    return false;
                };
                config_edit::set_agent_policy(config, agent_id, &with_overrides(&current, overrides));
                true
            },
        )
        .await
    }

    /// Turn every tool in a catalog section on or off.
    pub async fn set_agent_section(&self, agent_id: &str, section: &str, enabled: bool) -> bool {
        let toggles = section_toggles(section, enabled);
        if toggles.is_empty() {
            log::debug!("Unknown tool section {}", section);
            return false;
        }
        self.set_agent_tools(agent_id, &toggles).await
    }

    /// Replace an agent's policy. An empty policy reverts to the global one.
    pub async fn replace_agent_policy(&self, agent_id: &str, policy: ToolPolicy) -> bool {
        self.write_config(
            format!("Replace tools for {}", agent_id),
            vec![agent_key(agent_id)],
            |config| {
                config_edit::set_agent_policy(config, agent_id, &policy);
                true
            },
        )
        .await
    }

    /// Write a preset's policy to an agent and record the assignment.
    pub async fn apply_preset_to_agent(&self, agent_id: &str, preset_id: &str) -> bool {
        self.apply_preset_to_agents(&[agent_id], preset_id).await
    }

    /// Write a preset's policy to several agents in one configuration write and
    /// assign it to all of them.
    pub async fn apply_preset_to_agents<S: AsRef<str>>(
        &self,
        agent_ids: &[S],
        preset_id: &str,
    ) -> bool {
        let Some(preset) = self.preset_or_warn(preset_id).await else {
            return false;
        };
        let agent_ids: Vec<&str> = agent_ids
            .iter()
            .map(|id| id.as_ref().trim())
            .filter(|id| !id.is_empty())
            .collect();
        if agent_ids.is_empty() {
            return false;
        }

        let policy = preset.to_policy();
        let ok = self
            .write_config(
                format!("Apply preset {}", preset.name),
                agent_ids.iter().map(|id| agent_key(id)).collect(),
                |config| {
                    for agent_id in &agent_ids {
                        config_edit::set_agent_policy(config, agent_id, &policy);
                    }
                    true
                },
            )
            .await;
        if ok {
            self.assignments
                .bulk_assign(
                    AssignmentScope::Agent,
                    agent_ids.as_slice(),
                    Some(preset.id.as_str()),
                )
                .await;
        }
        ok
    }

    /// Write a preset's policy as a provider override.
    ///
    /// Without `agent_id` the global override is written and the provider
    /// assignment recorded. With `agent_id` the override is written on that
    /// agent only; provider assignments track global overrides, so none is
    /// recorded.
    pub async fn apply_preset_to_provider(
        &self,
        provider: &str,
        preset_id: &str,
        agent_id: Option<&str>,
    ) -> bool {
        let Some(preset) = self.preset_or_warn(preset_id).await else {
            return false;
        };
        let policy = preset.to_policy();
        if let Some(agent_id) = agent_id {
            return self
                .set_agent_provider_policy(agent_id, provider, Some(policy))
                .await;
        }
        let ok = self.set_global_provider_policy(provider, Some(policy)).await;
        if ok {
            self.assignments
                .assign(AssignmentScope::Provider, provider, Some(preset.id.as_str()))
                .await;
        }
        ok
    }

    /// Set or clear a global provider override.
    pub async fn set_global_provider_policy(
        &self,
        provider: &str,
        policy: Option<ToolPolicy>,
    ) -> bool {
        self.write_config(
            format!("Update {} tools", provider),
            vec![format!("provider:{}", provider)],
            |config| {
                config_edit::set_global_provider_policy(config, provider, policy.as_ref());
                true
            },
        )
        .await
    }

    /// Set or clear an agent's provider override.
    pub async fn set_agent_provider_policy(
        &self,
        agent_id: &str,
        provider: &str,
        policy: Option<ToolPolicy>,
    ) -> bool {
        self.write_config(
            format!("Update {} tools for {}", provider, agent_id),
            vec![agent_key(agent_id)],
            |config| {
                config_edit::set_agent_provider_policy(config, agent_id, provider, policy.as_ref());
                true
            },
        )
        .await
    }

    pub async fn set_agent_to_agent(&self, policy: AgentToAgentPolicy) -> bool {
        self.write_config("Update agent-to-agent messaging", vec!["tools".to_string()], |config| {
            config_edit::set_agent_to_agent(config, &policy);
            true
        })
        .await
    }

    pub async fn set_subagent_policy(&self, policy: SubagentPolicy) -> bool {
        self.write_config("Update subagent tools", vec!["tools".to_string()], |config| {
            config_edit::set_subagent_policy(config, &policy);
            true
        })
        .await
    }

    /// Change an agent's exec security.
    ///
    /// Refused unless the mode is deny or the agent's policy allows `exec`.
    pub async fn set_agent_exec_settings(&self, agent_id: &str, settings: ExecSettings) -> bool {
        self.write_config(
            format!("Update exec security for {}", agent_id),
            vec![agent_key(agent_id)],
            |config| {
                let policy = config_edit::effective_agent_policy(config, agent_id);
                if settings.security != ExecSecurity::Deny
                    && !is_allowed(EXEC_TOOL, &policy).allowed
                {
                    log::debug!("Agent {} cannot run exec; keeping exec security at deny", agent_id);
                    return false;
                }
                config_edit::set_exec_settings(config, Some(agent_id), &settings);
                true
            },
        )
        .await
    }

    /// Save an agent's live policy as a new preset.
    ///
    /// Returns `None` when the policy uses an explicit allow list or an
    /// unrecognized profile.
    pub async fn save_agent_policy_as_preset(
        &self,
        agent_id: &str,
        name: &str,
    ) -> Option<Vec<ToolPolicyPreset>> {
        let input = PresetInput::from_policy(name, &self.agent_policy(agent_id))?;
        Some(self.presets.create(input).await)
    }

    /// Create an agent and reload the agent list. Returns the new id.
    ///
    /// A model is set with a follow-up `agents.update`. If only that call
    /// fails, the agent still exists and its id is returned.
    pub async fn create_agent(&self, agent: NewAgent) -> Option<String> {
        let keys = ["agents".to_string()];
        self.serialized(&keys, self.create_agent_now(agent)).await
    }

    async fn create_agent_now(&self, agent: NewAgent) -> Option<String> {
        let client = self.client.clone();
        let mutation = OptimisticMutation::new(
            format!("Create agent {}", agent.name),
            || {},
            || {},
            move || {
                async move {
                    let id = client.create_agent(&agent).await?;
                    if let Some(model) = agent.model {
                        let mut fields = Map::new();
                        fields.insert("model".to_string(), Value::String(model));
                        if let Err(e) = client.update_agent(&id, fields).await {
                            log::warn!("Created agent {} but could not set its model: {}", id, e);
                        }
                    }
                    Ok::<String, RemoteError>(id)
                }
                .boxed()
            },
        )
        .with_refresh(self.refresh_all());
        self.finish(mutation).await
    }

    /// Delete an agent. The agent disappears from the local list immediately
    /// and reappears if the gateway refuses. Its preset assignment is cleared
    /// on success.
    pub async fn delete_agent(&self, agent_id: &str, delete_files: bool) -> bool {
        let keys = ["agents".to_string(), agent_key(agent_id)];
        self.serialized(&keys, self.delete_agent_now(agent_id, delete_files))
            .await
    }

    async fn delete_agent_now(&self, agent_id: &str, delete_files: bool) -> bool {
        let before = snapshot(&self.state.lock().agents);
        let remaining = AgentList {
            agents: before
                .agents
                .iter()
                .filter(|a| a.id != agent_id)
                .cloned()
                .collect(),
            default_id: before.default_id.clone(),
        };

        let (apply_state, rollback_state) = (self.weak_state(), self.weak_state());
        let client = self.client.clone();
        let id = agent_id.to_string();
        let mut mutation = OptimisticMutation::new(
            format!("Delete agent {}", agent_id),
            move || with_state(&apply_state, |s| s.agents = remaining),
            move || with_state(&rollback_state, |s| s.agents = before),
            move || async move { client.delete_agent(&id, delete_files).await }.boxed(),
        );
        mutation = mutation.with_refresh(self.refresh_all());
        let ok = self.finish(mutation).await.is_some();
        if ok {
            self.assignments
                .assign(AssignmentScope::Agent, agent_id, None)
                .await;
        }
        ok
    }

    // ===== Internals =====

    fn weak_state(&self) -> StateRef {
        Arc::downgrade(&self.state)
    }

    /// Run `work` holding the locks for `keys` when mutations are serialized.
    async fn serialized<T>(&self, keys: &[String], work: impl Future<Output = T>) -> T {
        if !self.config.serialize_mutations {
            return work.await;
        }
        let guards = self.locks.acquire_all(keys).await;
        let out = work.await;
        drop(guards);
        self.locks.prune();
        out
    }

    async fn preset_or_warn(&self, preset_id: &str) -> Option<ToolPolicyPreset> {
        let preset = self.presets.get(preset_id).await;
        if preset.is_none() {
            log::warn!("Preset {} does not exist", preset_id);
        }
        preset
    }

    /// Re-read the configuration document.
    fn refresh_config(&self) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<(), RemoteError>> + Send {
        let client = self.client.clone();
        let state = self.weak_state();
        move || {
            async move {
                let snapshot = client.read_config().await?;
                with_state(&state, |s| s.snapshot = snapshot);
                Ok::<(), RemoteError>(())
            }
            .boxed()
        }
    }

    /// Re-read the configuration document and the agent list.
    fn refresh_all(&self) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<(), RemoteError>> + Send {
        let client = self.client.clone();
        let state = self.weak_state();
        move || {
            async move {
                let snapshot = client.read_config().await?;
                let agents = client.list_agents().await?;
                with_state(&state, |s| {
                    s.snapshot = snapshot;
                    s.agents = agents;
                });
                Ok::<(), RemoteError>(())
            }
            .boxed()
        }
    }

    /// Apply settings shared by every console mutation and run it.
    async fn finish<T: Send + 'static>(
        &self,
        mutation: OptimisticMutation<'static, T, RemoteError>,
    ) -> Option<T> {
        let error_state = self.weak_state();
        let mut mutation = mutation
            .with_hooks(self.hooks.clone())
            .on_error(move |e: &RemoteError| {
                with_state(&error_state, |s| s.last_error = Some(e.to_string()))
            });
        if !self.config.notify_on_error {
            mutation = mutation.silent();
        }
        mutation.run().await
    }

    /// Edit the configuration document optimistically and send it with
    /// `config.set`.
    ///
    /// `edit` runs against the latest local document, after any queued
    /// mutation on the same keys has finished. It returns `false` to refuse the
    /// edit, in which case nothing is sent.
    async fn write_config<F>(&self, label: impl Into<String>, lock_keys: Vec<String>, edit: F) -> bool
    where
        F: FnOnce(&mut Value) -> bool,
    {
        self.serialized(&lock_keys, self.write_config_now(label.into(), edit))
            .await
    }

    async fn write_config_now<F>(&self, label: String, edit: F) -> bool
    where
        F: FnOnce(&mut Value) -> bool,
    {
        let (before, base_hash) = {
            let state = self.state.lock();
            (snapshot(&state.snapshot.config), state.snapshot.hash.clone())
        };
        let mut edited = before.clone();
        if !edit(&mut edited) {
            return false;
        }
        if edited == before {
            log::debug!("'{}' changes nothing; skipping write", label);
            return true;
        }

        let (apply_state, rollback_state) = (self.weak_state(), self.weak_state());
        let hash_state = self.weak_state();
        let reread_hash = !self.config.refresh_after_write;
        let applied = edited.clone();
        let client = self.client.clone();
        let mut mutation = OptimisticMutation::new(
            label,
            move || with_state(&apply_state, |s| s.snapshot.config = applied),
            move || with_state(&rollback_state, |s| s.snapshot.config = before),
            move || {
                async move {
                    let mut hash = client.write_config(&edited, base_hash.as_deref()).await?;
                    if hash.is_none() && reread_hash {
                        hash = match client.read_config().await {
                            Ok(snapshot) => snapshot.hash,
                            Err(e) => {
                                log::warn!("Could not read the new configuration hash: {}", e);
                                None
                            }
                        };
                    }
                    if let Some(hash) = hash {
                        with_state(&hash_state, |s| s.snapshot.hash = Some(hash));
                    }
                    Ok::<(), RemoteError>(())
                }
                .boxed()
            },
        );
        if self.config.refresh_after_write {
            mutation = mutation.with_refresh(self.refresh_config());
        }
        self.finish(mutation).await.is_some()
    }
}

/// Run `f` against the console state if the console still exists.
fn with_state(state: &StateRef, f: impl FnOnce(&mut ConsoleState)) {
    if let Some(state) = state.upgrade() {
        f(&mut state.lock());
    }
}

fn agent_key(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::methods;
    use crate::preset::MemoryRecordStore;
    use crate::test_utils::MockGatewayClient;
    use serde_json::json;

    fn gateway() -> MockGatewayClient {
        MockGatewayClient::new()
            .with_config(json!({
                "tools": { "profile": "coding" },
                "agents": { "list": [{ "id": "main", "default": true }] }
            }))
            .with_response(
                methods::AGENTS_LIST,
                json!({ "agents": [{ "id": "main" }, { "id": "ops" }], "defaultId": "main" }),
            )
    }

    async fn console(client: &MockGatewayClient) -> ToolPolicyConsole {
        let console = ToolPolicyConsole::new(client.clone(), MemoryRecordStore::new());
        console.load().await.unwrap();
        console
    }

    #[tokio::test]
    async fn test_load_reads_config_and_agents() {
        let client = gateway();
        let console = console(&client).await;
        assert_eq!(console.snapshot().hash.as_deref(), Some("rev-1"));
        assert_eq!(console.agents().agents.len(), 2);
        assert_eq!(
            console.detected_profile("main"),
            ProfileOrCustom::Profile(Profile::Coding)
        );
    }

    #[tokio::test]
    async fn test_load_propagates_gateway_errors() {
        let client = gateway();
        client.fail(methods::CONFIG_GET, RemoteError::Transport("offline".into()));
        let console = ToolPolicyConsole::new(client, MemoryRecordStore::new());
        let err = console.load().await.unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_set_agent_tools_writes_and_refreshes() {
        let client = gateway();
        let console = console(&client).await;

        assert!(console
            .set_agent_tools("main", &[ToolToggle::disable("exec"), ToolToggle::enable("cron")])
            .await);

        assert!(!console.tool_access("main", "exec").allowed);
        assert!(console.tool_access("main", "cron").allowed);
        assert_eq!(client.call_count(methods::CONFIG_SET), 1);
        assert_eq!(console.snapshot().hash.as_deref(), Some("rev-2"));

        let written = client.config().unwrap();
        assert_eq!(written["agents"]["list"][0]["tools"]["deny"], json!(["exec"]));
        assert_eq!(written["agents"]["list"][0]["tools"]["alsoAllow"], json!(["cron"]));
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let client = gateway();
        let console = console(&client).await;
        let before = console.snapshot();

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        console.add_hook(move |e: &ConsoleEvent| sink.lock().push(e.clone()));

        client.fail(methods::CONFIG_SET, RemoteError::request(methods::CONFIG_SET, "denied"));
        assert!(!console.set_agent_profile("main", Some(Profile::Minimal), false).await);

        assert_eq!(console.snapshot(), before);
        assert!(console.tool_access("main", "exec").allowed);
        assert!(console.last_error().unwrap().contains("denied"));
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, ConsoleEvent::MutationFailed { .. })));
    }

    #[tokio::test]
    async fn test_silent_console_suppresses_notifications() {
        let client = gateway();
        let console = ToolPolicyConsole::with_config(
            client.clone(),
            MemoryRecordStore::new(),
            ConsoleConfig::default().with_notify_on_error(false),
        );
        console.load().await.unwrap();

        let failures = Arc::new(parking_lot::Mutex::new(0));
        let seen = failures.clone();
        console.add_hook(move |e: &ConsoleEvent| {
            if matches!(e, ConsoleEvent::MutationFailed { .. }) {
                *seen.lock() += 1;
            }
        });

        client.fail(methods::CONFIG_SET, RemoteError::Transport("closed".into()));
        assert!(!console.set_agent_section("main", "runtime", false).await);
        assert_eq!(*failures.lock(), 0);
        assert!(console.last_error().is_some());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_write() {
        let client = gateway();
        let console = console(&client).await;
        let seen = client.clone();
        // Fail config.get only after config.set has gone through
        console.add_hook(move |e: &ConsoleEvent| {
            if let ConsoleEvent::MutationPhaseChanged { phase, .. } = e {
                if *phase == crate::optimistic::MutationPhase::Refreshing {
                    seen.fail(methods::CONFIG_GET, RemoteError::Transport("offline".into()));
                }
            }
        });

        assert!(console.set_agent_section("main", "runtime", false).await);
        assert!(!console.tool_access("main", "exec").allowed);
        assert!(console.last_error().is_none());
        // Hash is stale until the next successful refresh
        assert_eq!(console.snapshot().hash.as_deref(), Some("rev-1"));
    }

    #[tokio::test]
    async fn test_explicit_policy_is_not_editable() {
        let client = MockGatewayClient::new()
            .with_config(json!({ "tools": { "allow": ["read"] } }))
            .with_response(methods::AGENTS_LIST, json!({ "agents": [] }));
        let console = console(&client).await;

        assert!(!console.set_agent_tools("main", &[ToolToggle::enable("exec")]).await);
        assert!(!console.set_agent_profile("main", Some(Profile::Full), false).await);
        assert_eq!(client.call_count(methods::CONFIG_SET), 0);
    }

    #[tokio::test]
    async fn test_apply_preset_to_agent_and_detect_drift() {
        let client = gateway();
        let console = console(&client).await;
        let preset = console
            .presets()
            .create(PresetInput::new("Minimal Agent", Profile::Minimal).with_deny(&["exec"]))
            .await
            .remove(0);

        assert!(console.apply_preset_to_agent("main", &preset.id).await);
        assert!(matches!(
            console.agent_drift("main").await,
            DriftStatus::InSync { .. }
        ));

        assert!(console
            .set_agent_tools("main", &[ToolToggle::enable("exec")])
            .await);
        assert!(console.agent_drift("main").await.is_diverged());
        assert_eq!(console.agent_drift("ops").await, DriftStatus::Unassigned);
    }

    #[tokio::test]
    async fn test_apply_missing_preset_is_rejected() {
        let client = gateway();
        let console = console(&client).await;
        assert!(!console.apply_preset_to_agent("main", "ghost").await);
        assert!(console.assignments().load().await.is_empty());
        assert_eq!(client.call_count(methods::CONFIG_SET), 0);
    }

    #[tokio::test]
    async fn test_apply_preset_to_provider() {
        let client = gateway();
        let console = console(&client).await;
        let preset = console
            .presets()
            .create(PresetInput::new("Chat", Profile::Messaging))
            .await
            .remove(0);

        assert!(console.apply_preset_to_provider("slack", &preset.id, None).await);
        assert_eq!(
            console.provider_policy(Some("main"), "slack").unwrap().profile.as_deref(),
            Some("messaging")
        );
        assert!(console.provider_tool_access(None, "slack", "tts").allowed);
        assert!(console.provider_tool_access(None, "email", "exec").allowed);
        assert!(matches!(
            console.provider_drift("slack").await,
            DriftStatus::InSync { .. }
        ));
    }

    #[tokio::test]
    async fn test_agent_scoped_provider_preset_is_not_a_provider_assignment() {
        let client = gateway();
        let console = console(&client).await;
        let preset = console
            .presets()
            .create(PresetInput::new("Chat", Profile::Messaging))
            .await
            .remove(0);

        assert!(console
            .apply_preset_to_provider("slack", &preset.id, Some("main"))
            .await);
        assert_eq!(
            console.provider_policy(Some("main"), "slack").unwrap().profile.as_deref(),
            Some("messaging")
        );
        assert!(console.provider_policy(None, "slack").is_none());
        assert!(console.assignments().load().await.is_empty());
        assert_eq!(console.provider_drift("slack").await, DriftStatus::Unassigned);
    }

    #[tokio::test]
    async fn test_writes_without_refresh_track_the_hash() {
        let client = gateway();
        let console = ToolPolicyConsole::with_config(
            client.clone(),
            MemoryRecordStore::new(),
            ConsoleConfig::default().with_refresh_after_write(false),
        );
        console.load().await.unwrap();

        assert!(console
            .set_agent_tools("main", &[ToolToggle::disable("exec")])
            .await);
        assert!(console
            .set_agent_tools("main", &[ToolToggle::disable("process")])
            .await);

        assert!(console.last_error().is_none());
        assert_eq!(console.snapshot().hash, client.hash());
        assert_eq!(client.call_count(methods::CONFIG_SET), 2);
        assert!(!console.tool_access("main", "process").allowed);
    }

    #[tokio::test]
    async fn test_hash_reported_by_write_skips_reread() {
        let client = gateway().with_response(methods::CONFIG_SET, json!({ "hash": "rev-9" }));
        let console = ToolPolicyConsole::with_config(
            client.clone(),
            MemoryRecordStore::new(),
            ConsoleConfig::default().with_refresh_after_write(false),
        );
        console.load().await.unwrap();

        assert!(console.set_agent_section("main", "web", false).await);
        assert_eq!(console.snapshot().hash.as_deref(), Some("rev-9"));
        assert_eq!(client.call_count(methods::CONFIG_GET), 1);
    }

    #[tokio::test]
    async fn test_exec_settings_follow_exec_access() {
        let client = gateway();
        let console = console(&client).await;
        assert_eq!(console.exec_settings("main").security, ExecSecurity::Deny);
        assert_eq!(console.tool_counts("main").high_risk, 2);

        let allowlist = ExecSettings::new(ExecSecurity::Allowlist).with_allowlist(&["git"]);
        assert!(console
            .set_agent_exec_settings("main", allowlist.clone())
            .await);
        assert_eq!(console.exec_settings("main"), allowlist);
        assert!(!console.has_agent_override("main"));

        assert!(console
            .set_agent_tools("main", &[ToolToggle::disable("exec")])
            .await);
        assert_eq!(console.exec_settings("main").security, ExecSecurity::Deny);
        assert_eq!(console.tool_counts("main").high_risk, 1);
        let written = client.config().unwrap();
        assert_eq!(written["agents"]["list"][0]["tools"]["exec"]["security"], "deny");
        assert_eq!(written["agents"]["list"][0]["tools"]["exec"]["allowlist"], json!(["git"]));

        assert!(!console
            .set_agent_exec_settings("main", ExecSettings::new(ExecSecurity::Full))
            .await);
        assert_eq!(client.call_count(methods::CONFIG_SET), 2);
    }

    #[tokio::test]
    async fn test_profile_switch_without_exec_resets_exec_security() {
        let client = gateway();
        let console = console(&client).await;
        assert!(console
            .set_agent_exec_settings("main", ExecSettings::new(ExecSecurity::Full))
            .await);

        assert!(console
            .set_agent_profile("main", Some(Profile::Messaging), false)
            .await);
        assert_eq!(console.exec_settings("main").security, ExecSecurity::Deny);

        assert!(console
            .set_agent_profile("main", Some(Profile::Coding), false)
            .await);
        assert_eq!(console.exec_settings("main").security, ExecSecurity::Deny);
    }

    #[tokio::test]
    async fn test_create_agent_sets_model() {
        let client = gateway()
            .with_response(methods::AGENTS_CREATE, json!({ "agentId": "a9" }))
            .with_response(methods::AGENTS_UPDATE, json!({}));
        let console = console(&client).await;

        let id = console
            .create_agent(NewAgent::new("Helper").with_model("sonnet"))
            .await;
        assert_eq!(id.as_deref(), Some("a9"));
        assert_eq!(
            client.calls_to(methods::AGENTS_UPDATE),
            vec![json!({ "agentId": "a9", "model": "sonnet" })]
        );

        assert!(console.create_agent(NewAgent::new("Plain")).await.is_some());
        assert_eq!(client.call_count(methods::AGENTS_UPDATE), 1);
    }

    #[tokio::test]
    async fn test_create_agent_survives_model_update_failure() {
        let client = gateway()
            .with_response(methods::AGENTS_CREATE, json!({ "agentId": "a9" }))
            .with_error(
                methods::AGENTS_UPDATE,
                RemoteError::request(methods::AGENTS_UPDATE, "unknown model"),
            );
        let console = console(&client).await;

        let id = console
            .create_agent(NewAgent::new("Helper").with_model("nope"))
            .await;
        assert_eq!(id.as_deref(), Some("a9"));
        assert!(console.last_error().is_none());
    }

    #[tokio::test]
    async fn test_agent_to_agent_and_subagents() {
        let client = gateway();
        let console = console(&client).await;
        assert!(console
            .set_agent_to_agent(AgentToAgentPolicy {
                enabled: true,
                allow: vec!["ops".into()],
            })
            .await);
        assert!(console
            .set_subagent_policy(SubagentPolicy {
                allow: vec![],
                deny: vec!["exec".into()],
            })
            .await);

        let tools = console.tools_config();
        assert!(tools.agent_to_agent.unwrap().enabled);
        assert_eq!(tools.subagents.unwrap().deny, vec!["exec"]);
    }

    #[tokio::test]
    async fn test_save_agent_policy_as_preset() {
        let client = gateway();
        let console = console(&client).await;
        let presets = console
            .save_agent_policy_as_preset("main", "From main")
            .await
            .unwrap();
        assert_eq!(presets[0].profile, Profile::Coding);
        assert_eq!(presets[0].name, "From main");
    }

    #[tokio::test]
    async fn test_delete_agent_rolls_back_on_failure() {
        let client = gateway().with_error(
            methods::AGENTS_DELETE,
            RemoteError::request(methods::AGENTS_DELETE, "busy"),
        );
        let console = console(&client).await;
        assert!(!console.delete_agent("ops", false).await);
        assert!(console.agents().get("ops").is_some());
    }

    #[tokio::test]
    async fn test_delete_agent_clears_assignment() {
        let client = gateway().with_response(methods::AGENTS_DELETE, json!({}));
        let console = console(&client).await;
        console
            .assignments()
            .assign(AssignmentScope::Agent, "ops", Some("p1"))
            .await;

        assert!(console.delete_agent("ops", true).await);
        assert!(console.assignments().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_console_turns_refresh_into_noop() {
        let client = gateway();
        let console = console(&client).await;
        let refresh = console.refresh_config();
        drop(console);
        assert!(refresh().await.is_ok());
    }

    #[tokio::test]
    async fn test_serialized_mutations_apply_in_order() {
        let client = gateway();
        let console = Arc::new(ToolPolicyConsole::with_config(
            client.clone(),
            MemoryRecordStore::new(),
            ConsoleConfig::default().with_serialize_mutations(true),
        ));
        console.load().await.unwrap();

        let (a, b) = (console.clone(), console.clone());
        let exec_toggles = [ToolToggle::disable("exec")];
        let process_toggles = [ToolToggle::disable("process")];
        let (first, second) = tokio::join!(
            a.set_agent_tools("main", &exec_toggles),
            b.set_agent_tools("main", &process_toggles),
        );
        assert!(first && second);
        assert!(!console.tool_access("main", "exec").allowed);
        assert!(!console.tool_access("main", "process").allowed);
        assert_eq!(client.call_count(methods::CONFIG_SET), 2);
        assert!(console.locks.is_empty());
    }

    #[tokio::test]
    async fn test_multi_agent_preset_waits_for_each_agent() {
        let client = gateway();
        let console = ToolPolicyConsole::with_config(
            client.clone(),
            MemoryRecordStore::new(),
            ConsoleConfig::default().with_serialize_mutations(true),
        );
        console.load().await.unwrap();
        let preset = console
            .presets()
            .create(PresetInput::new("Locked", Profile::Minimal))
            .await
            .remove(0);

        let held = console.locks.acquire("agent:ops").await;
        let mut apply = Box::pin(console.apply_preset_to_agents(&["main", "ops"], &preset.id));
        assert!(futures::poll!(apply.as_mut()).is_pending());
        assert_eq!(client.call_count(methods::CONFIG_SET), 0);

        drop(held);
        assert!(apply.await);
        assert_eq!(client.call_count(methods::CONFIG_SET), 1);
        assert!(console.locks.is_empty());
    }
}
