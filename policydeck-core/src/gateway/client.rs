//! Typed wrappers around gateway calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{methods, GatewayClient, RemoteError};

/// A configuration document and the revision it was read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub config: Value,
    /// Revision hash, sent back as `baseHash` on write for conflict detection.
    pub hash: Option<String>,
}

impl ConfigSnapshot {
    /// Parse a `config.get` result.
    ///
    /// The gateway returns either a parsed `config` object or the `raw` text.
    pub fn from_response(response: Value) -> Result<Self, RemoteError> {
        let hash = response
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string);

        let config = match (response.get("config"), response.get("raw")) {
            (Some(config @ Value::Object(_)), _) => config.clone(),
            (_, Some(Value::String(raw))) => serde_json::from_str(raw).map_err(|e| {
                RemoteError::InvalidResponse(format!("config.get raw is not JSON: {}", e))
            })?,
            _ => {
                return Err(RemoteError::InvalidResponse(
                    "config.get returned neither config nor raw".to_string(),
                ))
            }
        };
        if !config.is_object() {
            return Err(RemoteError::InvalidResponse(
                "configuration is not an object".to_string(),
            ));
        }
        Ok(Self { config, hash })
    }
}

/// One agent as reported by `agents.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default: bool,
}

/// Result of `agents.list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentList {
    #[serde(default)]
    pub agents: Vec<AgentSummary>,
    #[serde(default)]
    pub default_id: Option<String>,
}

impl AgentList {
    pub fn get(&self, agent_id: &str) -> Option<&AgentSummary> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    pub fn default_agent(&self) -> Option<&AgentSummary> {
        self.default_id
            .as_deref()
            .and_then(|id| self.get(id))
            .or_else(|| self.agents.iter().find(|a| a.default))
    }
}

/// Parameters for `agents.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Set with a follow-up `agents.update`; `agents.create` does not take it.
    #[serde(skip)]
    pub model: Option<String>,
}

impl NewAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Typed gateway calls, available on every [`GatewayClient`].
#[async_trait]
pub trait GatewayClientExt: GatewayClient {
    /// `config.get`
    async fn read_config(&self) -> Result<ConfigSnapshot, RemoteError> {
        let response = self.request(methods::CONFIG_GET, json!({})).await?;
        ConfigSnapshot::from_response(response)
    }

    /// `config.set` with the document as pretty-printed text.
    ///
    /// Returns the new revision hash when the gateway reports one.
    async fn write_config(
        &self,
        config: &Value,
        base_hash: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let mut params = json!({ "raw": raw });
        if let Some(hash) = base_hash {
            params["baseHash"] = Value::String(hash.to_string());
        }
        let response = self.request(methods::CONFIG_SET, params).await?;
        Ok(response
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// `agents.list`
    async fn list_agents(&self) -> Result<AgentList, RemoteError> {
        let response = self.request(methods::AGENTS_LIST, json!({})).await?;
        let mut list: AgentList = serde_json::from_value(response)
            .map_err(|e| RemoteError::InvalidResponse(format!("agents.list: {}", e)))?;
        if let Some(default_id) = list.default_id.clone() {
            for agent in &mut list.agents {
                agent.default |= agent.id == default_id;
            }
        }
        Ok(list)
    }

    /// `agents.create`, returning the new agent id.
    async fn create_agent(&self, agent: &NewAgent) -> Result<String, RemoteError> {
        let params =
            serde_json::to_value(agent).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let response = self.request(methods::AGENTS_CREATE, params).await?;
        match response.get("agentId") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(RemoteError::InvalidResponse(
                "agents.create returned no agentId".to_string(),
            )),
        }
    }

    /// `agents.update` with arbitrary fields.
    async fn update_agent(
        &self,
        agent_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut params = fields;
        params.insert("agentId".to_string(), Value::String(agent_id.to_string()));
        self.request(methods::AGENTS_UPDATE, Value::Object(params))
            .await?;
        Ok(())
    }

    /// `agents.delete`
    async fn delete_agent(&self, agent_id: &str, delete_files: bool) -> Result<(), RemoteError> {
        self.request(
            methods::AGENTS_DELETE,
            json!({ "agentId": agent_id, "deleteFiles": delete_files }),
        )
        .await?;
        Ok(())
    }
}

impl<C: GatewayClient + ?Sized> GatewayClientExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockGatewayClient;

    #[test]
    fn test_snapshot_from_config_or_raw() {
        let parsed = ConfigSnapshot::from_response(json!({
            "config": { "tools": { "profile": "coding" } },
            "hash": "abc"
        }))
        .unwrap();
        assert_eq!(parsed.hash.as_deref(), Some("abc"));
        assert_eq!(parsed.config["tools"]["profile"], "coding");

        let raw = ConfigSnapshot::from_response(json!({ "raw": "{\"tools\":{}}" })).unwrap();
        assert!(raw.hash.is_none());
        assert!(raw.config["tools"].is_object());

        assert!(ConfigSnapshot::from_response(json!({ "raw": "nope" })).is_err());
        assert!(ConfigSnapshot::from_response(json!({})).is_err());
    }

    #[tokio::test]
    async fn test_write_config_sends_raw_and_base_hash() {
        let client = MockGatewayClient::new().with_response(methods::CONFIG_SET, json!({}));
        let hash = client
            .write_config(&json!({ "tools": {} }), Some("h1"))
            .await
            .unwrap();
        assert!(hash.is_none());

        let calls = client.calls_to(methods::CONFIG_SET);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["baseHash"], "h1");
        let raw: Value = serde_json::from_str(calls[0]["raw"].as_str().unwrap()).unwrap();
        assert_eq!(raw, json!({ "tools": {} }));
    }

    #[tokio::test]
    async fn test_write_config_returns_reported_hash() {
        let client = MockGatewayClient::new()
            .with_response(methods::CONFIG_SET, json!({ "ok": true, "hash": "h2" }));
        let hash = client.write_config(&json!({}), None).await.unwrap();
        assert_eq!(hash.as_deref(), Some("h2"));
        assert!(client.calls_to(methods::CONFIG_SET)[0].get("baseHash").is_none());
    }

    #[tokio::test]
    async fn test_list_agents_marks_default() {
        let client = MockGatewayClient::new().with_response(
            methods::AGENTS_LIST,
            json!({
                "agents": [{ "id": "main", "name": "Main" }, { "id": "ops" }],
                "defaultId": "main"
            }),
        );
        let list = client.list_agents().await.unwrap();
        assert!(list.get("main").unwrap().default);
        assert!(!list.get("ops").unwrap().default);
        assert_eq!(list.default_agent().unwrap().id, "main");
    }

    #[tokio::test]
    async fn test_create_agent_requires_agent_id() {
        let client = MockGatewayClient::new()
            .with_response(methods::AGENTS_CREATE, json!({ "agentId": "a9" }));
        let id = client
            .create_agent(&NewAgent::new("Helper").with_model("sonnet"))
            .await
            .unwrap();
        assert_eq!(id, "a9");
        let params = &client.calls_to(methods::AGENTS_CREATE)[0];
        assert_eq!(params["name"], "Helper");
        assert!(params.get("model").is_none());

        let broken = MockGatewayClient::new().with_response(methods::AGENTS_CREATE, json!({}));
        assert!(matches!(
            broken.create_agent(&NewAgent::new("x")).await,
            Err(RemoteError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_agent() {
        let client = MockGatewayClient::new()
            .with_response(methods::AGENTS_UPDATE, json!({}))
            .with_response(methods::AGENTS_DELETE, json!({}));

        let mut fields = Map::new();
        fields.insert("model".into(), json!("sonnet"));
        client.update_agent("a1", fields).await.unwrap();
        client.delete_agent("a1", true).await.unwrap();

        assert_eq!(
            client.calls_to(methods::AGENTS_UPDATE)[0],
            json!({ "agentId": "a1", "model": "sonnet" })
        );
        assert_eq!(
            client.calls_to(methods::AGENTS_DELETE)[0],
            json!({ "agentId": "a1", "deleteFiles": true })
        );
    }
}
