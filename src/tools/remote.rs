//! Remote tool server client.
//!
//! A remote server advertises a list of tools over HTTP/JSON; calls to those
//! tools are proxied with the same result shape built-ins produce, so the
//! engine treats both uniformly. A transport failure while a call is in
//! flight resolves that call as `failed` with reason `provider_disconnected`
//! rather than aborting the turn.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RemoteServerConfig;
use crate::error::{Result, SalonError};
use crate::providers::ToolDefinition;

use super::types::ToolResult;

/// Reason reported when the server is unreachable mid-call.
pub const PROVIDER_DISCONNECTED: &str = "provider_disconnected";

#[derive(Debug, Deserialize)]
struct ToolListResponse {
    tools: Vec<AdvertisedTool>,
}

#[derive(Debug, Deserialize)]
struct AdvertisedTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_parameters")]
    parameters: Value,
}

fn default_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Client for one configured remote tool server.
pub struct RemoteToolServer {
    name: String,
    url: String,
    client: Client,
    advertised: RwLock<Vec<ToolDefinition>>,
}

impl RemoteToolServer {
    pub fn new(config: &RemoteServerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            name: config.name.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            client,
            advertised: RwLock::new(Vec::new()),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }

    /// Fetch the advertised tool list. Returns how many tools the server
    /// offers.
    pub async fn connect(&self) -> Result<usize> {
        let response = self
            .client
            .get(format!("{}/tools", self.url))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| SalonError::Tool(format!("tool list from '{}': {e}", self.name)))?;
        let listing: ToolListResponse = response.json().await?;

        let definitions: Vec<ToolDefinition> = listing
            .tools
            .into_iter()
            .map(|t| ToolDefinition::new(&t.name, &t.description, t.parameters))
            .collect();
        let count = definitions.len();
        info!(server = %self.name, count, "connected to remote tool server");
        *self.advertised.write().unwrap_or_else(|e| e.into_inner()) = definitions;
        Ok(count)
    }

    /// Whether this server advertises a tool by that name.
    pub fn advertises(&self, tool_name: &str) -> bool {
        self.advertised
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|t| t.name == tool_name)
    }

    /// Advertised tool definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.advertised
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Invoke a remote tool.
    pub async fn call(&self, tool_name: &str, args: &Value) -> ToolResult {
        if let Err(reason) = screen_remote_args(args) {
            return ToolResult::failed(reason);
        }

        let response = self
            .client
            .post(format!("{}/tools/{tool_name}", self.url))
            .json(&json!({ "arguments": args }))
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(server = %self.name, tool = tool_name, error = %e, "remote call transport failure");
                return ToolResult::failed(PROVIDER_DISCONNECTED);
            }
        };
        if !response.status().is_success() {
            return ToolResult::failed(format!(
                "remote server '{}' returned {}",
                self.name,
                response.status()
            ));
        }

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(server = %self.name, tool = tool_name, error = %e, "remote response lost mid-read");
                return ToolResult::failed(PROVIDER_DISCONNECTED);
            }
        };

        // servers that speak our result shape pass through unchanged; any
        // other payload is wrapped as a success
        match serde_json::from_value::<ToolResult>(body.clone()) {
            Ok(result) => result,
            Err(_) => ToolResult::success(body),
        }
    }
}

/// Reject string arguments carrying shell metacharacters. Remote servers may
/// interpolate arguments into commands; the screen runs on our side so a
/// compromised model can't smuggle an injection through a trusting server.
fn screen_remote_args(args: &Value) -> std::result::Result<(), String> {
    const METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '\n'];
    fn scan(value: &Value) -> bool {
        match value {
            Value::String(s) => s.contains(METACHARACTERS),
            Value::Array(items) => items.iter().any(scan),
            Value::Object(map) => map.values().any(scan),
            _ => false,
        }
    }
    if scan(args) {
        Err("string argument contains shell metacharacters".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolStatus;

    fn server(url: &str) -> RemoteToolServer {
        RemoteToolServer::new(&RemoteServerConfig {
            name: "calc".to_string(),
            url: url.to_string(),
            timeout_secs: 1,
        })
    }

    #[test]
    fn test_screen_remote_args() {
        assert!(screen_remote_args(&json!({"city": "Lisbon"})).is_ok());
        assert!(screen_remote_args(&json!({"q": "a; rm x"})).is_err());
        assert!(screen_remote_args(&json!({"q": "a | b"})).is_err());
        assert!(screen_remote_args(&json!({"nested": ["fine", "bad `cmd`"]})).is_err());
        assert!(screen_remote_args(&json!({"n": 42})).is_ok());
    }

    #[test]
    fn test_advertises_before_connect_is_empty() {
        let s = server("http://127.0.0.1:1");
        assert!(!s.advertises("add"));
        assert!(s.definitions().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_provider_disconnected() {
        // nothing listens on port 1
        let s = server("http://127.0.0.1:1");
        let result = s.call("add", &json!({"a": 1})).await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert_eq!(result.reason.as_deref(), Some(PROVIDER_DISCONNECTED));
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let s = server("http://127.0.0.1:1");
        assert!(s.connect().await.is_err());
    }
}
