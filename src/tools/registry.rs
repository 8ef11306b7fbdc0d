//! Unified tool dispatch.
//!
//! Built-in tools resolve by exact name first; a name no built-in claims is
//! offered to remote servers in registration order. Anything else comes back
//! as a `failed` result so the model can recover instead of the turn dying.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::providers::ToolDefinition;

use super::fs::{EditFileTool, ReadFileTool, WriteFileTool};
use super::remote::RemoteToolServer;
use super::search::{GlobTool, GrepTool};
use super::shell::ShellTool;
use super::types::{validate_args, Tool, ToolContext, ToolResult};

/// Holds built-in tools and connected remote servers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    remotes: Vec<Arc<RemoteToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in tool set.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(WriteFileTool));
        registry.register(Box::new(EditFileTool));
        registry.register(Box::new(ShellTool::new(&config.shell)));
        registry.register(Box::new(GlobTool));
        registry.register(Box::new(GrepTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "replacing previously registered tool");
        }
    }

    pub fn register_remote(&mut self, server: Arc<RemoteToolServer>) {
        self.remotes.push(server);
    }

    /// Connect every configured remote server and register the reachable
    /// ones. Returns how many servers came up; an unreachable server is
    /// logged and skipped so startup never blocks on a dead endpoint.
    pub async fn connect_remote_servers(
        &mut self,
        configs: &[crate::config::RemoteServerConfig],
    ) -> usize {
        let mut connected = 0;
        for config in configs {
            let server = Arc::new(RemoteToolServer::new(config));
            match server.connect().await {
                Ok(count) => {
                    debug!(server = %config.name, tools = count, "remote tool server registered");
                    self.register_remote(server);
                    connected += 1;
                }
                Err(e) => {
                    warn!(server = %config.name, error = %e, "remote tool server unavailable");
                }
            }
        }
        connected
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.remotes.iter().any(|s| s.advertises(name))
    }

    /// All definitions exposed to the model. When a remote tool collides with
    /// an already-exposed name the first registration wins.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut seen: Vec<String> = Vec::new();
        let mut definitions: Vec<ToolDefinition> = Vec::new();
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                seen.push(name.clone());
                definitions.push(tool.definition());
            }
        }
        for server in &self.remotes {
            for definition in server.definitions() {
                if seen.iter().any(|n| *n == definition.name) {
                    warn!(
                        tool = %definition.name,
                        server = %server.server_name(),
                        "remote tool shadowed by existing name"
                    );
                    continue;
                }
                seen.push(definition.name.clone());
                definitions.push(definition);
            }
        }
        definitions
    }

    /// Route one call to whichever tool owns the name. Failures surface as
    /// `failed` results; only infrastructure errors inside built-ins are
    /// folded in the same way so the model always sees a result.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        if let Err(reason) = validate_args(&args) {
            return ToolResult::failed(format!("input validation failed: {reason}"));
        }

        if let Some(tool) = self.tools.get(name) {
            debug!(tool = name, conversation = %ctx.conversation_id, "dispatching built-in tool");
            return match tool.execute(args, ctx).await {
                Ok(result) => result,
                Err(e) => ToolResult::failed(e.to_string()),
            };
        }

        for server in &self.remotes {
            if server.advertises(name) {
                debug!(tool = name, server = %server.server_name(), "dispatching remote tool");
                return server.call(name, &args).await;
            }
        }

        ToolResult::failed(format!("unknown tool: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new("conv-1", dir.path(), "client-a")
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result() {
        let registry = ToolRegistry::with_defaults(&Config::default());
        let dir = TempDir::new().unwrap();
        let result = registry.dispatch("summon", json!({}), &ctx(&dir)).await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert_eq!(result.reason.as_deref(), Some("unknown tool: summon"));
    }

    #[tokio::test]
    async fn test_null_byte_rejected_before_execution() {
        let registry = ToolRegistry::with_defaults(&Config::default());
        let dir = TempDir::new().unwrap();
        let result = registry
            .dispatch("write_file", json!({"path": "a\0b", "content": "x"}), &ctx(&dir))
            .await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert!(result.reason.as_deref().unwrap().starts_with("input validation failed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_builtin_dispatch_round_trip() {
        let registry = ToolRegistry::with_defaults(&Config::default());
        let dir = TempDir::new().unwrap();
        let write = registry
            .dispatch(
                "write_file",
                json!({"path": "notes.txt", "content": "hello"}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(write.status, ToolStatus::Success);
        let read = registry
            .dispatch("read_file", json!({"path": "notes.txt"}), &ctx(&dir))
            .await;
        assert_eq!(read.status, ToolStatus::Success);
        assert!(read.output.as_str().unwrap().contains("hello"));
    }

    #[test]
    fn test_definitions_cover_builtins() {
        let registry = ToolRegistry::with_defaults(&Config::default());
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        for expected in ["read_file", "write_file", "edit_file", "shell", "glob", "grep"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_has_builtin() {
        let registry = ToolRegistry::with_defaults(&Config::default());
        assert!(registry.has("shell"));
        assert!(!registry.has("summon"));
    }
}
