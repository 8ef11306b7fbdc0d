//! Core tool abstractions.
//!
//! Every tool, built-in or remote, produces the same result shape:
//! `{status, output}` on success, `{status: failed|denied, reason}` otherwise.
//! The engine never branches on tool provenance beyond initial dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::providers::ToolDefinition;

/// Terminal status of one tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
    Denied,
}

/// Uniform tool result, identical for built-in and remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            output,
            reason: None,
        }
    }

    pub fn text(output: &str) -> Self {
        Self::success(Value::String(output.to_string()))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed,
            output: Value::Null,
            reason: Some(reason.into()),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Denied,
            output: Value::Null,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Serialize for the tool-role message fed back to the model. Denials
    /// and failures carry their reason so the model can adapt instead of
    /// retrying blindly.
    pub fn for_model(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"status":"failed","reason":"unserializable result"}"#.into())
    }

    /// Structured form for tool-call records and events.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Execution context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: String,
    /// Root directory file and shell tools operate under
    pub workspace: PathBuf,
    /// Client that initiated the turn, for event attribution
    pub client: String,
}

impl ToolContext {
    pub fn new(conversation_id: &str, workspace: &Path, client: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            workspace: workspace.to_path_buf(),
            client: client.to_string(),
        }
    }
}

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's arguments
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// Reject arguments containing a null byte anywhere: keys, strings, nested
/// values. Checked before any execution attempt.
pub fn validate_args(args: &Value) -> std::result::Result<(), String> {
    fn scan(value: &Value) -> bool {
        match value {
            Value::String(s) => s.contains('\0'),
            Value::Array(items) => items.iter().any(scan),
            Value::Object(map) => map.iter().any(|(k, v)| k.contains('\0') || scan(v)),
            _ => false,
        }
    }
    if scan(args) {
        Err("arguments contain a null byte".to_string())
    } else {
        Ok(())
    }
}

/// Resolve a tool-supplied path against the workspace root.
///
/// Relative paths join the workspace; `..` components are collapsed
/// lexically, and any path that lands outside the workspace is refused.
pub fn resolve_path(ctx: &ToolContext, path: &str) -> std::result::Result<PathBuf, String> {
    let requested = Path::new(path);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        ctx.workspace.join(requested)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    if !normalized.starts_with(&ctx.workspace) {
        return Err(format!("path escapes workspace: {path}"));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serialization_shape() {
        let r = ToolResult::text("done");
        let v: Value = serde_json::from_str(&r.for_model()).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["output"], "done");
        assert!(v.get("reason").is_none());

        let r = ToolResult::denied("denied by user");
        let v: Value = serde_json::from_str(&r.for_model()).unwrap();
        assert_eq!(v["status"], "denied");
        assert_eq!(v["reason"], "denied by user");
        assert!(v.get("output").is_none());
    }

    #[test]
    fn test_validate_args_rejects_null_bytes() {
        assert!(validate_args(&json!({"path": "ok.txt"})).is_ok());
        assert!(validate_args(&json!({"path": "bad\0.txt"})).is_err());
        assert!(validate_args(&json!({"nested": {"list": ["x", "y\0z"]}})).is_err());
        assert!(validate_args(&json!({"count": 3, "flag": true})).is_ok());
    }

    #[test]
    fn test_resolve_path_confined_to_workspace() {
        let ctx = ToolContext::new("conv", Path::new("/work/space"), "terminal");

        assert_eq!(
            resolve_path(&ctx, "src/main.rs").unwrap(),
            PathBuf::from("/work/space/src/main.rs")
        );
        assert_eq!(
            resolve_path(&ctx, "./a/../b.txt").unwrap(),
            PathBuf::from("/work/space/b.txt")
        );
        assert!(resolve_path(&ctx, "../outside.txt").is_err());
        assert!(resolve_path(&ctx, "/etc/passwd").is_err());
        // absolute path inside the workspace is fine
        assert!(resolve_path(&ctx, "/work/space/ok.txt").is_ok());
    }
}
