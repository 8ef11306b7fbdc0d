//! Built-in shell execution tool.
//!
//! Runs a command under `sh -c` in the workspace with a bounded timeout.
//! Stdout, stderr, and the exit code are captured separately; a non-zero
//! exit is still a successful *execution* whose output reports the code,
//! while a timeout is a failure.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::ShellConfig;
use crate::error::Result;
use crate::utils::string::truncate_output;

use super::types::{Tool, ToolContext, ToolResult};

/// Output ceiling per captured stream, in characters.
const MAX_STREAM_CHARS: usize = 30_000;

/// Shell command execution.
pub struct ShellTool {
    default_timeout_secs: u64,
    max_timeout_secs: u64,
}

impl ShellTool {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            default_timeout_secs: config.default_timeout_secs,
            max_timeout_secs: config.max_timeout_secs,
        }
    }

    fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs)
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(&ShellConfig::default())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Returns stdout, stderr, and the exit code. Destructive commands require approval."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command to execute with sh -c" },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120, maximum 600)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return Ok(ToolResult::failed("missing required argument: command"));
        };
        let timeout_secs = self.effective_timeout(args.get("timeout_secs").and_then(Value::as_u64));

        debug!(command, timeout_secs, "running shell command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::failed(format!("failed to spawn shell: {e}"))),
        };

        let output =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Ok(ToolResult::failed(format!("command failed: {e}"))),
                Err(_) => {
                    return Ok(ToolResult::failed(format!(
                        "command timed out after {timeout_secs}s"
                    )));
                }
            };

        let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout), MAX_STREAM_CHARS);
        let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr), MAX_STREAM_CHARS);
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(ToolResult::success(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolStatus;
    use std::path::Path;

    fn ctx(workspace: &Path) -> ToolContext {
        ToolContext::new("conv-1", workspace, "terminal")
    }

    #[test]
    fn test_timeout_clamping() {
        let tool = ShellTool::default();
        assert_eq!(tool.effective_timeout(None), 120);
        assert_eq!(tool.effective_timeout(Some(30)), 30);
        assert_eq!(tool.effective_timeout(Some(9999)), 600);
        assert_eq!(tool.effective_timeout(Some(0)), 1);
    }

    #[tokio::test]
    async fn test_captures_streams_separately() {
        let dir = tempfile::tempdir().unwrap();
        let r = ShellTool::default()
            .execute(
                json!({"command": "echo out; echo err >&2; exit 3"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(r.status, ToolStatus::Success);
        assert_eq!(r.output["stdout"], "out\n");
        assert_eq!(r.output["stderr"], "err\n");
        assert_eq!(r.output["exit_code"], 3);
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let r = ShellTool::default()
            .execute(json!({"command": "cat marker.txt"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(r.output["stdout"], "here");
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(&ShellConfig {
            default_timeout_secs: 1,
            max_timeout_secs: 600,
        });
        let r = tool
            .execute(json!({"command": "sleep 5"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(r.status, ToolStatus::Failed);
        assert!(r.reason.as_ref().unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_missing_command_argument() {
        let dir = tempfile::tempdir().unwrap();
        let r = ShellTool::default()
            .execute(json!({}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(r.status, ToolStatus::Failed);
        assert!(r.reason.as_ref().unwrap().contains("command"));
    }

    #[tokio::test]
    async fn test_long_output_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let r = ShellTool::default()
            .execute(
                json!({"command": "head -c 100000 /dev/zero | tr '\\0' 'a'"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        let stdout = r.output["stdout"].as_str().unwrap();
        assert!(stdout.ends_with("[truncated]"));
        assert!(stdout.len() < 40_000);
    }
}
