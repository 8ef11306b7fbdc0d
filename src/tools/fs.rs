//! Built-in filesystem tools: read, write, exact-match edit.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::ErrorKind;

use crate::error::Result;
use crate::utils::string::truncate_output;

use super::types::{resolve_path, Tool, ToolContext, ToolResult};

/// Output ceiling for file reads, in characters.
const MAX_READ_CHARS: usize = 50_000;

/// Default line limit for reads when none is given.
const DEFAULT_READ_LINES: usize = 2000;

fn read_failure(path: &str, err: &std::io::Error) -> ToolResult {
    match err.kind() {
        ErrorKind::NotFound => ToolResult::failed(format!("file not found: {path}")),
        ErrorKind::PermissionDenied => ToolResult::failed(format!("permission denied: {path}")),
        _ => ToolResult::failed(format!("failed to read {path}: {err}")),
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolResult::failed(format!("missing required argument: {key}")))
}

// ============================================================================
// read_file
// ============================================================================

/// Read a file, optionally windowed by 1-based line offset and limit.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Supports an optional 1-based line offset and a line limit; long output is truncated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "offset": { "type": "integer", "description": "1-based line number to start from" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(r) => return Ok(r),
        };
        let resolved = match resolve_path(ctx, path) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return Ok(read_failure(path, &e)),
        };

        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_READ_LINES);

        let window: Vec<&str> = content.lines().skip(offset - 1).take(limit).collect();
        Ok(ToolResult::text(&truncate_output(
            &window.join("\n"),
            MAX_READ_CHARS,
        )))
    }
}

// ============================================================================
// write_file
// ============================================================================

/// Write a file, creating parent directories and overwriting unconditionally.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates parent directories as needed and overwrites existing content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "content": { "type": "string", "description": "Full file content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(r) => return Ok(r),
        };
        let content = match require_str(&args, "content") {
            Ok(c) => c,
            Err(r) => return Ok(r),
        };
        let resolved = match resolve_path(ctx, path) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::failed(format!(
                    "failed to create parent directories for {path}: {e}"
                )));
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return Ok(ToolResult::failed(format!("failed to write {path}: {e}")));
        }

        Ok(ToolResult::success(json!({
            "path": path,
            "bytes_written": content.len(),
        })))
    }
}

// ============================================================================
// edit_file
// ============================================================================

/// Exact-match string replacement in a file.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact substring in a file. The target must occur exactly once unless replace_all is set."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence (default false)" }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(r) => return Ok(r),
        };
        let old_string = match require_str(&args, "old_string") {
            Ok(s) => s,
            Err(r) => return Ok(r),
        };
        let new_string = match require_str(&args, "new_string") {
            Ok(s) => s,
            Err(r) => return Ok(r),
        };
        if old_string.is_empty() {
            return Ok(ToolResult::failed("old_string must not be empty"));
        }
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = match resolve_path(ctx, path) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return Ok(read_failure(path, &e)),
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return Ok(ToolResult::failed(format!(
                "old_string not found in {path}"
            )));
        }
        if occurrences > 1 && !replace_all {
            return Ok(ToolResult::failed(format!(
                "old_string occurs {occurrences} times in {path}; provide a longer unique snippet or set replace_all"
            )));
        }

        let (updated, replacements) = if replace_all {
            (content.replace(old_string, new_string), occurrences)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };
        if let Err(e) = tokio::fs::write(&resolved, updated).await {
            return Ok(ToolResult::failed(format!("failed to write {path}: {e}")));
        }

        Ok(ToolResult::success(json!({
            "path": path,
            "replacements": replacements,
        })))
    }
}
