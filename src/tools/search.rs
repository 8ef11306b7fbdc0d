//! Built-in search tools: glob and grep.
//!
//! Both are bounded: glob caps its result count and orders by modification
//! time (newest first); grep caps total matches, skips large and binary
//! files, and reports matches in deterministic file order then line order.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

use super::types::{resolve_path, Tool, ToolContext, ToolResult};

/// Hard cap on glob results.
const MAX_GLOB_RESULTS: usize = 500;

/// Hard cap on total grep matches.
const MAX_GREP_MATCHES: usize = 500;

/// Files larger than this are skipped by grep.
const MAX_GREP_FILE_BYTES: u64 = 1024 * 1024;

// ============================================================================
// glob
// ============================================================================

/// File pattern matching, most-recently-modified first.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern (e.g. src/**/*.rs). Results are ordered newest-first and capped."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern, relative to the search path" },
                "path": { "type": "string", "description": "Directory to search from (default: workspace root)" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return Ok(ToolResult::failed("missing required argument: pattern"));
        };
        let base = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let base = match resolve_path(ctx, base) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };

        let full_pattern = base.join(pattern);
        let entries = match glob::glob(&full_pattern.to_string_lossy()) {
            Ok(paths) => paths,
            Err(e) => return Ok(ToolResult::failed(format!("invalid glob pattern: {e}"))),
        };

        let mut matches: Vec<(PathBuf, SystemTime)> = Vec::new();
        let mut truncated = false;
        for entry in entries.flatten() {
            // patterns with `..` could wander out of the workspace
            if !entry.starts_with(&ctx.workspace) {
                continue;
            }
            let modified = fs::metadata(&entry)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            matches.push((entry, modified));
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));
        if matches.len() > MAX_GLOB_RESULTS {
            matches.truncate(MAX_GLOB_RESULTS);
            truncated = true;
        }

        let paths: Vec<String> = matches
            .into_iter()
            .map(|(p, _)| p.to_string_lossy().into_owned())
            .collect();
        Ok(ToolResult::success(json!({
            "matches": paths,
            "truncated": truncated,
        })))
    }
}

// ============================================================================
// grep
// ============================================================================

/// Regex content search across workspace files.
pub struct GrepTool;

/// Collect regular files under `root`, depth-first, skipping dot-directories.
/// The final list is sorted for deterministic output.
fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            match entry.file_type() {
                Ok(t) if t.is_dir() => stack.push(path),
                Ok(t) if t.is_file() => files.push(path),
                _ => {}
            }
        }
    }
    files.sort();
    files
}

fn looks_binary(content: &[u8]) -> bool {
    content.iter().take(1024).any(|b| *b == 0)
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Skips large and binary files; matches are capped and ordered by file then line."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "Directory to search (default: workspace root)" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return Ok(ToolResult::failed("missing required argument: pattern"));
        };
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::failed(format!("invalid regex: {e}"))),
        };
        let base = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let base = match resolve_path(ctx, base) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        'files: for file in collect_files(&base) {
            let small_enough = fs::metadata(&file)
                .map(|m| m.len() <= MAX_GREP_FILE_BYTES)
                .unwrap_or(false);
            if !small_enough {
                continue;
            }
            let Ok(bytes) = fs::read(&file) else {
                continue;
            };
            if looks_binary(&bytes) {
                continue;
            }
            let content = String::from_utf8_lossy(&bytes);
            for (line_number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() >= MAX_GREP_MATCHES {
                        truncated = true;
                        break 'files;
                    }
                    matches.push(json!({
                        "file": file.to_string_lossy(),
                        "line": line_number + 1,
                        "text": line,
                    }));
                }
            }
        }

        Ok(ToolResult::success(json!({
            "matches": matches,
            "truncated": truncated,
        })))
    }
}
