//! Safety policy: pure classification of proposed tool invocations.
//!
//! Three outcomes: `Allow` (execute immediately), `RequireApproval`
//! (destructive signature matched; a human must confirm), `Forbid`
//! (unconditionally blocked regardless of any confirmation).
//!
//! Classification is a pure function of the tool name and its input. Only
//! the `shell` tool's `command` string is inspected; every other tool
//! classifies `Allow`. Commands are normalized (whitespace runs collapsed,
//! lowercased) before matching so spacing tricks don't bypass the patterns.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Outcome of classifying a proposed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    /// Safe to execute immediately
    Allow,
    /// Destructive signature matched; requires explicit human approval
    RequireApproval {
        /// Human-readable description of the risky action
        description: String,
    },
    /// Unconditionally blocked; never executed, no approval round-trip
    Forbid { reason: String },
}

/// Substrings that are blocked anywhere in a normalized command.
const FORBIDDEN_SUBSTRINGS: &[&str] = &[
    "mkfs",
    "dd if=/dev/",
    "> /dev/sd",
    "/etc/shadow",
    "/etc/passwd",
    "~/.ssh/",
    "/proc/sysrq-trigger",
    ":(){ :|:& };:",
];

/// Commands blocked when the normalized command ends with them. Suffix-only
/// so `rm -rf /tmp/scratch` stays in approval territory while `rm -rf /`
/// is refused outright.
const FORBIDDEN_SUFFIXES: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -fr /",
    "rm -fr /*",
    "chmod 777 /",
    "chmod -r 777 /",
];

static FORBIDDEN_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::new(FORBIDDEN_SUBSTRINGS).expect("forbidden pattern set compiles")
});

/// Destructive command signatures that require approval, searched against a
/// normalized command string.
static DESTRUCTIVE_SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\brm\s+", "file deletion (rm)"),
        (r"\brmdir\b", "directory removal (rmdir)"),
        (r"\bgit\s+push\s+(-f|--force)\b", "forced git push"),
        (r"\bgit\s+reset\s+--hard\b", "hard git reset"),
        (r"\bgit\s+clean\b", "git clean"),
        (r"\bgit\s+checkout\s+\.", "git checkout of all local changes"),
        (r"\bdrop\s+table\b", "SQL DROP TABLE"),
        (r"\bdrop\s+database\b", "SQL DROP DATABASE"),
        (r"\btruncate\s+", "truncate"),
        (r">\s*/dev/", "redirection into a device file"),
        (r"\bchmod\s+777\b", "permission-broadening chmod"),
        (r"\bkill\s+-9\b", "forceful process kill"),
    ]
    .iter()
    .map(|(pattern, label)| {
        (
            Regex::new(pattern).expect("destructive signature compiles"),
            *label,
        )
    })
    .collect()
});

/// Collapse whitespace runs to single spaces, trim, lowercase.
fn normalize_command(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify a shell command string.
pub fn classify_command(command: &str) -> SafetyDecision {
    let cmd = normalize_command(command);

    if let Some(m) = FORBIDDEN_MATCHER.find(&cmd) {
        return SafetyDecision::Forbid {
            reason: format!(
                "command contains forbidden pattern '{}'",
                FORBIDDEN_SUBSTRINGS[m.pattern().as_usize()]
            ),
        };
    }
    for suffix in FORBIDDEN_SUFFIXES {
        if cmd.ends_with(suffix) {
            return SafetyDecision::Forbid {
                reason: format!("command matches forbidden pattern '{suffix}'"),
            };
        }
    }

    for (regex, label) in DESTRUCTIVE_SIGNATURES.iter() {
        if regex.is_match(&cmd) {
            return SafetyDecision::RequireApproval {
                description: format!("{label}: `{command}`"),
            };
        }
    }

    SafetyDecision::Allow
}

/// Classify a proposed tool invocation.
///
/// Pure function of the tool name and arguments; never consults external
/// state.
pub fn evaluate(tool_name: &str, args: &Value) -> SafetyDecision {
    if tool_name != "shell" {
        return SafetyDecision::Allow;
    }
    match args.get("command").and_then(Value::as_str) {
        Some(command) => classify_command(command),
        None => SafetyDecision::Allow,
    }
}
