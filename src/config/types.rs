//! Configuration type definitions for Salon
//!
//! All types implement serde traits for TOML serialization and carry
//! sensible defaults, so a missing or partial config file always yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct for Salon
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logical database name used for event scoping
    pub database: String,
    /// Workspace root for file and shell tools
    pub workspace: Option<PathBuf>,
    /// Agent loop configuration
    pub agent: AgentConfig,
    /// Context budget thresholds
    pub context: ContextConfig,
    /// Shell tool limits
    pub shell: ShellConfig,
    /// Model provider configuration
    pub provider: ProviderConfig,
    /// Remote tool server definitions
    pub remote_servers: Vec<RemoteServerConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model/tool iterations per turn
    pub max_iterations: usize,
    /// Seconds an approval request waits before timing out
    pub approval_timeout_secs: u64,
    /// Seconds after which an unanswered approval is expired outright
    pub approval_expire_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            approval_timeout_secs: 300,
            approval_expire_secs: 600,
        }
    }
}

// ============================================================================
// Context Configuration
// ============================================================================

/// Context budget thresholds, in estimated tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Soft warning threshold
    pub soft_warn_tokens: usize,
    /// Automatic compaction threshold
    pub auto_compact_tokens: usize,
    /// Hard ceiling; a turn over this budget after compaction is refused
    pub hard_limit_tokens: usize,
    /// Minimum message count for compaction to be worthwhile
    pub min_compact_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            soft_warn_tokens: 80_000,
            auto_compact_tokens: 100_000,
            hard_limit_tokens: 128_000,
            min_compact_messages: 4,
        }
    }
}

// ============================================================================
// Shell Configuration
// ============================================================================

/// Shell tool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Default command timeout in seconds
    pub default_timeout_secs: u64,
    /// Hard maximum timeout a caller may request
    pub max_timeout_secs: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
            max_timeout_secs: 600,
        }
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Model provider configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key
    pub api_key: String,
    /// Base URL for the API
    pub api_base: String,
    /// Default model identifier
    pub default_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }
}

// ============================================================================
// Remote Tool Server Configuration
// ============================================================================

/// Configuration for a single remote tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    /// Human-readable server name
    pub name: String,
    /// Server URL endpoint
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_timeout() -> u64 {
    30
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter when RUST_LOG is unset (trace|debug|info|warn|error)
    pub level: String,
    /// Output format: "compact" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}
