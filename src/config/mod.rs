//! Configuration management for Salon
//!
//! Configuration is loaded from `~/.salon/config.toml` with environment
//! variable overrides for the values most commonly set outside the file.

mod types;

pub use types::*;

use crate::error::{Result, SalonError};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Salon configuration directory path (~/.salon)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".salon")
    }

    /// Returns the path to the config file (~/.salon/config.toml)
    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| SalonError::Config(e.to_string()))?
        } else {
            Config::default()
        };

        if config.database.is_empty() {
            config.database = "default".to_string();
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| SalonError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: SALON_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SALON_PROVIDER_API_KEY") {
            self.provider.api_key = val;
        }
        if let Ok(val) = std::env::var("SALON_PROVIDER_API_BASE") {
            self.provider.api_base = val;
        }
        if let Ok(val) = std::env::var("SALON_PROVIDER_DEFAULT_MODEL") {
            self.provider.default_model = val;
        }
        if let Ok(val) = std::env::var("SALON_AGENT_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.agent.max_iterations = v;
            }
        }
        if let Ok(val) = std::env::var("SALON_WORKSPACE") {
            self.workspace = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("SALON_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}
