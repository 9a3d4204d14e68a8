//! Configuration for the saga engine.
//!
//! Sources (highest priority first):
//! 1. Environment variable (SAGAFLOW_HOME)
//! 2. Config file ($SAGAFLOW_HOME/config.yaml)
//! 3. Defaults (~/.sagaflow)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::RetryPolicy;

/// Engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Orchestrator defaults
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Outbox processor settings
    #[serde(default)]
    pub outbox: OutboxSettings,
}

/// Defaults applied to steps without overrides
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Default retry policy for steps
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Default per-attempt timeout in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

impl OrchestratorSettings {
    /// Default step timeout as a duration
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Outbox processor settings
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxSettings {
    /// Sweep interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Publish attempts before an event is permanently failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    3
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Config {
    /// Load configuration from the home directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = home_dir()?.join("config.yaml");

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }
}

/// Engine home directory ($SAGAFLOW_HOME or ~/.sagaflow)
pub fn home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SAGAFLOW_HOME") {
        return Ok(PathBuf::from(home));
    }

    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".sagaflow"))
}

/// Directory the file-based stores live in ($SAGAFLOW_HOME/store)
pub fn store_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join("store"))
}
