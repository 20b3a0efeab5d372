//! Worker daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Number of concurrent workers (one run per worker)
    pub concurrency: usize,

    /// Seconds between queue polls when idle
    pub poll_interval_secs: u64,

    /// Seconds between schedule trigger ticks
    pub trigger_interval_secs: u64,

    /// Story execution settings
    pub execution: ExecutionSettings,

    /// Playwright bridge settings
    pub bridge: BridgeSettings,

    /// AI diagnostics settings
    pub diagnostics: DiagnosticsSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store_path: storyline_common::default_store_path(),
            concurrency: 3,
            poll_interval_secs: 2,
            trigger_interval_secs: 60,
            execution: ExecutionSettings::default(),
            bridge: BridgeSettings::default(),
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

/// Story execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Retries per step after the first attempt
    pub retry_count: u32,

    /// Capture a screenshot when a story fails
    pub screenshot_on_failure: bool,

    /// Budget for best-effort settling after each action (ms)
    pub settle_timeout_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            screenshot_on_failure: true,
            settle_timeout_ms: 5000,
        }
    }
}

/// Playwright bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Node.js binary used to run the sidecar
    pub node_binary: String,

    /// Run the browser headless
    pub headless: bool,

    /// Default per-call budget (ms)
    pub default_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            headless: true,
            default_timeout_ms: 30_000,
        }
    }
}

/// AI diagnostics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Enable heal proposals and screenshot inspection
    pub enabled: bool,

    /// Messages endpoint URL
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Maximum tokens per response
    pub max_tokens: u32,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 2048,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Get the screenshot directory
    pub fn screenshot_dir(&self) -> PathBuf {
        self.store_path.join("screenshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = WorkerConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: WorkerConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.concurrency, 3);
        assert_eq!(parsed.trigger_interval_secs, 60);
        assert_eq!(parsed.execution.retry_count, 3);
        assert!(parsed.execution.screenshot_on_failure);
    }
}
