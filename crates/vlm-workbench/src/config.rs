//! Workbench configuration.
//!
//! Resolution order, later layers winning:
//!
//! ```text
//! defaults ──► TOML file (--config) ──► WORKBENCH_* env ──► CLI flags
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_PROMPT: &str =
    "Describe this scene in detail, focusing on road conditions and traffic.";

/// Resolved settings for one workbench process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Backend origin, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Path prefix every endpoint lives under.
    pub api_prefix: String,
    /// Per-request timeout. Generation over long contexts is slow.
    pub request_timeout_secs: u64,
    /// How long a settled feedback status stays visible.
    pub feedback_expiry_ms: u64,
    pub health_interval_secs: u64,
    /// Prompt pre-filled on startup.
    pub default_prompt: String,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_prefix: "/api".into(),
            request_timeout_secs: 300,
            feedback_expiry_ms: 3000,
            health_interval_secs: 5,
            default_prompt: DEFAULT_PROMPT.into(),
        }
    }
}

impl WorkbenchConfig {
    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let config: WorkbenchConfig = toml::from_str(&content)
            .context(format!("Failed to parse config TOML {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `WORKBENCH_*` overrides from `lookup`. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("WORKBENCH_BACKEND_URL") {
            self.base_url = url;
        }
        if let Some(prefix) = lookup("WORKBENCH_API_PREFIX") {
            self.api_prefix = prefix;
        }
        override_number(&lookup, "WORKBENCH_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_number(
            &lookup,
            "WORKBENCH_FEEDBACK_EXPIRY_MS",
            &mut self.feedback_expiry_ms,
        );
        override_number(
            &lookup,
            "WORKBENCH_HEALTH_INTERVAL_SECS",
            &mut self.health_interval_secs,
        );
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.base_url.starts_with("http://") || self.base_url.starts_with("https://"),
            "base_url must be an http(s) URL, got {:?}",
            self.base_url
        );
        ensure!(self.request_timeout_secs > 0, "request_timeout_secs must be > 0");
        ensure!(self.feedback_expiry_ms > 0, "feedback_expiry_ms must be > 0");
        ensure!(self.health_interval_secs > 0, "health_interval_secs must be > 0");
        Ok(())
    }

    /// Absolute URL of an API endpoint, e.g. `api_url("feedback/sft")`.
    pub fn api_url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        if prefix.is_empty() {
            format!("{base}/{endpoint}")
        } else {
            format!("{base}/{prefix}/{endpoint}")
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn feedback_expiry(&self) -> Duration {
        Duration::from_millis(self.feedback_expiry_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

fn override_number(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u64) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(n) => *slot = n,
            Err(_) => warn!(key, value = %raw, "Ignoring non-numeric override"),
        }
    }
}
