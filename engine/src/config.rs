//! Engine configuration.
//!
//! The backend base URL is always injected by the host; only the timing
//! knobs carry defaults.

use std::time::Duration;

use serde::Deserialize;

fn default_reveal_interval_ms() -> u64 {
    25
}

fn default_quota_refresh_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Backend base URL, e.g. `https://dashboard.example.com`. Required.
    pub api_base_url: String,

    /// Reveal animation cadence in milliseconds.
    #[serde(default = "default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,

    /// Authoritative quota refresh cadence in seconds.
    #[serde(default = "default_quota_refresh_secs")]
    pub quota_refresh_secs: u64,
}

impl EngineConfig {
    /// Build a config programmatically with default timings.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            reveal_interval_ms: default_reveal_interval_ms(),
            quota_refresh_secs: default_quota_refresh_secs(),
        }
    }

    /// Parse from TOML, rejecting unknown keys and a blank base URL.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }
        Ok(config)
    }

    #[must_use]
    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }

    #[must_use]
    pub fn quota_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.quota_refresh_secs)
    }
}
