//! Agent settings: an optional TOML file overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::network::EffectiveType;
use crate::reporter::ReporterConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub event_id: Option<String>,
    pub camera_id: Option<String>,
    pub display_name: Option<String>,
    /// Reachable when the API is down but the network is not.
    pub reference_url: Option<String>,
    /// Skip probing and assume this network class.
    pub network: Option<EffectiveType>,
    pub save_data: bool,
    pub debounce_ms: u64,
    pub keepalive_secs: u64,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub codec: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            token: None,
            event_id: None,
            camera_id: None,
            display_name: None,
            reference_url: None,
            network: None,
            save_data: false,
            debounce_ms: 750,
            keepalive_secs: 10,
            probe_interval_secs: 5,
            probe_timeout_secs: 5,
            codec: "VP8".to_string(),
        }
    }
}

impl OperatorConfig {
    /// `<config dir>/livecast-operator/config.toml` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("io", "livecast", "livecast-operator").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reads `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn reporter(&self) -> ReporterConfig {
        ReporterConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            keepalive: Duration::from_secs(self.keepalive_secs),
            retry: RetryPolicy::REPORT,
        }
    }

    pub fn require_token(&self) -> anyhow::Result<&str> {
        self.token
            .as_deref()
            .context("no camera token; pass --token or set `token` in the config file")
    }

    pub fn require_event(&self) -> anyhow::Result<&str> {
        self.event_id
            .as_deref()
            .context("no event; pass --event or set `event_id` in the config file")
    }
}
