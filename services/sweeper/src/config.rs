//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The management key is never stored in the TOML; it comes from the
//! MANAGEMENT_KEY env var (seeded into the key store at startup) or from a
//! key already in the key store file.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gateway::ProbeTemplate;

use crate::sweeper::SweepSettings;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub management: ManagementConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// The synthetic probe request, treated as an opaque payload.
    #[serde(default)]
    pub probe: ProbeTemplate,
}

/// Upstream management API settings
#[derive(Debug, Deserialize)]
pub struct ManagementConfig {
    /// Management API root, e.g. `http://127.0.0.1:8317/v0/management`
    pub base_url: String,
    /// Provider kind whose auth files this service manages
    #[serde(default = "default_provider_kind")]
    pub provider_kind: String,
    /// Path of the JSON key-value store holding the management key
    #[serde(default = "default_key_store_path")]
    pub key_store_path: PathBuf,
}

/// Reconciliation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub probe_concurrency: usize,
    pub delete_concurrency: usize,
    /// Displayed in the snapshot for operator visibility; deletion
    /// eligibility is driven by the latest classification alone.
    pub min_consecutive_invalid: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            request_timeout_secs: 30,
            probe_concurrency: 100,
            delete_concurrency: 50,
            min_consecutive_invalid: 2,
        }
    }
}

/// Status API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8327".parse().expect("valid default addr"),
            max_connections: 64,
        }
    }
}

fn default_provider_kind() -> String {
    "codex".to_string()
}

fn default_key_store_path() -> PathBuf {
    PathBuf::from("codex-sweeper-keys.json")
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if !config.management.base_url.starts_with("http://")
            && !config.management.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "management.base_url must start with http:// or https://, got: {}",
                config.management.base_url
            )));
        }

        if config.sweep.interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep.interval_secs must be greater than 0".into(),
            ));
        }

        if config.sweep.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "sweep.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.sweep.probe_concurrency == 0 || config.sweep.delete_concurrency == 0 {
            return Err(common::Error::Config(
                "sweep concurrency limits must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("codex-sweeper.toml")
    }

    /// Per-call timeout for management requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep.request_timeout_secs)
    }

    /// Settings handed to the reconciliation loop.
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            provider_kind: self.management.provider_kind.to_lowercase(),
            interval: Duration::from_secs(self.sweep.interval_secs),
            probe_concurrency: self.sweep.probe_concurrency,
            delete_concurrency: self.sweep.delete_concurrency,
            min_consecutive_invalid: self.sweep.min_consecutive_invalid,
            probe_url: self.probe.url.clone(),
        }
    }
}
