use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cast: CastConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

/// Ephemeral file server used for local media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_serve_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastConfig {
    /// How long to browse mDNS for the named device before giving up.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
}

/// Quit-mode behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_serve_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout_secs(),
            autoplay: default_autoplay(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CastConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

impl ReaperConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_serve_port() -> u16 {
    platform::DEFAULT_SERVE_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_discovery_timeout_secs() -> u64 {
    10
}

fn default_autoplay() -> bool {
    true
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Config {
    /// Load the user config, writing the defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load an explicit config file.  Never writes.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
