//! Configuration management for deskd.
//!
//! Loads settings from /etc/deskd/config.toml or uses defaults.

use anyhow::{Context, Result};
use desk_common::{DEFAULT_BIND_ADDR, DEFAULT_PURCHASABLE_SIZES, DEFAULT_UTC_OFFSET_MINUTES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/deskd/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/deskd/config.toml";

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(desk_common::db::DEFAULT_DB_PATH)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Quota rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Civil timezone for month boundaries, minutes east of UTC (330 = Asia/Colombo)
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,

    /// Bundle sizes customers may purchase themselves
    #[serde(default = "default_bundle_sizes")]
    pub purchasable_bundle_sizes: Vec<u32>,
}

fn default_utc_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

fn default_bundle_sizes() -> Vec<u32> {
    DEFAULT_PURCHASABLE_SIZES.to_vec()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset(),
            purchasable_bundle_sizes: default_bundle_sizes(),
        }
    }
}

/// Notification delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Events are POSTed here as JSON. Unset means log only.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_notify_timeout() -> u64 {
    5
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load config from file or use defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        desk_common::clock::offset_from_minutes(self.quota.utc_offset_minutes)?;
        if self.quota.purchasable_bundle_sizes.contains(&0) {
            anyhow::bail!("purchasable_bundle_sizes must not contain 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:7870");
        assert_eq!(config.quota.utc_offset_minutes, 330);
        assert_eq!(config.quota.purchasable_bundle_sizes, vec![3, 5, 10]);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[server]
bind_addr = "0.0.0.0:9000"

[quota]
purchasable_bundle_sizes = [5, 20]

[notify]
webhook_url = "http://mailer.local/hook"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.quota.purchasable_bundle_sizes, vec![5, 20]);
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("http://mailer.local/hook")
        );
        // Defaults for missing fields
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.quota.utc_offset_minutes, 330);
        assert_eq!(config.notify.timeout_secs, 5);
    }

    #[test]
    fn test_load_rejects_bad_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[quota]\nutc_offset_minutes = 100000\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
