// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Waddle Social

//! Configuration management for buddycloud-discover.
//!
//! Configuration is loaded from XDG directories:
//! - `~/.config/buddycloud/config.toml` - Main configuration
//! - `~/.cache/buddycloud/discovery.json` - Discovered servers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use buddycloud_xmpp::{CacheSnapshot, DiscoveryConfig};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "buddycloud";

/// XMPP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmppConfig {
    /// XMPP JID (e.g., user@example.com)
    pub jid: Option<String>,
    /// Account password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// XMPP server host (if different from JID domain)
    pub server: Option<String>,
    /// Port (default 5222)
    pub port: u16,
}

impl Default for XmppConfig {
    fn default() -> Self {
        Self {
            jid: None,
            password: None,
            server: None,
            port: 5222,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// XMPP configuration
    pub xmpp: XmppConfig,
    /// Discovery timeouts
    pub discovery: DiscoveryConfig,
    /// Where discovered servers are persisted between runs
    pub cache_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, or from the XDG config directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file_path()?,
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Get the path to the config file
    pub fn config_file_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Failed to determine config directory")?;
        Ok(dir.join(APP_DIR).join("config.toml"))
    }

    /// Get the path to the discovery cache
    pub fn cache_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache_file {
            return Ok(path.clone());
        }
        let dir = dirs::cache_dir().context("Failed to determine cache directory")?;
        Ok(dir.join(APP_DIR).join("discovery.json"))
    }

    /// Read the persisted discovery cache; a missing file is an empty cache.
    pub fn load_cache(&self) -> Result<CacheSnapshot> {
        let path = self.cache_file_path()?;
        if !path.exists() {
            return Ok(CacheSnapshot::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache file: {:?}", path))
    }

    /// Persist the discovery cache
    pub fn save_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let path = self.cache_file_path()?;

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize cache")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write cache file: {:?}", path))?;

        tracing::debug!("Saved discovery cache to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddycloud_xmpp::MediaServerInfo;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.xmpp.port, 5222);
        assert_eq!(config.discovery.discovery_timeout_ms, 8_000);
        assert_eq!(config.discovery.media_discovery_timeout_ms, 10_000);
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
            cache_file = "/tmp/bc.json"

            [xmpp]
            jid = "romeo@example.com"
            password = "secret"

            [discovery]
            discovery_timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.xmpp.jid.as_deref(), Some("romeo@example.com"));
        assert_eq!(config.xmpp.password.as_deref(), Some("secret"));
        assert_eq!(config.xmpp.port, 5222);
        assert_eq!(config.discovery.discovery_timeout_ms, 2000);
        assert_eq!(config.discovery.media_discovery_timeout_ms, 10_000);
        assert_eq!(config.cache_file, Some(PathBuf::from("/tmp/bc.json")));
    }

    #[test]
    fn test_password_is_not_written_back() {
        let mut config = Config::default();
        config.xmpp.password = Some("secret".into());

        let toml = toml::to_string_pretty(&config).unwrap();

        assert!(!toml.contains("secret"));
    }

    #[test]
    fn test_cache_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_file: Some(dir.path().join("nested").join("discovery.json")),
            ..Config::default()
        };
        assert_eq!(config.load_cache().unwrap(), CacheSnapshot::default());

        let mut snapshot = CacheSnapshot::default();
        snapshot
            .channel
            .insert("example.com".into(), "channels.example.com".into());
        snapshot
            .media
            .insert("example.com".into(), MediaServerInfo::new("media.example.com"));
        config.save_cache(&snapshot).unwrap();

        assert_eq!(config.load_cache().unwrap(), snapshot);
    }
}
