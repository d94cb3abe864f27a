//! Configuration for the relay and its clients
//!
//! Every section is optional in the TOML file; missing keys take their
//! defaults. The default file lives in the platform config directory:
//! - macOS: ~/Library/Application Support/rendezvous/config.toml
//! - Linux: ~/.config/rendezvous/config.toml
//! - Windows: %APPDATA%/rendezvous/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    DEFAULT_PORT, HEARTBEAT_INTERVAL_SECS, MAX_MEMBERS_PER_ROOM, REAP_INTERVAL_SECS,
    ROOM_RETENTION_SECS,
};

/// Top-level config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings
    pub relay: RelayConfig,
    /// Client settings
    pub client: ClientConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen port
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
    /// Maximum members per room
    pub max_members_per_room: usize,
    /// Liveness probe interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Empty-room sweep interval in seconds
    pub reap_interval_secs: u64,
    /// How long an empty room survives before it may be reaped, in seconds
    pub room_retention_secs: u64,
    /// How long shutdown waits for connections to drain, in seconds
    pub shutdown_drain_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_members_per_room: MAX_MEMBERS_PER_ROOM,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            reap_interval_secs: REAP_INTERVAL_SECS,
            room_retention_secs: ROOM_RETENTION_SECS,
            shutdown_drain_secs: 5,
        }
    }
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn room_retention(&self) -> Duration {
        Duration::from_secs(self.room_retention_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the relay
    pub relay_url: String,
    /// Reconnection settings
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://localhost:{}", DEFAULT_PORT),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Relay reconnect schedule for clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Config {
    /// Read the config file at the platform default location
    ///
    /// Never fails: a missing directory, a missing file or an unreadable
    /// file all fall back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            debug!("No platform config directory, running with defaults");
            return Self::default();
        };

        Self::load_from(&path).unwrap_or_else(|e| {
            warn!("Ignoring config at {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Read a config file; a file that does not exist yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, running with defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e.to_string())),
        };

        let config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Write this config as TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let text =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        std::fs::write(path, text).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Config written to {}", path.display());
        Ok(())
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("com", "rendezvous", "rendezvous")?;
        Some(dirs.config_dir().join("config.toml"))
    }

    /// Defaults rendered as TOML (`rendezvous-relay --print-config`)
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Failure reading or writing a config file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    Io(String),

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("cannot encode config: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.port, 8080);
        assert_eq!(config.relay.max_members_per_room, 8);
        assert_eq!(config.relay.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.relay.room_retention(), Duration::from_secs(3600));
        assert_eq!(config.client.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [relay]
            port = 9000

            [client.reconnect]
            max_attempts = 3
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.client.reconnect.max_attempts, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.relay.max_members_per_room, 8);
        assert_eq!(config.client.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn test_sample_config() {
        let sample = Config::sample();
        assert!(sample.contains("[relay]"));
        assert!(sample.contains("[client.reconnect]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.relay.room_retention_secs = 120;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.relay.room_retention_secs, 120);
    }

    #[test]
    fn test_config_load_missing() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.relay.port, 8080);
    }

    #[test]
    fn test_config_load_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "relay = 5").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
