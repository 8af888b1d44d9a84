//! Configuration storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stun::DEFAULT_STUN_SERVER;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub stun: StunConfig,
    pub ice: IceConfig,
    pub prioritization: PrioritizationConfig,
    pub signaling: SignalingConfig,
}

/// STUN client tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StunConfig {
    /// `host:port` entries, one server-reflexive candidate each.
    pub servers: Vec<String>,
    pub timeout_ms: u64,
    pub max_pool_size: usize,
    /// Upper bound on in-flight exchanges across the whole client.
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// Retry delay is `retry_base_delay_ms * 2^attempt`.
    pub retry_base_delay_ms: u64,
    pub rate_limit_per_window: usize,
    pub rate_window_secs: u64,
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_STUN_SERVER.to_string()],
            timeout_ms: 3000,
            max_pool_size: 100,
            max_concurrent: 100,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            rate_limit_per_window: 60,
            rate_window_secs: 60,
        }
    }
}

impl StunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

/// A TURN server with optional long-term credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IceConfig {
    pub max_candidates: usize,
    pub candidate_lifetime_secs: u64,
    pub default_min_bandwidth_bps: u64,
    /// Explicit host addresses. Empty means detect the default outbound address.
    pub interfaces: Vec<String>,
    pub turn_servers: Vec<TurnServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            candidate_lifetime_secs: 15 * 60,
            default_min_bandwidth_bps: 10_000_000,
            interfaces: Vec::new(),
            turn_servers: Vec::new(),
        }
    }
}

impl IceConfig {
    pub fn candidate_lifetime(&self) -> Duration {
        Duration::from_secs(self.candidate_lifetime_secs)
    }
}

/// Weights used by the candidate scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrioritizationConfig {
    pub latency_weight: f64,
    pub bandwidth_weight: f64,
    pub packet_loss_weight: f64,
    pub proximity_weight: f64,
}

impl Default for PrioritizationConfig {
    fn default() -> Self {
        Self {
            latency_weight: 0.3,
            bandwidth_weight: 0.3,
            packet_loss_weight: 0.2,
            proximity_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    pub bind: String,
    /// WebSocket upgrade path; other paths are refused during the handshake.
    pub path: String,
    pub outbound_buffer: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            path: "/ws".to_string(),
            outbound_buffer: 128,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "rtc-signal", "rtc-signal")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.stun.servers, vec!["stun.l.google.com:19302".to_string()]);
        assert_eq!(config.stun.timeout(), Duration::from_secs(3));
        assert_eq!(config.stun.rate_limit_per_window, 60);
        assert_eq!(config.ice.max_candidates, 10);
        assert_eq!(config.ice.candidate_lifetime(), Duration::from_secs(900));
        assert_eq!(config.signaling.path, "/ws");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            "[stun]\ntimeout_ms = 250\n\n[signaling]\nbind = \"127.0.0.1:9000\"\n",
        )
        .unwrap();
        assert_eq!(config.stun.timeout_ms, 250);
        assert_eq!(config.stun.max_retries, 3);
        assert_eq!(config.signaling.bind, "127.0.0.1:9000");
        assert_eq!(config.signaling.path, "/ws");
        assert_eq!(config.prioritization, PrioritizationConfig::default());
    }

    #[test]
    fn test_save_and_load_from_path() {
        let dir = std::env::temp_dir().join(format!("rtc-signal-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.ice.turn_servers.push(TurnServerConfig {
            host: "turn.example.org".into(),
            port: 3478,
            username: Some("alice".into()),
            password: Some("secret".into()),
        });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("rtc-signal-does-not-exist/config.toml");
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }
}
