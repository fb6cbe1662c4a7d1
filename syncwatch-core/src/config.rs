//! Configuration
//!
//! Read from an optional TOML file. Every field has a default, so an empty
//! file (or none at all) gives a working setup.
//!
//! ```toml
//! display_name = "Alice"
//!
//! [player]
//! binary = "/usr/bin/mpv"
//!
//! [signaling]
//! url = "https://ntfy.example.com"
//!
//! [sync]
//! position_tolerance = 0.5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name shown to the other peers
    pub display_name: String,
    pub player: PlayerConfig,
    pub signaling: SignalingConfig,
    pub network: NetworkConfig,
    pub torrent: TorrentConfig,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: "Guest".to_string(),
            player: PlayerConfig::default(),
            signaling: SignalingConfig::default(),
            network: NetworkConfig::default(),
            torrent: TorrentConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// mpv process and IPC connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub binary: String,
    /// IPC socket (named pipe on Windows)
    pub socket_path: String,
    /// Extra arguments for the player
    pub args: Vec<String>,
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    /// Feed room link and peers to an overlay script inside the player
    pub overlay: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: "mpv".to_string(),
            socket_path: default_socket_path(),
            args: Vec::new(),
            connect_attempts: 25,
            connect_delay_ms: 200,
            overlay: true,
        }
    }
}

#[cfg(windows)]
fn default_socket_path() -> String {
    r"\\.\pipe\syncwatch-socket".to_string()
}

#[cfg(not(windows))]
fn default_socket_path() -> String {
    std::env::temp_dir()
        .join(format!("syncwatch-mpv-{}.sock", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

/// ntfy signaling store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    /// Topics are `{topic_prefix}-{roomId}`
    pub topic_prefix: String,
    pub poll_interval_ms: u64,
    /// ntfy `since` for the first poll ("all", a duration like "10m", or a message id)
    pub since: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "https://ntfy.sh".to_string(),
            topic_prefix: "syncwatch".to_string(),
            poll_interval_ms: 2000,
            since: "all".to_string(),
        }
    }
}

/// libp2p data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addresses: Vec<String>,
    pub enable_mdns: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            enable_mdns: true,
        }
    }
}

/// External program magnet links are handed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            program: "webtorrent".to_string(),
            args: vec!["--mpv".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds; positions closer than this count as equal. 0 = exact match.
    pub position_tolerance: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.display_name, "Guest");
        assert_eq!(config.player.binary, "mpv");
        assert_eq!(config.signaling.url, "https://ntfy.sh");
        assert_eq!(config.torrent.program, "webtorrent");
        assert_eq!(config.sync.position_tolerance, 0.0);
        assert_eq!(config.network.listen_addresses.len(), 2);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            display_name = "Alice"

            [player]
            binary = "/opt/mpv/mpv"
            args = ["--volume=50"]

            [sync]
            position_tolerance = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.display_name, "Alice");
        assert_eq!(config.player.binary, "/opt/mpv/mpv");
        assert_eq!(config.player.args, vec!["--volume=50"]);
        assert_eq!(config.player.connect_attempts, 25);
        assert_eq!(config.sync.position_tolerance, 0.5);
        assert_eq!(config.signaling, SignalingConfig::default());
    }

    #[test]
    fn test_invalid_file() {
        assert!(Config::from_toml("display_name = 3").is_err());

        let missing = Path::new("/nonexistent/syncwatch.toml");
        assert!(matches!(
            Config::load(Some(missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}
