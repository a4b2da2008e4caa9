//! Configuration surface for the remote control subsystem
//!
//! An immutable `RemoteConfig` is constructed once at startup and passed by
//! reference to each component; nothing reads mutable global settings.
//! Changes are applied through explicit reconfiguration (the peer manager
//! accepts a new instance list, everything else restarts with a new config).
//! The peer-instance list persists as a JSON array of objects in the user's
//! config directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration entry for one outbound peer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInstance {
    /// Configured HTTP(S) URL of the remote instance. Uniqueness key.
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Which state categories are forwarded to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlags {
    #[serde(default = "default_true")]
    pub position: bool,
    #[serde(default = "default_true")]
    pub volume: bool,
    #[serde(default = "default_true")]
    pub carrier: bool,
    #[serde(default = "default_true")]
    pub play_state: bool,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            position: true,
            volume: true,
            carrier: true,
            play_state: true,
        }
    }
}

/// Immutable configuration for the remote control subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Whether the subsystem starts at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Control HTTP port. The WebSocket endpoint is on `port + 1`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind to 127.0.0.1 only. Defaults on: combined with the permissive
    /// empty-password default, binding wide open must be an explicit choice.
    #[serde(default = "default_true")]
    pub localhost_only: bool,
    #[serde(default)]
    pub username: String,
    /// Empty password disables authentication entirely.
    #[serde(default)]
    pub password: String,
    /// Ordered outbound peer list, keyed by url.
    #[serde(default)]
    pub peers: Vec<PeerInstance>,
    #[serde(default)]
    pub sync: SyncFlags,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            localhost_only: true,
            username: String::new(),
            password: String::new(),
            peers: Vec::new(),
            sync: SyncFlags::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    7860
}

impl RemoteConfig {
    /// Host to bind listeners to.
    pub fn bind_host(&self) -> &'static str {
        if self.localhost_only {
            "127.0.0.1"
        } else {
            "0.0.0.0"
        }
    }

    /// WebSocket control port (HTTP port + 1).
    pub fn ws_port(&self) -> u16 {
        self.port.saturating_add(1)
    }

    /// Whether inbound connections must authenticate.
    pub fn auth_enabled(&self) -> bool {
        !self.password.is_empty()
    }

    /// Parse a peer list from its persisted JSON array form.
    pub fn peers_from_json(json: &str) -> Result<Vec<PeerInstance>, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize a peer list to its persisted JSON array form.
    pub fn peers_to_json(peers: &[PeerInstance]) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(peers)?)
    }

    /// Load the persisted peer list from the config directory, if present.
    pub fn load_peers() -> Result<Vec<PeerInstance>, ConfigError> {
        let path = peers_path().ok_or(ConfigError::NoConfigDir)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        Self::peers_from_json(&contents)
    }

    /// Persist the peer list to the config directory.
    pub fn save_peers(peers: &[PeerInstance]) -> Result<(), ConfigError> {
        let path = peers_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, Self::peers_to_json(peers)?)?;
        Ok(())
    }
}

/// Peer list file location inside the user's config directory.
fn peers_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("SignalRemote");
        p.push("peers.json");
        p
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not find config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemoteConfig::default();
        assert!(config.enabled);
        assert!(config.localhost_only);
        assert_eq!(config.bind_host(), "127.0.0.1");
        assert_eq!(config.ws_port(), config.port + 1);
        assert!(!config.auth_enabled());
        assert!(config.sync.position);
    }

    #[test]
    fn test_auth_enabled_with_password() {
        let config = RemoteConfig {
            password: "secret".to_string(),
            ..Default::default()
        };
        assert!(config.auth_enabled());
    }

    #[test]
    fn test_peer_list_json_round_trip() {
        let peers = vec![
            PeerInstance {
                url: "http://host-a:9000".to_string(),
                enabled: true,
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
            PeerInstance {
                url: "https://host-b:9000".to_string(),
                enabled: false,
                username: String::new(),
                password: String::new(),
            },
        ];

        let json = RemoteConfig::peers_to_json(&peers).unwrap();
        let parsed = RemoteConfig::peers_from_json(&json).unwrap();
        assert_eq!(parsed, peers);
    }

    #[test]
    fn test_peer_list_defaults_applied() {
        let json = r#"[{"url": "http://host:9000"}]"#;
        let peers = RemoteConfig::peers_from_json(json).unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].enabled);
        assert!(peers[0].username.is_empty());
    }

    #[test]
    fn test_config_deserializes_with_partial_fields() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"port": 9000, "localhost_only": false}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_host(), "0.0.0.0");
        assert!(config.enabled);
        assert!(config.peers.is_empty());
    }
}
