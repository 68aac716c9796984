//! Runtime configuration
//!
//! Loaded from a TOML file (every key optional), then overridden by CLI flags
//! and `OTA_*` environment variables in `main`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OtaError, OtaResult};
use crate::synth::BaselineTemplate;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "ota-relay.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub push: PushConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub baseline: BaselineTemplate,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Pull endpoint, SSE stream and diagnostics
    pub http_port: u16,
    /// Dedicated WebSocket listener
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
            ws_port: 3001,
        }
    }
}

impl ServerConfig {
    pub fn http_addr(&self) -> OtaResult<SocketAddr> {
        socket_addr(&self.host, self.http_port)
    }

    pub fn ws_addr(&self) -> OtaResult<SocketAddr> {
        socket_addr(&self.host, self.ws_port)
    }
}

fn socket_addr(host: &str, port: u16) -> OtaResult<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| OtaError::Config(format!("invalid listen address {host}:{port}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub key_prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key_prefix: "nxs_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub heartbeat_secs: u64,
    pub write_timeout_ms: u64,
    /// Frames buffered per connection before writes start waiting
    pub client_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            write_timeout_ms: 2_000,
            client_buffer: 32,
        }
    }
}

impl PushConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub seed_file: Option<PathBuf>,
    pub max_payload_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            seed_file: Some(PathBuf::from("seed/updates.json")),
            max_payload_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Globs (or plain file paths) whose modifications produce updates
    pub paths: Vec<String>,
    /// Path components that are never tracked
    pub exclude: Vec<String>,
    /// Files above this size contribute an empty code fragment
    pub max_file_bytes: u64,
    /// Statements lifted from a changed file into the update's code
    pub fragment_pattern: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: vec![
                "../react-native-sdk/src/**/*.ts".to_string(),
                "../react-native-sdk/src/**/*.js".to_string(),
                "seed/updates.json".to_string(),
            ],
            exclude: vec!["node_modules".to_string()],
            max_file_bytes: 1_000_000,
            fragment_pattern: r"console\.log\([^)]+\)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Adds a daily rolling log file when set
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl Config {
    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] when present, or defaults.
    pub fn load(path: Option<&Path>) -> OtaResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| OtaError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
            .map_err(|e| OtaError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> OtaResult<Self> {
        toml::from_str(content).map_err(|e| OtaError::Config(e.to_string()))
    }
}
