//! Configuration for a BareChat session host
//!
//! Defaults, a TOML file, and `BARECHAT_<SECTION>_<KEY>` environment variables
//! are layered in that order. Every loader validates before returning.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Default chat log path used when `--store` is given without a value
pub const DEFAULT_STORE_PATH: &str = "./barechat.txt";

/// Upper bound for a single control frame or peer envelope (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub swarm: SwarmConfig,
    pub control: ControlConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Swarm substrate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Address the TCP substrate listens on for inbound peers
    pub listen_address: String,

    /// Peers dialled when a topic is joined (`host:port`)
    pub bootstrap: Vec<String>,

    /// Give up on a bootstrap dial or hello exchange after this long
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Largest peer message accepted off the wire
    pub max_message_size: usize,
}

/// Control channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Unix socket served for out-of-process front-ends (disabled when unset)
    pub socket_path: Option<PathBuf>,

    /// Caller-side timeout for a single request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Largest control frame accepted
    pub max_frame_size: usize,
}

/// Chat log store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Chat log file; logging to disk is disabled when unset
    pub log_path: Option<PathBuf>,
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:49737".to_string(),
            bootstrap: vec![],
            connect_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            request_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl ControlConfig {
    /// Socket path used by the CLI when none is configured
    pub fn default_socket_path() -> PathBuf {
        env::temp_dir().join("barechat-rpc.sock")
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Environment variables follow the pattern: BARECHAT_<SECTION>_<KEY>
    /// Example: BARECHAT_SWARM_BOOTSTRAP=10.0.0.2:49737,10.0.0.3:49737
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `BARECHAT_*` overrides in place
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = env::var("BARECHAT_SWARM_LISTEN_ADDRESS") {
            self.swarm.listen_address = addr;
        }
        if let Ok(peers) = env::var("BARECHAT_SWARM_BOOTSTRAP") {
            self.swarm.bootstrap = split_list(&peers);
        }
        if let Ok(timeout) = env::var("BARECHAT_SWARM_CONNECT_TIMEOUT") {
            self.swarm.connect_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::Env {
                    var: "BARECHAT_SWARM_CONNECT_TIMEOUT",
                    reason: e.to_string(),
                })?;
        }

        if let Ok(path) = env::var("BARECHAT_CONTROL_SOCKET_PATH") {
            self.control.socket_path = Some(PathBuf::from(path));
        }
        if let Ok(timeout) = env::var("BARECHAT_CONTROL_REQUEST_TIMEOUT") {
            self.control.request_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::Env {
                    var: "BARECHAT_CONTROL_REQUEST_TIMEOUT",
                    reason: e.to_string(),
                })?;
        }

        if let Ok(path) = env::var("BARECHAT_STORE_LOG_PATH") {
            self.store.log_path = Some(PathBuf::from(path));
        }

        if let Ok(level) = env::var("BARECHAT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(json) = env::var("BARECHAT_LOG_JSON") {
            self.logging.json_format = json
                .parse()
                .map_err(|_| ConfigError::Env {
                    var: "BARECHAT_LOG_JSON",
                    reason: format!("expected true or false, got '{}'", json),
                })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swarm.listen_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "swarm.listen_address must not be empty".to_string(),
            ));
        }

        if let Some(bad) = self.swarm.bootstrap.iter().find(|peer| !peer.contains(':')) {
            return Err(ConfigError::Invalid(format!(
                "bootstrap peer '{}' is not host:port",
                bad
            )));
        }

        if self.swarm.max_message_size == 0 || self.control.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "frame size limits must be greater than 0".to_string(),
            ));
        }

        if self.control.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "control.request_timeout must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

/// Split a comma-separated endpoint list, dropping empty entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
