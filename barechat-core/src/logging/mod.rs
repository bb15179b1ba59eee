//! Diagnostic logging for the session core
//!
//! Everything in the crate logs through `tracing` macros with structured
//! fields (`topic`, `member`, `conn_id`, `id`). This module only
//! installs the global subscriber; it has nothing to do with the chat log
//! written by [`crate::store`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

use crate::config::LoggingConfig;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level when `RUST_LOG` is not set
    pub level: LogLevel,
    /// Include the emitting module path
    pub with_target: bool,
    /// Emit one JSON object per event instead of human-readable lines
    pub json_format: bool,
    /// Colourise the plain format
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            json_format: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    pub fn ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Build from the `[logging]` section of a loaded [`crate::config::Config`]
    pub fn from_settings(settings: &LoggingConfig) -> Result<Self, LoggingError> {
        let level = LogLevel::from_str(&settings.level)
            .ok_or_else(|| LoggingError::UnknownLevel(settings.level.clone()))?;

        Ok(Self::new(level)
            .with_target(settings.with_target)
            .json_format(settings.json_format))
    }
}

/// Initialize logging with the default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with a custom configuration
///
/// Logs go to stderr so that a terminal front-end can own stdout.
///
/// # Example
/// ```
/// use barechat_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_target(false);
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    if config.json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.with_ansi(config.ansi))
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;
    }

    Ok(())
}
