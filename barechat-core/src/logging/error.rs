//! Error types for the logging subsystem

use thiserror::Error;

/// Errors raised while configuring or installing the global subscriber
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// Another subscriber is already the global default
    #[error("Failed to install log subscriber: {0}")]
    Install(String),

    #[error("Unknown log level '{0}'")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::Install("global default already set".to_string());
        assert!(err.to_string().starts_with("Failed to install log subscriber"));

        let err = LoggingError::UnknownLevel("loud".to_string());
        assert_eq!(err.to_string(), "Unknown log level 'loud'");
    }
}
