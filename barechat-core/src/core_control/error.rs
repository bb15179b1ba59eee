use thiserror::Error;

/// Control channel error types
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Request timeout")]
    Timeout,

    #[error("Control channel closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}
