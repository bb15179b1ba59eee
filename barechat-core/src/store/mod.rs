//! Chat log persistence
//!
//! The host hands every sent and received message to a [`LogStore`]. Stores
//! are best effort: a failure is reported to the caller, which logs it and
//! carries on delivering.

use std::path::PathBuf;
use thiserror::Error;

mod file_store;

pub use file_store::FileLogStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write chat log {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Log store unavailable: {0}")]
    Unavailable(String),
}

/// Destination for the chat transcript
pub trait LogStore: Send {
    /// Start a transcript for `topic`. Returns false when logging is disabled.
    fn setup(&mut self, topic: &str) -> Result<bool, StoreError>;

    /// Record one message. Returns false when nothing was written.
    fn append(&mut self, member: &str, message: &str) -> Result<bool, StoreError>;

    /// Finish the transcript and report where it was saved
    fn close(&mut self) -> Result<Option<PathBuf>, StoreError>;
}
