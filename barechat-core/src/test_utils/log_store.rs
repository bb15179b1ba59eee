//! Log store that keeps everything in memory

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::store::{LogStore, StoreError};

#[derive(Debug, Default)]
struct Transcript {
    topics: Vec<String>,
    lines: Vec<(String, String)>,
    closed: bool,
    fail_appends: bool,
}

/// Cloneable handle; clones share one transcript so tests can inspect what
/// the host wrote after handing the store over.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<Mutex<Transcript>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append fail
    pub fn fail_appends(&self) {
        if let Ok(mut t) = self.inner.lock() {
            t.fail_appends = true;
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.lock().map(|t| t.topics.clone()).unwrap_or_default()
    }

    /// `(member, message)` pairs in append order
    pub fn lines(&self) -> Vec<(String, String)> {
        self.inner.lock().map(|t| t.lines.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|t| t.closed).unwrap_or(false)
    }

    fn transcript(&self) -> Result<std::sync::MutexGuard<'_, Transcript>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("transcript lock poisoned".to_string()))
    }
}

impl LogStore for MemoryLogStore {
    fn setup(&mut self, topic: &str) -> Result<bool, StoreError> {
        self.transcript()?.topics.push(topic.to_string());
        Ok(true)
    }

    fn append(&mut self, member: &str, message: &str) -> Result<bool, StoreError> {
        let mut t = self.transcript()?;
        if t.fail_appends {
            return Err(StoreError::Unavailable("appends disabled".to_string()));
        }
        t.lines.push((member.to_string(), message.to_string()));
        Ok(true)
    }

    fn close(&mut self) -> Result<Option<PathBuf>, StoreError> {
        self.transcript()?.closed = true;
        Ok(None)
    }
}
