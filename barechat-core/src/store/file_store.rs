use chrono::{Local, SecondsFormat, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{LogStore, StoreError};

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Appends a plain-text transcript to a single file.
///
/// ```text
/// === Chat session started at 2025-03-01 10:15:30 ===
/// === Room: 9c7f... ===
///
/// [2025-03-01T10:15:31.204Z] [you] hello
/// [2025-03-01T10:15:33.918Z] [a1b2c3] hi there
///
/// === Chat session ended at 2025-03-01 10:20:02 ===
/// ```
///
/// A second session against an existing file starts with a blank line so
/// transcripts stay separated. Setting up a new room ends the open session
/// with its footer first. Missing parent directories are created.
pub struct FileLogStore {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            file: None,
        }
    }

    /// A store that accepts everything and writes nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone().unwrap_or_default(),
            source,
        }
    }

    /// End the open session, if any. Returns whether one was open.
    fn finish_session(&mut self) -> Result<bool, StoreError> {
        let Some(mut file) = self.file.take() else {
            return Ok(false);
        };

        let footer = format!(
            "\n=== Chat session ended at {} ===\n",
            Local::now().format(LOCAL_TIME_FORMAT)
        );
        file.write_all(footer.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| self.io_error(e))?;
        Ok(true)
    }
}

impl LogStore for FileLogStore {
    fn setup(&mut self, topic: &str) -> Result<bool, StoreError> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };

        if self.finish_session()? {
            debug!(path = %path.display(), "Previous chat session closed");
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let existed = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| self.io_error(e))?;

        let mut header = format!(
            "=== Chat session started at {} ===\n=== Room: {} ===\n\n",
            Local::now().format(LOCAL_TIME_FORMAT),
            topic
        );
        if existed {
            header.insert(0, '\n');
        }

        file.write_all(header.as_bytes())
            .map_err(|e| self.io_error(e))?;
        self.file = Some(file);

        info!(path = %path.display(), "Chat log opened");
        Ok(true)
    }

    fn append(&mut self, member: &str, message: &str) -> Result<bool, StoreError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };

        let line = format!(
            "[{}] [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            member,
            message
        );

        if let Err(e) = file.write_all(line.as_bytes()) {
            return Err(self.io_error(e));
        }
        Ok(true)
    }

    fn close(&mut self) -> Result<Option<PathBuf>, StoreError> {
        if !self.finish_session()? {
            debug!("Chat log was never opened");
            return Ok(None);
        }

        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        let mut store = FileLogStore::new(&path);

        assert!(store.setup("abc123").unwrap());
        assert!(store.append("you", "hello").unwrap());
        assert!(store.append("a1b2c3", "hi there").unwrap());
        assert_eq!(store.close().unwrap(), Some(path.clone()));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert!(lines[0].starts_with("=== Chat session started at "));
        assert_eq!(lines[1], "=== Room: abc123 ===");
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with('['));
        assert!(lines[3].ends_with("] [you] hello"));
        assert!(lines[4].ends_with("] [a1b2c3] hi there"));
        assert_eq!(lines[5], "");
        assert!(lines[6].starts_with("=== Chat session ended at "));
    }

    #[test]
    fn test_second_session_is_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");

        let mut first = FileLogStore::new(&path);
        first.setup("room").unwrap();
        first.close().unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let mut second = FileLogStore::new(&path);
        second.setup("room").unwrap();
        second.close().unwrap();
        let after = std::fs::read_to_string(&path).unwrap();

        assert!(after.starts_with(&before));
        assert!(after[before.len()..].starts_with("\n=== Chat session started at "));
    }

    #[test]
    fn test_disabled_store() {
        let mut store = FileLogStore::disabled();
        assert!(!store.setup("room").unwrap());
        assert!(!store.append("you", "lost").unwrap());
        assert_eq!(store.close().unwrap(), None);
    }

    #[test]
    fn test_append_before_setup_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        let mut store = FileLogStore::new(&path);

        assert!(!store.append("you", "early").unwrap());
        assert_eq!(store.close().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("new").join("chat.txt");
        let mut store = FileLogStore::new(&path);

        assert!(store.setup("room").unwrap());
        assert!(store.append("you", "hello").unwrap());
        assert_eq!(store.close().unwrap(), Some(path.clone()));
        assert!(std::fs::read_to_string(&path).unwrap().contains("[you] hello"));
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"plain file").unwrap();
        let path = blocker.join("chat.txt");
        let mut store = FileLogStore::new(&path);

        assert!(matches!(store.setup("room"), Err(StoreError::Io { .. })));
        assert!(!store.is_open());
    }

    #[test]
    fn test_rejoin_closes_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        let mut store = FileLogStore::new(&path);

        store.setup("room-a").unwrap();
        store.append("you", "in a").unwrap();
        store.setup("room-b").unwrap();
        store.append("you", "in b").unwrap();
        store.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("=== Chat session started at ").count(), 2);
        assert_eq!(contents.matches("=== Chat session ended at ").count(), 2);

        let first_end = contents.find("=== Chat session ended at ").unwrap();
        let room_b = contents.find("=== Room: room-b ===").unwrap();
        assert!(contents.find("[you] in a").unwrap() < first_end);
        assert!(first_end < room_b);
        assert!(room_b < contents.find("[you] in b").unwrap());
    }
}
