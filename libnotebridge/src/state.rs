//! Persisted sync cursor
//!
//! The cursor is the id of the last note the engine observed. It is
//! written after every observed note, so a crash mid-batch resumes right
//! after the last note that was handed downstream.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StateError};
use crate::types::NoteId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub since_id: Option<NoteId>,
    /// RFC 3339 timestamp of the last save. Kept as text so state files
    /// written with a naive local timestamp still load.
    #[serde(default)]
    pub last_run: Option<String>,
}

/// Storage for the sync cursor
pub trait CursorStore: Send + Sync {
    /// Last saved cursor. Missing or unreadable state means "start fresh".
    fn load(&self) -> Option<NoteId>;

    fn save(&self, since_id: &NoteId) -> Result<()>;
}

/// JSON state file, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_state(&self) -> Option<CursorState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read state file, starting fresh");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file is corrupt, starting fresh");
                None
            }
        }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Option<NoteId> {
        self.read_state().and_then(|state| state.since_id)
    }

    fn save(&self, since_id: &NoteId) -> Result<()> {
        let state = CursorState {
            since_id: Some(since_id.clone()),
            last_run: Some(Utc::now().to_rfc3339()),
        };
        let json = serde_json::to_string(&state).map_err(StateError::Serialize)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(StateError::Io)?;
        }

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(StateError::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(StateError::Io)?;

        debug!(since_id = %since_id, path = %self.path.display(), "Saved cursor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = FileCursorStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCursorStore::new(dir.path().join("nested").join("state.json"));

        store.save(&NoteId::new("9kq2a1b0c0")).unwrap();
        assert_eq!(store.load(), Some(NoteId::new("9kq2a1b0c0")));

        let state = store.read_state().unwrap();
        let last_run = state.last_run.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&last_run).is_ok());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites_previous_cursor() {
        let dir = TempDir::new().unwrap();
        let store = FileCursorStore::new(dir.path().join("state.json"));

        store.save(&NoteId::new("a1")).unwrap();
        store.save(&NoteId::new("a2")).unwrap();
        assert_eq!(store.load(), Some(NoteId::new("a2")));
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(FileCursorStore::new(path).load(), None);
    }

    #[test]
    fn test_reads_state_without_last_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"since_id": "a9"}"#).unwrap();

        assert_eq!(FileCursorStore::new(path).load(), Some(NoteId::new("a9")));
    }

    #[test]
    fn test_reads_state_with_naive_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"since_id": "a9", "last_run": "2024-03-01T12:00:00.123456"}"#,
        )
        .unwrap();

        assert_eq!(FileCursorStore::new(path).load(), Some(NoteId::new("a9")));
    }
}
