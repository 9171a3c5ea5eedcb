//! Durable snapshots of the session registry.
//!
//! Only the registry's persisted fields are written: every session, the
//! current session id and the current model. Generation state never appears
//! in a snapshot, so a reload can never resurrect a stream.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::constants::STORAGE_RECORD_NAME;
use crate::core::registry::{Registry, Session, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub sessions: BTreeMap<SessionId, Session>,
    #[serde(default)]
    pub current_session_id: Option<SessionId>,
    pub current_model: String,
}

impl Snapshot {
    pub fn capture(registry: &Registry) -> Self {
        Self {
            sessions: registry.sessions().clone(),
            current_session_id: registry.current_session_id().map(str::to_string),
            current_model: registry.current_model().to_string(),
        }
    }

    pub fn into_registry(self) -> Registry {
        Registry::from_parts(self.sessions, self.current_session_id, self.current_model)
    }
}

/// Errors raised while reading or writing snapshots.
#[derive(Debug)]
pub enum PersistenceError {
    /// Failed to read the snapshot file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the snapshot file.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The stored snapshot is not valid JSON for the current layout.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The registry could not be serialized.
    Serialize(serde_json::Error),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Read { path, source } => {
                write!(f, "Failed to read state at {}: {}", path.display(), source)
            }
            PersistenceError::Write { path, source } => {
                write!(f, "Failed to write state at {}: {}", path.display(), source)
            }
            PersistenceError::Parse { path, source } => {
                write!(f, "Failed to parse state at {}: {}", path.display(), source)
            }
            PersistenceError::Serialize(source) => {
                write!(f, "Failed to serialize state: {source}")
            }
        }
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PersistenceError::Read { source, .. } => Some(source),
            PersistenceError::Write { source, .. } => Some(source),
            PersistenceError::Parse { source, .. } => Some(source),
            PersistenceError::Serialize(source) => Some(source),
        }
    }
}

pub trait SnapshotStore: Send {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Moves an unreadable record out of the way so the next save cannot
    /// overwrite it. Returns where it went, or `None` when this store cannot
    /// keep it (callers must then stop saving).
    fn set_aside(&self) -> Result<Option<PathBuf>, PersistenceError> {
        Ok(None)
    }
}

/// Stores the snapshot as a single JSON document on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/chat-app-storage.json` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "colloquy", "colloquy")
            .map(|dirs| dirs.data_dir().join(format!("{STORAGE_RECORD_NAME}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<stem>.corrupt-<timestamp>.json` next to the state file.
    fn set_aside_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| STORAGE_RECORD_NAME.to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        self.path
            .with_file_name(format!("{stem}.corrupt-{stamp}.json"))
    }

    fn write_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| PersistenceError::Read {
            path: self.path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;
        }

        let contents = serde_json::to_vec(snapshot).map_err(PersistenceError::Serialize)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| self.write_error(e))?;

        temp_file
            .write_all(&contents)
            .map_err(|e| self.write_error(e))?;
        temp_file
            .as_file_mut()
            .sync_all()
            .map_err(|e| self.write_error(e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;
        Ok(())
    }

    fn set_aside(&self) -> Result<Option<PathBuf>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let target = self.set_aside_path();
        fs::rename(&self.path, &target).map_err(|e| self.write_error(e))?;
        Ok(Some(target))
    }
}

/// Keeps the serialized snapshot in memory; used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self) -> Option<String> {
        self.record.lock().ok().and_then(|record| record.clone())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let Some(raw) = self.raw() else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistenceError::Parse {
                path: PathBuf::from(STORAGE_RECORD_NAME),
                source,
            })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(snapshot).map_err(PersistenceError::Serialize)?;
        if let Ok(mut record) = self.record.lock() {
            *record = Some(raw);
        }
        Ok(())
    }
}

impl<S: SnapshotStore + Sync> SnapshotStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        (**self).load()
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        (**self).save(snapshot)
    }

    fn set_aside(&self) -> Result<Option<PathBuf>, PersistenceError> {
        (**self).set_aside()
    }
}
