//! Local state persistence
//!
//! Saves the whole [`AppState`] tree as JSON. Uses atomic writes (write to
//! temp file, then rename) so a crash never leaves a half-written file.
//!
//! Storage location: `~/.local/share/tally/state.json` (configurable via `Config`)

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{StorageError, StorageResult};
use crate::config::Config;
use crate::models::AppState;

/// Persistence layer for the local document tree
#[derive(Debug, Clone)]
pub struct LocalPersistence {
    path: PathBuf,
}

impl LocalPersistence {
    /// Create a persistence handler for the configured data directory
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.state_path(),
        }
    }

    /// Create a persistence handler for an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a state file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Save the state using an atomic write
    pub fn save(&self, state: &AppState) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.path, &bytes)?;
        debug!(path = %self.path.display(), spaces = state.spaces.len(), "Saved local state");
        Ok(())
    }

    /// Load the state from disk
    ///
    /// Returns `None` if the file doesn't exist.
    pub fn load(&self) -> StorageResult<Option<AppState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path).map_err(|e| StorageError::io("read", e, self.path.clone()))?;

        let state = serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(state))
    }

    /// Load existing state or start from an empty tree
    pub fn load_or_default(&self) -> StorageResult<AppState> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Delete stored state
    pub fn delete_all(&self) -> StorageResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| StorageError::io("remove", e, self.path.clone()))?;
        }
        Ok(())
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // Same directory so the rename stays on one filesystem
    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::io("create", e, temp_path.clone()))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| StorageError::io("write", e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::Replace {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
