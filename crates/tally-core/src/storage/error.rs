//! Storage error handling
//!
//! Local state is a single JSON file, so failures come down to the
//! filesystem refusing us or the file no longer parsing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing local state
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied on '{path}'")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left while writing '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure
    #[error("Failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file exists but does not decode as a document tree
    #[error("Local state at '{path}' is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The temp file was written but could not replace the state file
    #[error("Could not replace '{to}' with '{from}': {source}")]
    Replace {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode local state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    /// Classify an I/O failure while performing `action` on `path`
    pub fn io(action: &'static str, error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full(&error) => StorageError::DiskFull {
                path,
                source: error,
            },
            _ => StorageError::Io {
                action,
                path,
                source: error,
            },
        }
    }

    /// What the user can do about it, when there is something
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("free up disk space; unsynced edits are kept in memory until then"),
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                Some("check that the data directory is writable, or point data_dir elsewhere")
            }
            StorageError::Corrupt { .. } => {
                Some("move the state file aside; synced spaces come back on the next load")
            }
            _ => None,
        }
    }
}

fn is_disk_full(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("quota exceeded") || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
