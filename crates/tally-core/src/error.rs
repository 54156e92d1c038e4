//! Sync error types
//!
//! Engine entry points never surface these to callers; they are turned into
//! status transitions and sync log entries. They exist so internal code can
//! use `?` and so every failure lands in the log with a precise message.

use std::time::Duration;

use thiserror::Error;

use crate::remote::DocPath;

/// Errors reported by a remote store implementation
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Store cannot be reached
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the write
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),

    /// Caller lacks access to the path
    #[error("Permission denied for '{0}'")]
    PermissionDenied(DocPath),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// No user is signed in
    #[error("Not signed in")]
    NotAuthenticated,

    /// Batch commit failed; dirty documents are retried on the next flush
    #[error("Failed to push changes: {0}")]
    Write(#[source] RemoteError),

    /// Initial load failed
    #[error("Failed to load remote data: {0}")]
    Read(#[source] RemoteError),

    /// One shared space could not be attached
    #[error("Failed to attach shared space '{space_id}': {source}")]
    PartialShare {
        space_id: String,
        #[source]
        source: RemoteError,
    },

    /// Remote call exceeded its deadline
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Remote document could not be decoded
    #[error("Malformed document at '{path}': {source}")]
    Decode {
        path: DocPath,
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    /// Whether the failure should move the status to `Error`
    pub fn is_fatal_for_status(&self) -> bool {
        !matches!(
            self,
            SyncError::NotAuthenticated | SyncError::PartialShare { .. } | SyncError::Decode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = SyncError::Timeout {
            operation: "commit",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "commit timed out after 1500ms");
        assert!(err.is_fatal_for_status());
    }

    #[test]
    fn test_partial_share_is_not_fatal() {
        let err = SyncError::PartialShare {
            space_id: "s1".to_string(),
            source: RemoteError::PermissionDenied(DocPath::space("bob", "s1")),
        };
        let msg = err.to_string();
        assert!(msg.contains("s1"));
        assert!(msg.contains("users/bob/spaces/s1"));
        assert!(!err.is_fatal_for_status());
        assert!(!SyncError::NotAuthenticated.is_fatal_for_status());
    }

    #[test]
    fn test_write_error_keeps_source() {
        let err = SyncError::Write(RemoteError::Rejected("quota".to_string()));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("quota"));
    }
}
