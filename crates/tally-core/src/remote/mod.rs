//! Remote document store contract
//!
//! The sync engine talks to the cloud through [`RemoteStore`]: atomic batch
//! commits, point reads, collection listing, and real-time subscriptions.
//! Every committed document exposes a server-assigned, monotonic
//! `update_time` which the merge policy compares against local edit times.
//!
//! ## Layout
//!
//! ```text
//! users/{uid}/spaces/{space_id}   space documents (collection: users/{uid}/spaces)
//! users/{uid}/meta/settings       global settings
//! users/{uid}/meta/profile        share grants
//! ```
//!
//! [`MemoryRemote`] is an in-process implementation with optional file
//! backing, used by tests and by the CLI.

mod docs;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RemoteError;
use crate::models::Millis;

pub use docs::{ProfileDoc, SettingsDoc, SpaceDoc};
pub use memory::{MemoryClient, MemoryRemote};

/// Slash-separated location of a document or collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// A space document owned by `owner`
    pub fn space(owner: &str, space_id: &str) -> Self {
        Self(format!("users/{}/spaces/{}", owner, space_id))
    }

    /// The collection holding every space owned by `owner`
    pub fn spaces(owner: &str) -> Self {
        Self(format!("users/{}/spaces", owner))
    }

    pub fn settings(user: &str) -> Self {
        Self(format!("users/{}/meta/settings", user))
    }

    pub fn profile(user: &str) -> Self {
        Self(format!("users/{}/meta/profile", user))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (the document id)
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The collection this document lives in
    pub fn parent(&self) -> Option<DocPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocPath(parent.to_string()))
    }

    /// The user segment of a `users/{uid}/...` path
    pub fn owner(&self) -> Option<&str> {
        let mut parts = self.0.split('/');
        match (parts.next(), parts.next()) {
            (Some("users"), Some(owner)) if !owner.is_empty() => Some(owner),
            _ => None,
        }
    }

    /// Whether a subscription on `self` observes writes to `path`
    pub fn covers(&self, path: &DocPath) -> bool {
        self == path || path.parent().as_ref() == Some(self)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub path: DocPath,
    pub data: serde_json::Value,
    /// Server time of the last commit touching this document
    pub update_time: Millis,
}

/// One document write inside a batch
///
/// A `Null` payload deletes the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub path: DocPath,
    pub data: serde_json::Value,
}

impl Write {
    /// Serialize `doc` into a write for `path`
    pub fn set<T: Serialize>(path: DocPath, doc: &T) -> Result<Self, RemoteError> {
        Ok(Self {
            path,
            data: serde_json::to_value(doc)?,
        })
    }

    pub fn delete(path: DocPath) -> Self {
        Self {
            path,
            data: serde_json::Value::Null,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.data.is_null()
    }
}

/// Acknowledgement of a committed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitAck {
    /// Server time assigned to every document in the batch
    pub commit_time: Millis,
    pub written: usize,
}

/// A subscription delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Current documents under the subscribed path
    pub documents: Vec<Document>,
    /// True when the snapshot reflects this client's own uncommitted write
    pub has_pending_writes: bool,
}

/// Live stream of snapshots for one path; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    target: DocPath,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    pub fn new(target: DocPath, rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { target, rx }
    }

    pub fn target(&self) -> &DocPath {
        &self.target
    }

    /// Wait for the next delivery; `None` once the store closed the stream
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

/// Contract between the sync engine and a cloud document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write every document in `writes` atomically
    async fn commit_batch(&self, writes: Vec<Write>) -> Result<CommitAck, RemoteError>;

    /// Read one document, possibly from a client cache
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, RemoteError>;

    /// Read one document from the server, bypassing any cache
    async fn get_fresh(&self, path: &DocPath) -> Result<Option<Document>, RemoteError> {
        self.get(path).await
    }

    /// List the documents directly inside `collection`
    async fn list(&self, collection: &DocPath) -> Result<Vec<Document>, RemoteError>;

    /// Watch a document or collection; the current state is delivered first
    async fn subscribe(&self, target: &DocPath) -> Result<Subscription, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_builders() {
        assert_eq!(DocPath::space("alice", "s1").as_str(), "users/alice/spaces/s1");
        assert_eq!(DocPath::spaces("alice").as_str(), "users/alice/spaces");
        assert_eq!(DocPath::settings("bob").as_str(), "users/bob/meta/settings");
        assert_eq!(DocPath::profile("bob").as_str(), "users/bob/meta/profile");
    }

    #[test]
    fn test_path_parts() {
        let path = DocPath::space("alice", "s1");
        assert_eq!(path.id(), "s1");
        assert_eq!(path.owner(), Some("alice"));
        assert_eq!(path.parent(), Some(DocPath::spaces("alice")));
        assert_eq!(DocPath::new("orphan").owner(), None);
    }

    #[test]
    fn test_covers() {
        let doc = DocPath::space("alice", "s1");
        assert!(DocPath::spaces("alice").covers(&doc));
        assert!(doc.covers(&doc));
        assert!(!DocPath::spaces("bob").covers(&doc));
        // Collections do not observe grandchildren
        assert!(!DocPath::new("users/alice").covers(&doc));
    }
}
