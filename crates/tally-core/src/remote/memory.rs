//! In-process document store
//!
//! [`MemoryRemote`] plays the server: it assigns monotonic commit times,
//! fans snapshots out to subscribers, and can persist itself to a JSON file
//! so several data directories can share one store. Each device talks to it
//! through a [`MemoryClient`], which is what implements [`RemoteStore`].
//!
//! Like a real cloud SDK, a client sees its own write first as a snapshot
//! flagged `has_pending_writes`, then again once the server committed it.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CommitAck, DocPath, Document, RemoteStore, Snapshot, Subscription, Write};
use crate::error::RemoteError;
use crate::models::Millis;
use crate::storage::atomic_write;
use crate::tracker::{Clock, SystemClock};

type ClientId = u64;

struct Subscriber {
    client: ClientId,
    target: DocPath,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct ServerState {
    docs: BTreeMap<DocPath, Document>,
    last_time: Millis,
    commits: usize,
    fail_commits: usize,
    latency: Duration,
    read_latency: Duration,
    denied: HashSet<DocPath>,
    offline: bool,
    subscribers: Vec<Subscriber>,
}

/// On-disk form of the store
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    last_time: Millis,
    documents: Vec<Document>,
}

impl ServerState {
    fn next_time(&mut self, clock: &dyn Clock) -> Millis {
        self.last_time = (self.last_time + 1).max(clock.now_millis());
        self.last_time
    }

    fn snapshot_of(docs: &BTreeMap<DocPath, Document>, target: &DocPath, pending: bool) -> Snapshot {
        Snapshot {
            documents: docs
                .values()
                .filter(|doc| target.covers(&doc.path))
                .cloned()
                .collect(),
            has_pending_writes: pending,
        }
    }

    /// Deliver the current state to every subscriber affected by `paths`
    fn notify(&mut self, paths: &[DocPath], only_client: Option<ClientId>, docs: &BTreeMap<DocPath, Document>, pending: bool) {
        self.subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in &self.subscribers {
            if only_client.is_some_and(|client| client != sub.client) {
                continue;
            }
            if paths.iter().any(|path| sub.target.covers(path)) {
                let _ = sub.tx.send(Self::snapshot_of(docs, &sub.target, pending));
            }
        }
    }
}

/// Shared in-process document store
pub struct MemoryRemote {
    state: Mutex<ServerState>,
    clock: Arc<dyn Clock>,
    backing: Option<PathBuf>,
    next_client: AtomicU64,
}

impl MemoryRemote {
    /// Create an empty store using the system clock
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that stamps commits using `clock`
    ///
    /// Commit times are still forced to increase strictly.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            clock,
            backing: None,
            next_client: AtomicU64::new(1),
        })
    }

    /// Open a file-backed store, loading existing documents if present
    pub fn open(path: PathBuf) -> Result<Arc<Self>, RemoteError> {
        let mut state = ServerState::default();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let file: StoreFile = serde_json::from_slice(&bytes)?;
            state.last_time = file.last_time;
            state.docs = file
                .documents
                .into_iter()
                .map(|doc| (doc.path.clone(), doc))
                .collect();
        }
        debug!(path = %path.display(), documents = state.docs.len(), "Opened document store");

        Ok(Arc::new(Self {
            state: Mutex::new(state),
            clock: Arc::new(SystemClock),
            backing: Some(path),
            next_client: AtomicU64::new(1),
        }))
    }

    /// Connect a new device to the store
    pub fn client(self: &Arc<Self>) -> MemoryClient {
        MemoryClient {
            server: Arc::clone(self),
            id: self.next_client.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of batches committed so far
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    /// Reject the next `n` batch commits
    pub fn fail_next_commits(&self, n: usize) {
        self.lock().fail_commits = n;
    }

    /// Delay every commit by `latency` before it is applied
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Delay every `get` and `list` by `latency` before the read happens
    pub fn set_read_latency(&self, latency: Duration) {
        self.lock().read_latency = latency;
    }

    async fn read_delay(&self) {
        let latency = self.lock().read_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Refuse subscriptions and reads on `path`
    pub fn deny(&self, path: DocPath) {
        self.lock().denied.insert(path);
    }

    /// Fail every request with `Unavailable` while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Read a document directly, bypassing any client
    pub fn document(&self, path: &DocPath) -> Option<Document> {
        self.lock().docs.get(path).cloned()
    }

    /// Write documents as the server itself (another device, an admin tool)
    pub fn seed(&self, writes: Vec<Write>) -> Result<CommitAck, RemoteError> {
        self.apply(None, writes)
    }

    fn apply(&self, client: Option<ClientId>, writes: Vec<Write>) -> Result<CommitAck, RemoteError> {
        let mut state = self.lock();
        let commit_time = state.next_time(self.clock.as_ref());
        let paths: Vec<DocPath> = writes.iter().map(|w| w.path.clone()).collect();

        for write in writes {
            if write.is_delete() {
                state.docs.remove(&write.path);
                continue;
            }
            state.docs.insert(
                write.path.clone(),
                Document {
                    path: write.path,
                    data: write.data,
                    update_time: commit_time,
                },
            );
        }
        state.commits += 1;

        if let Some(ref path) = self.backing {
            let file = StoreFile {
                last_time: state.last_time,
                documents: state.docs.values().cloned().collect(),
            };
            let bytes = serde_json::to_vec_pretty(&file)?;
            atomic_write(path, &bytes).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        }

        let docs = state.docs.clone();
        state.notify(&paths, None, &docs, false);

        debug!(
            client = ?client,
            commit_time,
            written = paths.len(),
            "Committed batch"
        );

        Ok(CommitAck {
            commit_time,
            written: paths.len(),
        })
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.lock().offline {
            return Err(RemoteError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn check_access(&self, path: &DocPath) -> Result<(), RemoteError> {
        if self.lock().denied.contains(path) {
            return Err(RemoteError::PermissionDenied(path.clone()));
        }
        Ok(())
    }
}

/// One device's connection to a [`MemoryRemote`]
#[derive(Clone)]
pub struct MemoryClient {
    server: Arc<MemoryRemote>,
    id: ClientId,
}

impl MemoryClient {
    pub fn server(&self) -> &Arc<MemoryRemote> {
        &self.server
    }
}

#[async_trait]
impl RemoteStore for MemoryClient {
    async fn commit_batch(&self, writes: Vec<Write>) -> Result<CommitAck, RemoteError> {
        self.server.check_online()?;
        {
            let mut state = self.server.lock();
            if state.fail_commits > 0 {
                state.fail_commits -= 1;
                warn!(client = self.id, "Rejecting batch (injected failure)");
                return Err(RemoteError::Rejected("injected failure".to_string()));
            }

            // Latency-compensated local view, only for the writer
            let mut preview = state.docs.clone();
            for write in &writes {
                if write.is_delete() {
                    preview.remove(&write.path);
                    continue;
                }
                let update_time = preview.get(&write.path).map_or(0, |doc| doc.update_time);
                preview.insert(
                    write.path.clone(),
                    Document {
                        path: write.path.clone(),
                        data: write.data.clone(),
                        update_time,
                    },
                );
            }
            let paths: Vec<DocPath> = writes.iter().map(|w| w.path.clone()).collect();
            state.notify(&paths, Some(self.id), &preview, true);
        }

        let latency = self.server.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.server.apply(Some(self.id), writes)
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Document>, RemoteError> {
        self.server.read_delay().await;
        self.server.check_online()?;
        self.server.check_access(path)?;
        Ok(self.server.document(path))
    }

    async fn list(&self, collection: &DocPath) -> Result<Vec<Document>, RemoteError> {
        self.server.read_delay().await;
        self.server.check_online()?;
        self.server.check_access(collection)?;
        let state = self.server.lock();
        Ok(ServerState::snapshot_of(&state.docs, collection, false).documents)
    }

    async fn subscribe(&self, target: &DocPath) -> Result<Subscription, RemoteError> {
        self.server.check_online()?;
        self.server.check_access(target)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.server.lock();
        let _ = tx.send(ServerState::snapshot_of(&state.docs, target, false));
        state.subscribers.push(Subscriber {
            client: self.id,
            target: target.clone(),
            tx,
        });

        Ok(Subscription::new(target.clone(), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(owner: &str, id: &str, name: &str) -> Write {
        Write {
            path: DocPath::space(owner, id),
            data: json!({ "name": name, "ownerId": owner }),
        }
    }

    #[tokio::test]
    async fn test_commit_assigns_monotonic_times() {
        let clock = Arc::new(ManualClock::new(100));
        let server = MemoryRemote::with_clock(clock.clone());
        let client = server.client();

        let first = client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();
        // Clock did not move; time still increases
        let second = client.commit_batch(vec![write("alice", "s2", "B")]).await.unwrap();
        assert_eq!(first.commit_time, 100);
        assert_eq!(second.commit_time, 101);

        clock.set(5_000);
        let third = client.commit_batch(vec![write("alice", "s1", "A2")]).await.unwrap();
        assert_eq!(third.commit_time, 5_000);

        let doc = client.get(&DocPath::space("alice", "s1")).await.unwrap().unwrap();
        assert_eq!(doc.update_time, 5_000);
        assert_eq!(doc.data["name"], "A2");
        assert_eq!(server.commit_count(), 3);
    }

    #[tokio::test]
    async fn test_list_only_direct_children() {
        let server = MemoryRemote::new();
        let client = server.client();
        client
            .commit_batch(vec![
                write("alice", "s1", "A"),
                write("alice", "s2", "B"),
                write("bob", "s3", "C"),
                Write {
                    path: DocPath::settings("alice"),
                    data: json!({}),
                },
            ])
            .await
            .unwrap();

        let docs = client.list(&DocPath::spaces("alice")).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(server.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_null_write_deletes() {
        let server = MemoryRemote::new();
        let client = server.client();
        client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();

        let mut sub = client.subscribe(&DocPath::spaces("alice")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().documents.len(), 1);

        client
            .commit_batch(vec![Write::delete(DocPath::space("alice", "s1"))])
            .await
            .unwrap();
        assert!(server.document(&DocPath::space("alice", "s1")).is_none());

        // Pending preview, then the committed view
        assert!(sub.next().await.unwrap().documents.is_empty());
        assert!(sub.next().await.unwrap().documents.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_state_first() {
        let server = MemoryRemote::new();
        let client = server.client();
        client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();

        let mut sub = client.subscribe(&DocPath::spaces("alice")).await.unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.documents.len(), 1);
        assert!(!first.has_pending_writes);
    }

    #[tokio::test]
    async fn test_pending_echo_only_reaches_writer() {
        let server = MemoryRemote::new();
        let writer = server.client();
        let other = server.client();

        let mut mine = writer.subscribe(&DocPath::spaces("alice")).await.unwrap();
        let mut theirs = other.subscribe(&DocPath::spaces("alice")).await.unwrap();
        // Drain initial empty snapshots
        mine.next().await.unwrap();
        theirs.next().await.unwrap();

        writer.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();

        let echo = mine.next().await.unwrap();
        assert!(echo.has_pending_writes);
        let committed = mine.next().await.unwrap();
        assert!(!committed.has_pending_writes);
        assert_eq!(committed.documents[0].update_time, server.document(&DocPath::space("alice", "s1")).unwrap().update_time);

        let remote_view = theirs.next().await.unwrap();
        assert!(!remote_view.has_pending_writes);
        assert_eq!(remote_view.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_and_denial() {
        let server = MemoryRemote::new();
        let client = server.client();

        server.fail_next_commits(1);
        let err = client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        assert_eq!(server.commit_count(), 0);
        client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();

        let path = DocPath::space("bob", "secret");
        server.deny(path.clone());
        let err = client.subscribe(&path).await.unwrap_err();
        assert!(matches!(err, RemoteError::PermissionDenied(_)));

        server.set_offline(true);
        assert!(matches!(
            client.get(&DocPath::settings("alice")).await,
            Err(RemoteError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_file_backing_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("remote.json");

        let commit_time = {
            let server = MemoryRemote::open(path.clone()).unwrap();
            let client = server.client();
            client
                .commit_batch(vec![write("alice", "s1", "A")])
                .await
                .unwrap()
                .commit_time
        };

        let server = MemoryRemote::open(path).unwrap();
        let doc = server.document(&DocPath::space("alice", "s1")).unwrap();
        assert_eq!(doc.update_time, commit_time);

        // Reopened store keeps counting from the saved time
        let next = server.seed(vec![write("alice", "s2", "B")]).unwrap();
        assert!(next.commit_time > commit_time);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let server = MemoryRemote::new();
        let client = server.client();

        let sub = client.subscribe(&DocPath::spaces("alice")).await.unwrap();
        drop(sub);
        client.commit_batch(vec![write("alice", "s1", "A")]).await.unwrap();
        assert!(server.lock().subscribers.is_empty());
    }
}
