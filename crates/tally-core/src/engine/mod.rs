//! Sync engine
//!
//! Keeps the local document tree and the remote store consistent:
//!
//! - **Push**: [`SyncEngine::schedule`] debounces local edits into one
//!   [`SyncEngine::flush`], which commits every dirty document as one batch.
//! - **Pull**: [`SyncEngine::start`] subscribes to the user's own spaces and
//!   to each space shared with them; deliveries go through the
//!   [`DeliveryFilter`] and then the merge policy.
//! - **Load**: [`SyncEngine::load`] hydrates local state from the remote on
//!   sign-in.
//!
//! Public methods never return errors. Failures become a status transition
//! plus an entry in the sync log.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::init(config.sync.clone(), store, remote);
//! engine.sign_in("alice");
//! engine.load().await;
//! engine.start().await;
//!
//! engine.store().rename_space(&id, "Shells").await?;
//! engine.schedule();
//! ```

mod gate;
mod load;
mod pull;
mod push;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::UserId;
use crate::remote::{DocPath, RemoteStore};
use crate::status::{format_last_synced, DataChange, ListenerId, StatusBroadcaster, SyncStatus};
use crate::store::Store;
use crate::sync_log::{LogEntry, SyncLog};

pub use gate::{FlushGate, HoverGate, NeverDefer};
pub use load::RemoteSnapshot;
pub use pull::{DeliveryFilter, DiscardReason, Verdict};
pub use push::FlushOutcome;

/// Counters for display and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Batches acknowledged by the remote
    pub commits: u64,
    /// Batches rejected or timed out
    pub failed_commits: u64,
    /// Deliveries merged into local state
    pub merges: u64,
    /// Deliveries dropped by the delivery filter
    pub discarded: u64,
    /// Flushes held back by the gate
    pub deferred: u64,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    failed_commits: AtomicU64,
    merges: AtomicU64,
    discarded: AtomicU64,
    deferred: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            commits: self.commits.load(Ordering::Relaxed),
            failed_commits: self.failed_commits.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

struct EngineInner {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    store: Store,
    gate: Arc<dyn FlushGate>,
    session: RwLock<Option<UserId>>,
    events: StatusBroadcaster,
    log: SyncLog,
    /// Runtime the engine was built on, for calls from outside it
    runtime: Option<Handle>,
    /// Pending debounce timer
    debounce: Mutex<Option<JoinHandle<()>>>,
    /// Deferred flush waiting for the gate to open
    deferral: Mutex<Option<JoinHandle<()>>>,
    /// Serializes flushes
    flush_lock: tokio::sync::Mutex<()>,
    /// Bumped by `stop()`; results from an older epoch are dropped
    epoch: AtomicU64,
    /// Deliveries before this instant are treated as echoes of our own push
    suppress_until: Mutex<Option<Instant>>,
    initializing: AtomicBool,
    subscriptions: Mutex<HashMap<DocPath, JoinHandle<()>>>,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
    counters: Counters,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(timer) = guard(&self.debounce).take() {
            timer.abort();
        }
        if let Some(waiter) = guard(&self.deferral).take() {
            waiter.abort();
        }
        for (_, task) in guard(&self.subscriptions).drain() {
            task.abort();
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running sync engine
///
/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build an engine over `store` and `remote`
    ///
    /// Call from within a tokio runtime. The engine keeps a handle to it, so
    /// [`SyncEngine::schedule`] also works from threads outside the runtime.
    pub fn init(config: SyncConfig, store: Store, remote: Arc<dyn RemoteStore>) -> Self {
        Self::init_with_gate(config, store, remote, Arc::new(NeverDefer))
    }

    /// Build an engine whose flushes consult `gate`
    pub fn init_with_gate(
        config: SyncConfig,
        store: Store,
        remote: Arc<dyn RemoteStore>,
        gate: Arc<dyn FlushGate>,
    ) -> Self {
        let log = SyncLog::new(config.log_capacity);
        Self {
            inner: Arc::new(EngineInner {
                config,
                remote,
                store,
                gate,
                session: RwLock::new(None),
                events: StatusBroadcaster::new(),
                log,
                runtime: Handle::try_current().ok(),
                debounce: Mutex::new(None),
                deferral: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                epoch: AtomicU64::new(0),
                suppress_until: Mutex::new(None),
                initializing: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
                last_synced_at: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ==================== Session ====================

    /// Attach a user; switching users stops the previous session first
    pub fn sign_in(&self, user: impl Into<UserId>) {
        let user = user.into();
        if self.user_id().is_some_and(|current| current != user) {
            self.stop();
        }
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user.clone());
        info!(user = %user, "Signed in");
    }

    pub fn sign_out(&self) {
        self.stop();
        let previous = self
            .inner
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(user) = previous {
            info!(user = %user, "Signed out");
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id().is_some()
    }

    // ==================== Lifecycle ====================

    /// Whether real-time subscriptions are open
    pub fn is_running(&self) -> bool {
        !guard(&self.inner.subscriptions).is_empty()
    }

    /// Tear down subscriptions, the pending timer and any deferred flush
    ///
    /// In-flight commits and loads finish but their results are discarded.
    pub fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = guard(&self.inner.subscriptions)
            .drain()
            .map(|(_, task)| task)
            .collect();
        let had_timer = match guard(&self.inner.debounce).take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        };
        if let Some(waiter) = guard(&self.inner.deferral).take() {
            waiter.abort();
        }
        for task in &tasks {
            task.abort();
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        *guard(&self.inner.suppress_until) = None;
        self.inner.initializing.store(false, Ordering::SeqCst);
        self.inner.events.set_status(SyncStatus::Idle);

        debug!(subscriptions = tasks.len(), had_timer, "Sync stopped");
    }

    // ==================== Status and listeners ====================

    pub fn status(&self) -> SyncStatus {
        self.inner.events.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.events.subscribe_status()
    }

    /// Called right away with the current status, then on every transition
    pub fn on_status_change(&self, listener: impl Fn(SyncStatus) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on_status_change(listener)
    }

    /// Called after remote data was merged and saved
    pub fn on_data_change(&self, listener: impl Fn(&DataChange) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on_data_change(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    /// Last time local and remote were known to agree
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *guard(&self.inner.last_synced_at)
    }

    pub fn last_synced_label(&self) -> String {
        format_last_synced(self.last_synced_at(), Utc::now())
    }

    /// Recent sync log, oldest first
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.log.entries()
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.counters.snapshot()
    }

    // ==================== Internals ====================

    fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn touch_last_synced(&self) {
        *guard(&self.inner.last_synced_at) = Some(Utc::now());
    }

    /// Record a failure in the log and, when it warrants it, the status
    fn report(&self, err: SyncError) {
        match err {
            SyncError::NotAuthenticated => debug!("Sync skipped: {}", err),
            ref err if err.is_fatal_for_status() => {
                self.inner.log.error(err.to_string());
                self.inner.events.set_status(SyncStatus::Error);
            }
            err => self.inner.log.warn(err.to_string()),
        }
    }

    /// Spawn on the current runtime, or on the one the engine was built on
    fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current().ok().or_else(|| self.inner.runtime.clone()) {
            Some(runtime) => Some(runtime.spawn(task)),
            None => {
                warn!("No tokio runtime available; background sync work skipped");
                None
            }
        }
    }

    fn weak(&self) -> std::sync::Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }
}
