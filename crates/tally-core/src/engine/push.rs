//! Push path: debounce, dirty-set snapshot, batch commit, bookkeeping

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use super::{guard, Counters, SyncEngine};
use crate::error::{RemoteError, SyncError};
use crate::models::{AppState, Millis, SpaceId, SyncMeta};
use crate::remote::{CommitAck, DocPath, SettingsDoc, SpaceDoc, Write};
use crate::status::SyncStatus;

/// Result of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No user signed in; nothing happened
    NotSignedIn,
    /// The flush gate held it back; a new flush is scheduled on release
    Deferred,
    /// Nothing was dirty; no network call was made
    Clean,
    /// Dirty documents were committed
    Committed { documents: usize },
    /// A batch failed; dirty documents stay dirty
    Failed,
    /// `stop()` ran while the commit was in flight; its result was dropped
    Stale,
}

/// What a write in a batch stands for locally
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Settings,
    Space(SpaceId),
    Deletion(SpaceId),
}

#[derive(Debug, Default)]
struct Batch {
    writes: Vec<Write>,
    targets: Vec<Target>,
}

impl Batch {
    fn push(&mut self, write: Write, target: Target) {
        self.writes.push(write);
        self.targets.push(target);
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Dirty documents captured for one flush
///
/// Owned documents go to the user's collection in one batch. Dirty spaces
/// shared with edit rights are written to their owner's collection in a
/// second batch.
#[derive(Debug, Default)]
struct PendingPush {
    owned: Batch,
    shared: Batch,
}

impl PendingPush {
    fn collect(state: &AppState, user: &str, editor_writes: bool) -> Result<Self, RemoteError> {
        let mut pending = PendingPush::default();

        if state.settings.meta.is_dirty() {
            pending.owned.push(
                Write::set(
                    DocPath::settings(user),
                    &SettingsDoc::from_settings(&state.settings),
                )?,
                Target::Settings,
            );
        }

        for space in state.spaces.iter().filter(|space| space.meta.is_dirty()) {
            match space.shared_role {
                None => pending.owned.push(
                    Write::set(DocPath::space(user, &space.id), &SpaceDoc::from_space(space))?,
                    Target::Space(space.id.clone()),
                ),
                Some(role) if editor_writes && role.can_edit() => pending.shared.push(
                    Write::set(
                        DocPath::space(&space.owner_id, &space.id),
                        &SpaceDoc::from_space(space),
                    )?,
                    Target::Space(space.id.clone()),
                ),
                Some(_) => {}
            }
        }

        for id in &state.deleted_spaces {
            pending
                .owned
                .push(Write::delete(DocPath::space(user, id)), Target::Deletion(id.clone()));
        }

        Ok(pending)
    }

    fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.shared.is_empty()
    }
}

fn stamp_synced(meta: &mut SyncMeta, captured_at: Millis, commit_time: Millis) {
    meta.last_synced_local = Some(captured_at);
    meta.cloud_timestamp = Some(commit_time);
}

impl SyncEngine {
    /// Request a push after the debounce delay
    ///
    /// Calls made before the timer fires collapse into one flush.
    pub fn schedule(&self) {
        if !self.is_signed_in() {
            debug!("Schedule ignored: not signed in");
            return;
        }

        let delay = self.inner.config.debounce();
        let weak = self.weak();
        let Some(timer) = self.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Aborting the timer must not cancel a flush that already began
            tokio::spawn(async move {
                SyncEngine::from_inner(inner).flush().await;
            });
        }) else {
            return;
        };

        if let Some(previous) = guard(&self.inner.debounce).replace(timer) {
            previous.abort();
        }
    }

    /// Whether a debounce timer is pending
    pub fn has_pending_flush(&self) -> bool {
        guard(&self.inner.debounce)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Schedule a push if anything is waiting, e.g. after reconnecting
    pub async fn notify_online(&self) {
        let dirty = self.inner.store.lock().await.dirty_count();
        if dirty > 0 {
            debug!(dirty, "Back online with unsynced changes");
            self.schedule();
        }
    }

    /// Push every dirty document now
    pub async fn flush(&self) -> FlushOutcome {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return FlushOutcome::NotSignedIn;
        };

        if self.inner.gate.should_defer() {
            self.defer();
            return FlushOutcome::Deferred;
        }

        let _flushing = self.inner.flush_lock.lock().await;
        let epoch = self.current_epoch();

        let (pending, captured_at) = {
            let state = self.inner.store.lock().await;
            (
                PendingPush::collect(&state, &user, self.inner.config.editor_writes),
                self.inner.store.tracker().capture(),
            )
        };
        let pending = match pending {
            Ok(pending) => pending,
            Err(err) => {
                self.report(SyncError::Write(err));
                return FlushOutcome::Failed;
            }
        };

        if pending.is_empty() {
            debug!("Nothing to push");
            self.inner.events.set_status(SyncStatus::Synced);
            return FlushOutcome::Clean;
        }

        self.inner.events.set_status(SyncStatus::Syncing);
        let mut documents = 0;

        for batch in [pending.owned, pending.shared] {
            if batch.is_empty() {
                continue;
            }

            let result = self.commit(batch.writes).await;
            if !self.is_current(epoch) {
                debug!("Discarding commit result from a stopped session");
                return FlushOutcome::Stale;
            }

            match result {
                Ok(ack) => {
                    self.mark_synced(&batch.targets, captured_at, ack.commit_time)
                        .await;
                    self.open_echo_window();
                    Counters::bump(&self.inner.counters.commits);
                    documents += ack.written;
                }
                Err(err) => {
                    *guard(&self.inner.suppress_until) = None;
                    Counters::bump(&self.inner.counters.failed_commits);
                    self.report(err);
                    return FlushOutcome::Failed;
                }
            }
        }

        self.touch_last_synced();
        self.inner.events.set_status(SyncStatus::Synced);
        info!(documents, captured_at, "Pushed local changes");
        self.inner
            .log
            .info(format!("Pushed {} document(s)", documents));
        FlushOutcome::Committed { documents }
    }

    /// Commit one batch within the commit timeout
    ///
    /// Deliveries are suppressed while the commit is in flight.
    pub(super) async fn commit(&self, writes: Vec<Write>) -> Result<CommitAck, SyncError> {
        let after = self.inner.config.commit_timeout();
        *guard(&self.inner.suppress_until) =
            Some(Instant::now() + after + self.inner.config.echo_window());

        match tokio::time::timeout(after, self.inner.remote.commit_batch(writes)).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(err)) => Err(SyncError::Write(err)),
            Err(_) => Err(SyncError::Timeout {
                operation: "commit",
                after,
            }),
        }
    }

    pub(super) fn open_echo_window(&self) {
        *guard(&self.inner.suppress_until) = Some(Instant::now() + self.inner.config.echo_window());
    }

    /// Stamp committed documents as synced at snapshot time
    ///
    /// Edits made while the commit was in flight are stamped after
    /// `captured_at` and stay dirty.
    async fn mark_synced(&self, targets: &[Target], captured_at: Millis, commit_time: Millis) {
        let mut state = self.inner.store.lock().await;
        for target in targets {
            match target {
                Target::Settings => stamp_synced(&mut state.settings.meta, captured_at, commit_time),
                Target::Space(id) => {
                    if let Some(space) = state.space_mut(id) {
                        stamp_synced(&mut space.meta, captured_at, commit_time);
                    }
                }
                Target::Deletion(id) => state.deleted_spaces.retain(|deleted| deleted != id),
            }
        }

        if let Err(err) = self.inner.store.persist(&state) {
            self.inner.log.error(format!("{:#}", err));
        }
    }

    /// Wait for the gate to open, then schedule again
    ///
    /// The wait is cancelled by `stop()`.
    fn defer(&self) {
        Counters::bump(&self.inner.counters.deferred);
        debug!("Flush deferred by gate");

        let gate = Arc::clone(&self.inner.gate);
        let weak = self.weak();
        let epoch = self.current_epoch();
        let Some(waiter) = self.spawn(async move {
            gate.released().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let engine = SyncEngine::from_inner(inner);
            if engine.is_current(epoch) {
                engine.schedule();
            }
        }) else {
            return;
        };

        if let Some(previous) = guard(&self.inner.deferral).replace(waiter) {
            previous.abort();
        }
    }
}
