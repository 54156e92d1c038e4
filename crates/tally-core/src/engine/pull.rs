//! Pull path: subscriptions, delivery filtering, merging, sharing

use std::sync::atomic::Ordering;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{guard, Counters, SyncEngine};
use crate::error::{RemoteError, SyncError};
use crate::merge::{merge_own_spaces, merge_shared_space};
use crate::models::{Role, ShareGrant, Space, UserId};
use crate::remote::{DocPath, ProfileDoc, Snapshot, SpaceDoc, Write};
use crate::status::DataChange;

/// Why a delivery was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Our own write, not yet committed
    LocalEcho,
    /// Arrived while a push was in flight or just after it
    EchoWindow,
    /// Arrived during the initial load
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Merge,
    Discard(DiscardReason),
}

/// Classifies subscription deliveries before they reach the merge policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryFilter {
    pub suppress_until: Option<Instant>,
    pub loading: bool,
}

impl DeliveryFilter {
    pub fn classify(&self, snapshot: &Snapshot, now: Instant) -> Verdict {
        if snapshot.has_pending_writes {
            Verdict::Discard(DiscardReason::LocalEcho)
        } else if self.suppress_until.is_some_and(|until| now < until) {
            Verdict::Discard(DiscardReason::EchoWindow)
        } else if self.loading {
            Verdict::Discard(DiscardReason::Loading)
        } else {
            Verdict::Merge
        }
    }
}

/// Which stream a delivery came from
#[derive(Debug, Clone)]
enum Feed {
    /// The user's own space collection
    Own,
    /// One space owned by someone else
    Shared(DocPath),
}

impl SyncEngine {
    /// Open real-time subscriptions
    ///
    /// Subscribes to the user's own spaces, then to every space listed in
    /// their profile. A share that cannot be attached is logged and skipped.
    /// Returns false when not signed in or when the own-spaces subscription
    /// fails.
    pub async fn start(&self) -> bool {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return false;
        };
        if self.is_running() {
            debug!("Real-time sync already running");
            return true;
        }

        if let Err(err) = self.attach(DocPath::spaces(&user), Feed::Own).await {
            self.report(SyncError::Read(err));
            return false;
        }

        let grants = match self.read_profile(&user).await {
            Ok(profile) => profile.shared_spaces,
            Err(err) => {
                self.report(err);
                Vec::new()
            }
        };

        let mut attached = 0;
        for grant in &grants {
            if self.attach_share(grant).await {
                attached += 1;
            }
        }

        info!(user = %user, shares = attached, "Real-time sync started");
        self.inner
            .log
            .info(format!("Listening for changes ({} shared space(s))", attached));
        true
    }

    /// Accept a space shared with the current user
    ///
    /// Reads the shared space first; only a space that exists and decodes
    /// is recorded in the user's profile, materialized locally and, when
    /// real-time sync is running, subscribed to.
    pub async fn accept_share(&self, grant: ShareGrant) -> bool {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return false;
        };

        let path = DocPath::space(&grant.owner_id, &grant.space_id);
        let space = match self.inner.remote.get_fresh(&path).await {
            Ok(Some(doc)) => SpaceDoc::decode(&doc, &user),
            Ok(None) => Err(SyncError::PartialShare {
                space_id: grant.space_id.clone(),
                source: RemoteError::Unavailable("space does not exist".to_string()),
            }),
            Err(source) => Err(SyncError::PartialShare {
                space_id: grant.space_id.clone(),
                source,
            }),
        };
        let space = match space {
            Ok(space) => space,
            Err(err) => {
                self.report(err);
                return false;
            }
        };

        let mut profile = match self.read_profile(&user).await {
            Ok(profile) => profile,
            Err(err) => {
                self.report(err);
                return false;
            }
        };
        if !profile.shared_spaces.contains(&grant) {
            profile
                .shared_spaces
                .retain(|existing| existing.space_id != grant.space_id);
            profile.shared_spaces.push(grant.clone());
            if let Err(err) = self.write_profile(&user, &profile).await {
                self.report(err);
                return false;
            }
        }

        self.merge_shared(space).await;
        if self.is_running() {
            self.attach_share(&grant).await;
        }
        self.inner.log.info(format!(
            "Joined space '{}' from {} as {}",
            grant.space_id, grant.owner_id, grant.role
        ));
        true
    }

    /// Stop following a shared space and drop it locally
    pub async fn leave_shared_space(&self, space_id: &str) -> bool {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return false;
        };

        let owner = {
            let state = self.inner.store.lock().await;
            match state.space(space_id) {
                Some(space) if space.is_shared() => Some(space.owner_id.clone()),
                _ => None,
            }
        };

        let mut profile = match self.read_profile(&user).await {
            Ok(profile) => profile,
            Err(err) => {
                self.report(err);
                return false;
            }
        };
        let before = profile.shared_spaces.len();
        profile
            .shared_spaces
            .retain(|grant| grant.space_id != space_id);
        if profile.shared_spaces.len() != before {
            if let Err(err) = self.write_profile(&user, &profile).await {
                self.report(err);
                return false;
            }
        }

        if let Some(ref owner) = owner {
            if let Some(task) = guard(&self.inner.subscriptions).remove(&DocPath::space(owner, space_id)) {
                task.abort();
            }
        }

        self.drop_shared(space_id).await;
        owner.is_some() || profile.shared_spaces.len() != before
    }

    /// Share an owned space with another user
    ///
    /// Writes the collaborator into the space document and the grant into
    /// the recipient's profile in one batch.
    pub async fn share_space(&self, space_id: &str, with: &str, role: Role) -> bool {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return false;
        };
        if role == Role::Owner || with == user {
            self.inner
                .log
                .warn(format!("Cannot share space '{}' as {} with {}", space_id, role, with));
            return false;
        }

        let _flushing = self.inner.flush_lock.lock().await;
        let (space, captured_at) = {
            let state = self.inner.store.lock().await;
            (
                state.space(space_id).filter(|space| space.is_owned()).cloned(),
                self.inner.store.tracker().capture(),
            )
        };
        let Some(mut space) = space else {
            self.inner
                .log
                .warn(format!("No owned space '{}' to share", space_id));
            return false;
        };
        space.collaborators.insert(with.to_string(), role);

        let mut profile = match self.read_profile(with).await {
            Ok(profile) => profile,
            Err(err) => {
                self.report(err);
                return false;
            }
        };
        profile
            .shared_spaces
            .retain(|grant| grant.space_id != space_id);
        profile.shared_spaces.push(ShareGrant {
            owner_id: user.clone(),
            space_id: space_id.to_string(),
            role,
        });

        let writes = [
            Write::set(DocPath::space(&user, space_id), &SpaceDoc::from_space(&space)),
            Write::set(DocPath::profile(with), &profile),
        ]
        .into_iter()
        .collect::<Result<Vec<_>, _>>();
        let writes = match writes {
            Ok(writes) => writes,
            Err(err) => {
                self.report(SyncError::Write(err));
                return false;
            }
        };

        let ack = match self.commit(writes).await {
            Ok(ack) => ack,
            Err(err) => {
                *guard(&self.inner.suppress_until) = None;
                self.report(err);
                return false;
            }
        };

        {
            let mut state = self.inner.store.lock().await;
            if let Some(local) = state.space_mut(space_id) {
                local.collaborators.insert(with.to_string(), role);
                local.meta.last_synced_local = Some(captured_at);
                local.meta.cloud_timestamp = Some(ack.commit_time);
            }
            if let Err(err) = self.inner.store.persist(&state) {
                self.inner.log.error(format!("{:#}", err));
            }
        }
        self.open_echo_window();
        Counters::bump(&self.inner.counters.commits);
        self.inner
            .log
            .info(format!("Shared space '{}' with {} as {}", space_id, with, role));
        true
    }

    // ==================== Internals ====================

    /// Subscribe to `target` and feed its deliveries into the merge path
    async fn attach(&self, target: DocPath, feed: Feed) -> Result<(), RemoteError> {
        let mut subscription = self.inner.remote.subscribe(&target).await?;
        let weak = self.weak();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncEngine::from_inner(inner)
                    .deliver(&feed, snapshot)
                    .await;
            }
        });

        if let Some(previous) = guard(&self.inner.subscriptions).insert(target, task) {
            previous.abort();
        }
        Ok(())
    }

    async fn attach_share(&self, grant: &ShareGrant) -> bool {
        let path = DocPath::space(&grant.owner_id, &grant.space_id);
        match self.attach(path.clone(), Feed::Shared(path)).await {
            Ok(()) => true,
            Err(source) => {
                self.report(SyncError::PartialShare {
                    space_id: grant.space_id.clone(),
                    source,
                });
                false
            }
        }
    }

    fn delivery_filter(&self) -> DeliveryFilter {
        DeliveryFilter {
            suppress_until: *guard(&self.inner.suppress_until),
            loading: self.inner.initializing.load(Ordering::SeqCst),
        }
    }

    async fn deliver(&self, feed: &Feed, snapshot: Snapshot) {
        let Some(user) = self.user_id() else {
            return;
        };

        if let Verdict::Discard(reason) = self.delivery_filter().classify(&snapshot, Instant::now()) {
            Counters::bump(&self.inner.counters.discarded);
            debug!(?reason, documents = snapshot.documents.len(), "Discarding delivery");
            return;
        }

        match feed {
            Feed::Own => self.merge_own(&user, snapshot).await,
            Feed::Shared(path) => {
                let doc = snapshot.documents.into_iter().find(|doc| &doc.path == path);
                match doc {
                    Some(doc) => match SpaceDoc::decode(&doc, &user) {
                        Ok(space) => self.merge_shared(space).await,
                        Err(err) => self.report(err),
                    },
                    None => {
                        info!(path = %path, "Shared space no longer exists");
                        self.drop_shared(path.id()).await;
                    }
                }
            }
        }
    }

    async fn merge_own(&self, user: &str, snapshot: Snapshot) {
        let mut spaces: Vec<Space> = Vec::with_capacity(snapshot.documents.len());
        for doc in &snapshot.documents {
            match SpaceDoc::decode(doc, user) {
                Ok(space) if space.is_owned() => spaces.push(space),
                Ok(space) => warn!(space = %space.id, owner = %space.owner_id, "Foreign space in own collection"),
                Err(err) => self.report(err),
            }
        }

        let report = {
            let mut state = self.inner.store.lock().await;
            let report = merge_own_spaces(&mut state, spaces);
            if let Err(err) = self.inner.store.persist(&state) {
                self.inner.log.error(format!("{:#}", err));
            }
            report
        };

        debug!(
            accepted = report.accepted.len(),
            kept_local = report.kept_local.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            "Merged own spaces"
        );
        self.after_merge(DataChange::OwnSpaces(report));
    }

    async fn merge_shared(&self, space: Space) {
        let space_id = space.id.clone();
        let outcome = {
            let mut state = self.inner.store.lock().await;
            let outcome = merge_shared_space(&mut state, space);
            if let Err(err) = self.inner.store.persist(&state) {
                self.inner.log.error(format!("{:#}", err));
            }
            outcome
        };

        debug!(space = %space_id, ?outcome, "Merged shared space");
        self.after_merge(DataChange::SharedSpace { space_id, outcome });
    }

    /// Remove a shared space locally and tell listeners
    async fn drop_shared(&self, space_id: &str) {
        match self.inner.store.remove_space_local(space_id).await {
            Ok(true) => {
                self.inner.events.data_changed(&DataChange::LeftSpace {
                    space_id: space_id.to_string(),
                });
            }
            Ok(false) => {}
            Err(err) => self.inner.log.error(format!("{:#}", err)),
        }
    }

    fn after_merge(&self, change: DataChange) {
        Counters::bump(&self.inner.counters.merges);
        self.touch_last_synced();
        self.inner.events.data_changed(&change);
    }

    async fn read_profile(&self, user: &str) -> Result<ProfileDoc, SyncError> {
        let path = DocPath::profile(user);
        match self.inner.remote.get_fresh(&path).await {
            Ok(Some(doc)) => ProfileDoc::decode(&doc),
            Ok(None) => Ok(ProfileDoc::default()),
            Err(err) => Err(SyncError::Read(err)),
        }
    }

    async fn write_profile(&self, user: &UserId, profile: &ProfileDoc) -> Result<(), SyncError> {
        let write = Write::set(DocPath::profile(user), profile).map_err(SyncError::Write)?;
        self.commit(vec![write]).await?;
        self.open_echo_window();
        Ok(())
    }
}
