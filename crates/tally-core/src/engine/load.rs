//! Initial load
//!
//! Hydrates local state from the remote after sign-in. Subscription
//! deliveries are discarded while a load is running; the load itself merges
//! with the same rules, so a local edit newer than the remote copy survives
//! a reconnect.

use std::sync::atomic::Ordering;

use futures_util::future::join_all;
use tracing::info;

use super::SyncEngine;
use crate::error::{RemoteError, SyncError};
use crate::merge::{merge_own_spaces, merge_settings, merge_shared_space, repair_active_space};
use crate::models::{GlobalSettings, ShareGrant, Space};
use crate::remote::{DocPath, Document, ProfileDoc, SettingsDoc, SpaceDoc};
use crate::status::{DataChange, SyncStatus};

/// Remote state as fetched by [`SyncEngine::load`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    /// Spaces in the user's own collection
    pub spaces: Vec<Space>,
    /// Spaces shared with the user that could be read
    pub shared: Vec<Space>,
    pub settings: Option<GlobalSettings>,
    pub grants: Vec<ShareGrant>,
}

impl RemoteSnapshot {
    /// Nothing stored remotely for this user
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty() && self.settings.is_none() && self.grants.is_empty()
    }
}

/// Raw documents before decoding
struct Fetched {
    spaces: Vec<Document>,
    settings: Option<Document>,
    shared: Vec<(ShareGrant, Result<Option<Document>, RemoteError>)>,
}

impl SyncEngine {
    /// Fetch and merge the user's remote state
    ///
    /// Returns `None` when not signed in, for an account with nothing stored
    /// yet, or when the load failed. Schedules a push afterwards if local
    /// state still holds unsynced changes.
    pub async fn load(&self) -> Option<RemoteSnapshot> {
        let Some(user) = self.user_id() else {
            self.report(SyncError::NotAuthenticated);
            return None;
        };

        let epoch = self.current_epoch();
        self.inner.initializing.store(true, Ordering::SeqCst);
        self.inner.events.set_status(SyncStatus::Syncing);

        let after = self.inner.config.load_timeout();
        let fetched = match tokio::time::timeout(after, self.fetch(&user)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(err)) => return self.abort_load(epoch, SyncError::Read(err)),
            Err(_) => {
                return self.abort_load(
                    epoch,
                    SyncError::Timeout {
                        operation: "load",
                        after,
                    },
                )
            }
        };
        if !self.is_current(epoch) {
            return None;
        }

        let snapshot = self.decode_fetched(&user, fetched);
        if snapshot.is_empty() {
            info!(user = %user, "No remote data yet");
            self.finish_load();
            self.notify_online().await;
            return None;
        }

        let dirty = {
            let mut state = self.inner.store.lock().await;
            merge_own_spaces(&mut state, snapshot.spaces.clone());
            for space in snapshot.shared.iter().cloned() {
                merge_shared_space(&mut state, space);
            }
            if let Some(settings) = snapshot.settings.clone() {
                merge_settings(&mut state.settings, settings);
            }
            repair_active_space(&mut state);
            if let Err(err) = self.inner.store.persist(&state) {
                self.inner.log.error(format!("{:#}", err));
            }
            state.dirty_count()
        };

        self.finish_load();
        self.touch_last_synced();
        let spaces = snapshot.spaces.len() + snapshot.shared.len();
        info!(user = %user, spaces, dirty, "Loaded remote data");
        self.inner
            .log
            .info(format!("Loaded {} space(s) from the cloud", spaces));
        self.inner
            .events
            .data_changed(&DataChange::Loaded { spaces });

        if dirty > 0 {
            self.schedule();
        }
        Some(snapshot)
    }

    async fn fetch(&self, user: &str) -> Result<Fetched, RemoteError> {
        let remote = &self.inner.remote;
        let spaces = remote.list(&DocPath::spaces(user)).await?;
        let settings = remote.get_fresh(&DocPath::settings(user)).await?;
        let profile = remote.get_fresh(&DocPath::profile(user)).await?;

        let grants = match profile {
            Some(doc) => match ProfileDoc::decode(&doc) {
                Ok(profile) => profile.shared_spaces,
                Err(err) => {
                    self.report(err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let reads = grants.iter().map(|grant| {
            let path = DocPath::space(&grant.owner_id, &grant.space_id);
            async move { remote.get_fresh(&path).await }
        });
        let results = join_all(reads).await;

        Ok(Fetched {
            spaces,
            settings,
            shared: grants.into_iter().zip(results).collect(),
        })
    }

    fn decode_fetched(&self, user: &str, fetched: Fetched) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::default();

        for doc in &fetched.spaces {
            match SpaceDoc::decode(doc, user) {
                Ok(space) if space.is_owned() => snapshot.spaces.push(space),
                Ok(_) => {}
                Err(err) => self.report(err),
            }
        }

        if let Some(ref doc) = fetched.settings {
            match SettingsDoc::decode(doc) {
                Ok(settings) => snapshot.settings = Some(settings),
                Err(err) => self.report(err),
            }
        }

        for (grant, result) in fetched.shared {
            match result {
                Ok(Some(doc)) => match SpaceDoc::decode(&doc, user) {
                    Ok(space) => snapshot.shared.push(space),
                    Err(err) => self.report(err),
                },
                Ok(None) => self.inner.log.warn(format!(
                    "Shared space '{}' from {} no longer exists",
                    grant.space_id, grant.owner_id
                )),
                Err(source) => self.report(SyncError::PartialShare {
                    space_id: grant.space_id.clone(),
                    source,
                }),
            }
            snapshot.grants.push(grant);
        }

        snapshot
    }

    fn finish_load(&self) {
        self.inner.initializing.store(false, Ordering::SeqCst);
        self.inner.events.set_status(SyncStatus::Synced);
    }

    fn abort_load(&self, epoch: u64, err: SyncError) -> Option<RemoteSnapshot> {
        if self.is_current(epoch) {
            self.inner.initializing.store(false, Ordering::SeqCst);
            self.report(err);
        }
        None
    }
}
