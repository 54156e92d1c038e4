//! Local store
//!
//! The `Store` owns the in-memory document tree and its on-disk copy. Every
//! mutator stamps the touched document through the [`ChangeTracker`] and
//! saves, so unsynced work is durable before the sync engine ever sees it.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(&config)?;
//! let space = store.create_space("alice", "Shells").await?;
//! store.add_item(&space, Item::new("Conch")).await?;
//! engine.schedule();
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{AppState, Item, Space, SpaceId};
use crate::storage::{LocalPersistence, StorageError};
use crate::tracker::{ChangeTracker, Clock, SystemClock};

/// Shared handle to local state
#[derive(Clone)]
pub struct Store {
    state: Arc<Mutex<AppState>>,
    persistence: Option<LocalPersistence>,
    tracker: ChangeTracker,
}

impl Store {
    /// Open the store from the configured data directory
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the store with a specific clock
    pub fn open_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let persistence = LocalPersistence::new(config);
        let state = persistence
            .load_or_default()
            .map_err(|err| with_hint(err, "Failed to load local state"))?;

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            persistence: Some(persistence),
            tracker: ChangeTracker::new(clock),
        })
    }

    /// A store that never touches the disk
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AppState::default())),
            persistence: None,
            tracker: ChangeTracker::new(clock),
        }
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.tracker.clock()
    }

    /// Shared handle to the document tree
    pub fn state(&self) -> Arc<Mutex<AppState>> {
        Arc::clone(&self.state)
    }

    /// Lock the document tree
    ///
    /// Callers that mutate through the guard must stamp what they touch and
    /// call [`Store::persist`].
    pub async fn lock(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().await
    }

    /// Clone of the current tree
    pub async fn snapshot(&self) -> AppState {
        self.state.lock().await.clone()
    }

    /// Write `state` to disk
    pub fn persist(&self, state: &AppState) -> Result<()> {
        if let Some(ref persistence) = self.persistence {
            persistence
                .save(state)
                .map_err(|err| with_hint(err, "Failed to save local state"))?;
        }
        Ok(())
    }

    // ==================== Space Operations ====================

    /// Create an owned space and make it active if none is
    pub async fn create_space(&self, owner: &str, name: &str) -> Result<SpaceId> {
        let mut state = self.state.lock().await;
        let mut space = Space::new(owner, name);
        self.tracker.touch(&mut space);
        let id = space.id.clone();
        state.spaces.push(space);

        if state.settings.active_space_id.is_none() {
            let settings = &mut state.settings;
            self.tracker
                .record(settings, |s| s.active_space_id = Some(id.clone()));
        }

        self.persist(&state)?;
        Ok(id)
    }

    pub async fn rename_space(&self, id: &str, name: &str) -> Result<()> {
        self.edit_space(id, |space| space.name = name.to_string())
            .await
    }

    /// Delete an owned space
    ///
    /// A space that ever reached the remote is remembered so the next push
    /// deletes the remote copy too.
    pub async fn delete_space(&self, id: &str) -> Result<Space> {
        let mut state = self.state.lock().await;
        let Some(position) = state.spaces.iter().position(|s| s.id == id) else {
            bail!("No space with id '{}'", id);
        };
        if !state.spaces[position].is_owned() {
            bail!("Space '{}' is shared with you; leave it instead", state.spaces[position].name);
        }
        let removed = state.spaces.remove(position);
        if removed.meta.last_synced_local.is_some() {
            state.deleted_spaces.push(removed.id.clone());
        }

        if state.settings.active_space_id.as_deref() == Some(id) {
            let next = state.spaces.first().map(|s| s.id.clone());
            let settings = &mut state.settings;
            self.tracker.record(settings, |s| s.active_space_id = next);
        }

        self.persist(&state)?;
        Ok(removed)
    }

    /// Drop a shared-in space from local state without touching the remote
    ///
    /// Returns false when no such shared space exists.
    pub async fn remove_space_local(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.spaces.len();
        state.spaces.retain(|s| !(s.id == id && s.is_shared()));
        if state.spaces.len() == before {
            return Ok(false);
        }
        crate::merge::repair_active_space(&mut state);
        self.persist(&state)?;
        Ok(true)
    }

    pub async fn set_active_space(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.space(id).is_none() {
            bail!("No space with id '{}'", id);
        }
        let settings = &mut state.settings;
        self.tracker
            .record(settings, |s| s.active_space_id = Some(id.to_string()));
        self.persist(&state)
    }

    pub async fn add_category(&self, space_id: &str, category: &str) -> Result<()> {
        self.edit_space(space_id, |space| {
            if !space.categories.iter().any(|c| c == category) {
                space.categories.push(category.to_string());
            }
        })
        .await
    }

    // ==================== Item Operations ====================

    pub async fn add_item(&self, space_id: &str, item: Item) -> Result<Uuid> {
        let id = item.id;
        self.edit_space(space_id, |space| space.items.push(item))
            .await?;
        Ok(id)
    }

    /// Set the collected count of an item
    pub async fn set_item_progress(&self, space_id: &str, item_id: Uuid, progress: u32) -> Result<()> {
        let mut found = false;
        self.edit_space(space_id, |space| {
            if let Some(item) = space.item_mut(item_id) {
                item.progress = progress;
                found = true;
            }
        })
        .await?;
        if !found {
            bail!("No item {} in space '{}'", item_id, space_id);
        }
        Ok(())
    }

    /// Move an item to the archive
    pub async fn archive_item(&self, space_id: &str, item_id: Uuid) -> Result<()> {
        let mut found = false;
        self.edit_space(space_id, |space| {
            if let Some(position) = space.items.iter().position(|i| i.id == item_id) {
                let item = space.items.remove(position);
                space.archived_items.push(item);
                found = true;
            }
        })
        .await?;
        if !found {
            bail!("No item {} in space '{}'", item_id, space_id);
        }
        Ok(())
    }

    // ==================== Settings Operations ====================

    pub async fn set_preference(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let settings = &mut state.settings;
        self.tracker.record(settings, |s| {
            s.preferences.insert(key.to_string(), value);
        });
        self.persist(&state)
    }

    pub async fn add_tag(&self, tag: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.settings.tags.iter().any(|t| t == tag) {
            return Ok(());
        }
        let settings = &mut state.settings;
        self.tracker
            .record(settings, |s| s.tags.push(tag.to_string()));
        self.persist(&state)
    }

    // ==================== Helpers ====================

    /// Apply `edit` to a space the user may change, stamp and save it
    async fn edit_space(&self, id: &str, edit: impl FnOnce(&mut Space)) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(space) = state.space_mut(id) else {
            bail!("No space with id '{}'", id);
        };
        if !space.is_editable() {
            bail!("Space '{}' is shared with you read-only", space.name);
        }
        self.tracker.record(space, edit);
        self.persist(&state)
    }
}

fn with_hint(err: StorageError, what: &str) -> anyhow::Error {
    let message = match err.hint() {
        Some(hint) => format!("{} ({})", what, hint),
        None => what.to_string(),
    };
    anyhow::Error::new(err).context(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::tracker::ManualClock;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_create_space_sets_active_and_stamps() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Store::in_memory(clock.clone());

        let id = store.create_space("alice", "Shells").await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.settings.active_space_id.as_deref(), Some(id.as_str()));
        assert_eq!(state.spaces[0].meta.local_modified, Some(1_000));
        assert_eq!(state.settings.meta.local_modified, Some(1_000));
        assert!(state.spaces[0].is_owned());
    }

    #[tokio::test]
    async fn test_every_mutation_restamps() {
        let clock = Arc::new(ManualClock::new(10));
        let store = Store::in_memory(clock.clone());
        let id = store.create_space("alice", "Shells").await.unwrap();

        clock.set(20);
        let item = store.add_item(&id, Item::new("Conch").with_target(2)).await.unwrap();
        assert_eq!(store.snapshot().await.spaces[0].meta.local_modified, Some(20));

        clock.set(30);
        store.set_item_progress(&id, item, 2).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.spaces[0].meta.local_modified, Some(30));
        assert!(state.spaces[0].items[0].is_complete());

        clock.set(40);
        store.archive_item(&id, item).await.unwrap();
        let state = store.snapshot().await;
        assert!(state.spaces[0].items.is_empty());
        assert_eq!(state.spaces[0].archived_items.len(), 1);
        assert_eq!(state.spaces[0].meta.local_modified, Some(40));
    }

    #[tokio::test]
    async fn test_viewer_space_is_read_only() {
        let store = Store::in_memory(Arc::new(ManualClock::new(0)));
        {
            let mut state = store.lock().await;
            let mut space = Space::with_id("s", "bob", "Theirs");
            space.shared_role = Some(Role::Viewer);
            state.spaces.push(space);
        }

        let err = store.rename_space("s", "Mine now").await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(store.snapshot().await.spaces[0].meta.local_modified.is_none());
    }

    #[tokio::test]
    async fn test_remove_space_local_only_drops_shared() {
        let store = Store::in_memory(Arc::new(ManualClock::new(0)));
        let own = store.create_space("alice", "Mine").await.unwrap();
        {
            let mut state = store.lock().await;
            let mut space = Space::with_id("s", "bob", "Theirs");
            space.shared_role = Some(Role::Editor);
            state.spaces.push(space);
        }

        assert!(!store.remove_space_local(&own).await.unwrap());
        assert!(store.remove_space_local("s").await.unwrap());
        assert_eq!(store.snapshot().await.spaces.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_active_space_moves_pointer() {
        let store = Store::in_memory(Arc::new(ManualClock::new(0)));
        let first = store.create_space("alice", "One").await.unwrap();
        let second = store.create_space("alice", "Two").await.unwrap();

        store.delete_space(&first).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.settings.active_space_id.as_deref(), Some(second.as_str()));
        // Never pushed, so there is nothing to delete remotely
        assert!(state.deleted_spaces.is_empty());

        assert!(store.delete_space("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_synced_space_leaves_tombstone() {
        let store = Store::in_memory(Arc::new(ManualClock::new(0)));
        let id = store.create_space("alice", "One").await.unwrap();
        store.lock().await.spaces[0].meta.last_synced_local = Some(0);

        store.delete_space(&id).await.unwrap();
        assert_eq!(store.snapshot().await.deleted_spaces, vec![id]);
    }

    #[tokio::test]
    async fn test_settings_mutations() {
        let clock = Arc::new(ManualClock::new(5));
        let store = Store::in_memory(clock.clone());

        store.add_tag("rare").await.unwrap();
        store.add_tag("rare").await.unwrap();
        store
            .set_preference("theme", serde_json::json!("dark"))
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.settings.tags, vec!["rare".to_string()]);
        assert_eq!(state.settings.preferences["theme"], "dark");
        assert_eq!(state.settings.meta.local_modified, Some(5));
    }

    #[tokio::test]
    async fn test_state_is_saved_on_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let id = {
            let store = Store::open(&config).unwrap();
            let id = store.create_space("alice", "Shells").await.unwrap();
            store.add_category(&id, "beach").await.unwrap();
            id
        };

        let store = Store::open(&config).unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.space(&id).unwrap().categories, vec!["beach".to_string()]);
        assert!(config.state_path().exists());
    }
}
