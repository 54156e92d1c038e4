//! Data models for Tally
//!
//! Defines the local document tree: spaces holding items, and the per-user
//! global settings. Both carry [`SyncMeta`] bookkeeping used by the sync
//! engine to decide what to push and how to resolve conflicts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account identifier
pub type UserId = String;

/// Space identifier
pub type SpaceId = String;

/// Milliseconds since the Unix epoch
pub type Millis = i64;

/// Collaborator role on a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    /// Whether this role may change the space content
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Owner | Role::Editor)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        };
        f.write_str(name)
    }
}

/// Sync bookkeeping attached to every synced document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Wall-clock time of the last local edit
    #[serde(default)]
    pub local_modified: Option<Millis>,
    /// Local time captured at the start of the last successful push
    #[serde(default)]
    pub last_synced_local: Option<Millis>,
    /// Server-assigned time of the last remote commit
    #[serde(default)]
    pub cloud_timestamp: Option<Millis>,
}

impl SyncMeta {
    /// A document is dirty when it was edited after its last push, or was
    /// never pushed at all.
    pub fn is_dirty(&self) -> bool {
        match (self.local_modified, self.last_synced_local) {
            (_, None) => true,
            (Some(modified), Some(synced)) => modified > synced,
            (None, Some(_)) => false,
        }
    }

    /// The most recent point in time this copy is known to reflect
    ///
    /// `last_synced_local` stands in for the cloud timestamp of our own
    /// last push. Unset values count as zero.
    pub fn local_time(&self) -> Millis {
        self.local_modified
            .unwrap_or(0)
            .max(self.last_synced_local.unwrap_or(0))
    }
}

/// A tracked item or objective inside a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub progress: u32,
    #[serde(default = "default_target")]
    pub target: u32,
    pub created_at: DateTime<Utc>,
}

fn default_target() -> u32 {
    1
}

impl Item {
    /// Create a new item with a target count of one
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            progress: 0,
            target: 1,
            created_at: Utc::now(),
        }
    }

    /// Set the number of collections needed to complete this item
    pub fn with_target(mut self, target: u32) -> Self {
        self.target = target.max(1);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= self.target
    }
}

/// A named, ownable collection of tracked items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub owner_id: UserId,
    #[serde(default)]
    pub collaborators: BTreeMap<UserId, Role>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub archived_items: Vec<Item>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Our role when the space is owned by someone else
    #[serde(default)]
    pub shared_role: Option<Role>,
    #[serde(default)]
    pub meta: SyncMeta,
}

impl Space {
    /// Create a new owned space
    pub fn new(owner_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: None,
            owner_id: owner_id.into(),
            collaborators: BTreeMap::new(),
            items: Vec::new(),
            archived_items: Vec::new(),
            categories: Vec::new(),
            shared_role: None,
            meta: SyncMeta::default(),
        }
    }

    /// Create a space with a specific ID (for loading from the remote store)
    pub fn with_id(id: impl Into<SpaceId>, owner_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(owner_id, name)
        }
    }

    /// True when someone else owns this space
    pub fn is_shared(&self) -> bool {
        self.shared_role.is_some()
    }

    /// True when this client is the writer of the space
    pub fn is_owned(&self) -> bool {
        self.shared_role.is_none()
    }

    /// Whether local edits are allowed
    pub fn is_editable(&self) -> bool {
        self.shared_role.map_or(true, Role::can_edit)
    }

    pub fn item(&self, id: Uuid) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: Uuid) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Number of completed items
    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_complete()).count()
    }
}

/// Per-user settings synced alongside the spaces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub preferences: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub active_space_id: Option<SpaceId>,
    #[serde(default)]
    pub meta: SyncMeta,
}

/// An entry in the user's profile listing a space shared with them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareGrant {
    pub owner_id: UserId,
    pub space_id: SpaceId,
    pub role: Role,
}

/// The whole local document tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub spaces: Vec<Space>,
    #[serde(default)]
    pub settings: GlobalSettings,
    /// Owned spaces deleted locally whose remote copy still has to go
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_spaces: Vec<SpaceId>,
}

impl AppState {
    pub fn space(&self, id: &str) -> Option<&Space> {
        self.spaces.iter().find(|space| space.id == id)
    }

    pub fn space_mut(&mut self, id: &str) -> Option<&mut Space> {
        self.spaces.iter_mut().find(|space| space.id == id)
    }

    /// The space the user is currently working in
    pub fn active_space(&self) -> Option<&Space> {
        self.settings
            .active_space_id
            .as_deref()
            .and_then(|id| self.space(id))
    }

    /// Count of documents that would be part of the next push
    pub fn dirty_count(&self) -> usize {
        let spaces = self
            .spaces
            .iter()
            .filter(|space| space.meta.is_dirty() && space.is_editable())
            .count();
        spaces + usize::from(self.settings.meta.is_dirty()) + self.deleted_spaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_synced_is_dirty() {
        let meta = SyncMeta::default();
        assert!(meta.is_dirty());

        let meta = SyncMeta {
            local_modified: Some(10),
            ..SyncMeta::default()
        };
        assert!(meta.is_dirty());
    }

    #[test]
    fn test_dirty_after_edit() {
        let mut meta = SyncMeta {
            local_modified: Some(100),
            last_synced_local: Some(100),
            cloud_timestamp: None,
        };
        assert!(!meta.is_dirty());

        meta.local_modified = Some(101);
        assert!(meta.is_dirty());
    }

    #[test]
    fn test_local_time_takes_max() {
        let meta = SyncMeta {
            local_modified: Some(100),
            last_synced_local: Some(50),
            cloud_timestamp: Some(9_999),
        };
        assert_eq!(meta.local_time(), 100);
        assert_eq!(SyncMeta::default().local_time(), 0);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Editor).unwrap(), "\"editor\"");
        let role: Role = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(role, Role::Viewer);
        assert!(!Role::Viewer.can_edit());
    }

    #[test]
    fn test_space_ownership() {
        let mut space = Space::new("alice", "Shells");
        assert!(space.is_owned());
        assert!(space.is_editable());

        space.shared_role = Some(Role::Viewer);
        assert!(space.is_shared());
        assert!(!space.is_editable());

        space.shared_role = Some(Role::Editor);
        assert!(space.is_editable());
    }

    #[test]
    fn test_item_completion() {
        let mut item = Item::new("Golden shell").with_target(3);
        assert!(!item.is_complete());
        item.progress = 3;
        assert!(item.is_complete());

        // Zero targets are clamped
        assert_eq!(Item::new("x").with_target(0).target, 1);
    }

    #[test]
    fn test_active_space_lookup() {
        let space = Space::new("alice", "Fossils");
        let id = space.id.clone();
        let mut state = AppState {
            spaces: vec![space],
            ..AppState::default()
        };
        assert!(state.active_space().is_none());

        state.settings.active_space_id = Some(id.clone());
        assert_eq!(state.active_space().unwrap().id, id);
    }

    #[test]
    fn test_dirty_count_skips_viewer_spaces() {
        let owned = Space::new("alice", "Mine");
        let mut viewed = Space::new("bob", "Theirs");
        viewed.shared_role = Some(Role::Viewer);

        let state = AppState {
            spaces: vec![owned, viewed],
            ..AppState::default()
        };
        // Owned space + never-synced settings
        assert_eq!(state.dirty_count(), 2);

        let state = AppState {
            deleted_spaces: vec!["gone".to_string()],
            ..state
        };
        assert_eq!(state.dirty_count(), 3);
    }

    #[test]
    fn test_state_serialization() {
        let mut space = Space::new("alice", "Stamps");
        space.items.push(Item::new("Penny Black"));
        space.collaborators.insert("bob".to_string(), Role::Editor);
        space.meta.local_modified = Some(42);

        let state = AppState {
            spaces: vec![space],
            ..AppState::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("localModified"));
        let parsed: AppState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
