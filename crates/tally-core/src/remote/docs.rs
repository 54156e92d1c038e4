//! Persisted document shapes
//!
//! Local bookkeeping (`SyncMeta`, `shared_role`) never leaves the device; the
//! remote copy only carries content plus the server's `update_time`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Document;
use crate::error::SyncError;
use crate::models::{
    GlobalSettings, Item, Millis, Role, ShareGrant, Space, SpaceId, SyncMeta, UserId,
};

/// Remote shape of a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDoc {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub owner_id: UserId,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub archived_items: Vec<Item>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub collaborators: BTreeMap<UserId, Role>,
}

impl SpaceDoc {
    pub fn from_space(space: &Space) -> Self {
        Self {
            name: space.name.clone(),
            color: space.color.clone(),
            owner_id: space.owner_id.clone(),
            items: space.items.clone(),
            archived_items: space.archived_items.clone(),
            categories: space.categories.clone(),
            collaborators: space.collaborators.clone(),
        }
    }

    /// Materialize a local record as seen by `viewer`
    ///
    /// Bookkeeping starts empty except for the cloud timestamp; the merge
    /// policy carries local bookkeeping over when a local copy exists.
    pub fn into_space(self, id: SpaceId, update_time: Millis, viewer: &str) -> Space {
        let shared_role = if self.owner_id == viewer {
            None
        } else {
            Some(
                self.collaborators
                    .get(viewer)
                    .copied()
                    .unwrap_or(Role::Viewer),
            )
        };

        Space {
            id,
            name: self.name,
            color: self.color,
            owner_id: self.owner_id,
            collaborators: self.collaborators,
            items: self.items,
            archived_items: self.archived_items,
            categories: self.categories,
            shared_role,
            meta: SyncMeta {
                cloud_timestamp: Some(update_time),
                ..SyncMeta::default()
            },
        }
    }

    /// Decode a stored space document
    pub fn decode(doc: &Document, viewer: &str) -> Result<Space, SyncError> {
        let parsed: SpaceDoc =
            serde_json::from_value(doc.data.clone()).map_err(|source| SyncError::Decode {
                path: doc.path.clone(),
                source,
            })?;
        Ok(parsed.into_space(doc.path.id().to_string(), doc.update_time, viewer))
    }
}

/// Remote shape of the global settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDoc {
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub active_space_id: Option<SpaceId>,
}

impl SettingsDoc {
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self {
            settings: settings.preferences.clone(),
            tags: settings.tags.clone(),
            active_space_id: settings.active_space_id.clone(),
        }
    }

    pub fn decode(doc: &Document) -> Result<GlobalSettings, SyncError> {
        let parsed: SettingsDoc =
            serde_json::from_value(doc.data.clone()).map_err(|source| SyncError::Decode {
                path: doc.path.clone(),
                source,
            })?;
        Ok(GlobalSettings {
            preferences: parsed.settings,
            tags: parsed.tags,
            active_space_id: parsed.active_space_id,
            meta: SyncMeta {
                cloud_timestamp: Some(doc.update_time),
                ..SyncMeta::default()
            },
        })
    }
}

/// Remote shape of the user profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDoc {
    #[serde(default)]
    pub shared_spaces: Vec<ShareGrant>,
}

impl ProfileDoc {
    pub fn decode(doc: &Document) -> Result<Self, SyncError> {
        serde_json::from_value(doc.data.clone()).map_err(|source| SyncError::Decode {
            path: doc.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DocPath;
    use serde_json::json;

    #[test]
    fn test_space_doc_strips_bookkeeping() {
        let mut space = Space::new("alice", "Shells");
        space.meta.local_modified = Some(10);
        space.categories.push("beach".to_string());

        let value = serde_json::to_value(SpaceDoc::from_space(&space)).unwrap();
        assert_eq!(value["ownerId"], "alice");
        assert_eq!(value["categories"][0], "beach");
        assert!(value.get("meta").is_none());
        assert!(value.get("sharedRole").is_none());
    }

    #[test]
    fn test_decode_owned_and_shared() {
        let doc = Document {
            path: DocPath::space("alice", "s1"),
            data: json!({
                "name": "Shells",
                "ownerId": "alice",
                "collaborators": { "bob": "editor" }
            }),
            update_time: 77,
        };

        let owned = SpaceDoc::decode(&doc, "alice").unwrap();
        assert_eq!(owned.id, "s1");
        assert!(owned.is_owned());
        assert_eq!(owned.meta.cloud_timestamp, Some(77));
        assert_eq!(owned.meta.local_modified, None);

        let shared = SpaceDoc::decode(&doc, "bob").unwrap();
        assert_eq!(shared.shared_role, Some(Role::Editor));

        // Unknown readers are treated as viewers
        let stranger = SpaceDoc::decode(&doc, "carol").unwrap();
        assert_eq!(stranger.shared_role, Some(Role::Viewer));
    }

    #[test]
    fn test_decode_malformed_space() {
        let doc = Document {
            path: DocPath::space("alice", "bad"),
            data: json!({ "name": 5 }),
            update_time: 1,
        };
        let err = SpaceDoc::decode(&doc, "alice").unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
        assert!(err.to_string().contains("users/alice/spaces/bad"));
    }

    #[test]
    fn test_settings_round_trip_through_document() {
        let mut settings = GlobalSettings::default();
        settings.tags.push("rare".to_string());
        settings.active_space_id = Some("s1".to_string());
        settings
            .preferences
            .insert("theme".to_string(), json!("dark"));

        let doc = Document {
            path: DocPath::settings("alice"),
            data: serde_json::to_value(SettingsDoc::from_settings(&settings)).unwrap(),
            update_time: 500,
        };
        let decoded = SettingsDoc::decode(&doc).unwrap();
        assert_eq!(decoded.tags, settings.tags);
        assert_eq!(decoded.active_space_id, settings.active_space_id);
        assert_eq!(decoded.preferences["theme"], json!("dark"));
        assert_eq!(decoded.meta.cloud_timestamp, Some(500));
    }

    #[test]
    fn test_profile_decode() {
        let doc = Document {
            path: DocPath::profile("bob"),
            data: json!({
                "sharedSpaces": [{ "ownerId": "alice", "spaceId": "s1", "role": "viewer" }]
            }),
            update_time: 3,
        };
        let profile = ProfileDoc::decode(&doc).unwrap();
        assert_eq!(profile.shared_spaces.len(), 1);
        assert_eq!(profile.shared_spaces[0].role, Role::Viewer);
    }
}
