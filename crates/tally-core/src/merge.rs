//! Conflict resolution between local state and remote snapshots
//!
//! Resolution is whole-document last-writer-wins. A local copy's time is
//! `max(local_modified, last_synced_local)`; the remote copy's time is the
//! server's `cloud_timestamp`. Two collaborators editing different items of
//! the same space concurrently can therefore overwrite each other's unsynced
//! change. That is accepted: there is no field-level merge.
//!
//! Local times are wall-clock milliseconds of this device while remote times
//! come from the server, so a device with a skewed clock can make the wrong
//! side win.

use tracing::debug;

use crate::models::{AppState, GlobalSettings, Millis, Role, Space, SpaceId, SyncMeta};

/// What happened to each space during an own-spaces merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnMergeReport {
    /// Existing spaces replaced by the incoming copy
    pub accepted: Vec<SpaceId>,
    /// Existing spaces whose newer local content was kept
    pub kept_local: Vec<SpaceId>,
    /// Spaces that had no local counterpart
    pub added: Vec<SpaceId>,
    /// Synced local spaces missing from the snapshot
    pub removed: Vec<SpaceId>,
    /// New active space chosen because the old one disappeared
    pub active_repaired: Option<Option<SpaceId>>,
}

impl OwnMergeReport {
    /// Whether the merge changed anything visible
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty()
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || self.active_repaired.is_some()
    }
}

/// Outcome of merging a single shared space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMergeOutcome {
    Accepted,
    KeptLocal,
    Added,
}

fn incoming_time(meta: &SyncMeta) -> Millis {
    meta.cloud_timestamp.unwrap_or(0)
}

/// A record that only ever held remote content has nothing to push
fn settle(meta: &mut SyncMeta) {
    if meta.local_modified.is_none() && meta.last_synced_local.is_none() {
        meta.last_synced_local = meta.cloud_timestamp;
    }
}

/// Carry local bookkeeping onto a record produced from the incoming copy
fn adopt_incoming(local: &Space, mut incoming: Space) -> Space {
    incoming.meta.local_modified = local.meta.local_modified;
    incoming.meta.last_synced_local = local.meta.last_synced_local;
    settle(&mut incoming.meta);
    incoming
}

/// Keep local content but take server-owned fields from the incoming copy
fn keep_local(mut local: Space, incoming: &Space) -> Space {
    local.collaborators = incoming.collaborators.clone();
    local.meta.cloud_timestamp = incoming.meta.cloud_timestamp;
    local
}

/// Merge the full list of the user's owned spaces
///
/// Shared-in spaces are never described by this snapshot and stay as they
/// are. Local owned spaces absent from the snapshot survive only if they
/// hold unpushed work (never synced, or dirty). Incoming spaces with a
/// pending local deletion are ignored.
pub fn merge_own_spaces(state: &mut AppState, incoming: Vec<Space>) -> OwnMergeReport {
    let mut report = OwnMergeReport::default();
    let mut local_owned: Vec<Space> = Vec::new();
    let mut shared: Vec<Space> = Vec::new();
    for space in state.spaces.drain(..) {
        if space.is_owned() {
            local_owned.push(space);
        } else {
            shared.push(space);
        }
    }

    let mut merged: Vec<Space> = Vec::with_capacity(incoming.len() + shared.len());
    for mut remote in incoming {
        if state.deleted_spaces.contains(&remote.id) {
            continue;
        }
        let position = local_owned.iter().position(|local| local.id == remote.id);
        let Some(position) = position else {
            settle(&mut remote.meta);
            report.added.push(remote.id.clone());
            merged.push(remote);
            continue;
        };

        let local = local_owned.remove(position);
        let local_time = local.meta.local_time();
        let remote_time = incoming_time(&remote.meta);
        if local_time > remote_time {
            debug!(space = %local.id, local_time, remote_time, "Keeping newer local space");
            report.kept_local.push(local.id.clone());
            merged.push(keep_local(local, &remote));
        } else {
            report.accepted.push(remote.id.clone());
            merged.push(adopt_incoming(&local, remote));
        }
    }

    for local in local_owned {
        if local.meta.last_synced_local.is_none() || local.meta.is_dirty() {
            merged.push(local);
        } else {
            report.removed.push(local.id);
        }
    }

    merged.extend(shared);
    state.spaces = merged;
    report.active_repaired = repair_active_space(state);
    report
}

/// Merge one update of a space owned by someone else
pub fn merge_shared_space(state: &mut AppState, mut incoming: Space) -> SharedMergeOutcome {
    let Some(local) = state.space_mut(&incoming.id) else {
        settle(&mut incoming.meta);
        state.spaces.push(incoming);
        return SharedMergeOutcome::Added;
    };

    let local_role = local.shared_role.unwrap_or(Role::Viewer);
    let accept = match local_role {
        Role::Viewer => true,
        Role::Editor | Role::Owner => incoming_time(&incoming.meta) >= local.meta.local_time(),
    };

    let role = incoming.shared_role.or(local.shared_role);
    if accept {
        let mut produced = adopt_incoming(local, incoming);
        produced.shared_role = role;
        *local = produced;
        SharedMergeOutcome::Accepted
    } else {
        debug!(space = %local.id, "Keeping newer local edit of shared space");
        local.collaborators = incoming.collaborators;
        local.meta.cloud_timestamp = incoming.meta.cloud_timestamp;
        local.shared_role = role;
        SharedMergeOutcome::KeptLocal
    }
}

/// Merge the remote settings document; returns true if the incoming copy won
pub fn merge_settings(local: &mut GlobalSettings, incoming: GlobalSettings) -> bool {
    if local.meta.local_time() > incoming_time(&incoming.meta) {
        local.meta.cloud_timestamp = incoming.meta.cloud_timestamp;
        return false;
    }

    let mut meta = SyncMeta {
        cloud_timestamp: incoming.meta.cloud_timestamp,
        ..local.meta
    };
    settle(&mut meta);
    *local = GlobalSettings { meta, ..incoming };
    true
}

/// Point the active space at an existing space
///
/// Returns the new pointer when it had to change.
pub fn repair_active_space(state: &mut AppState) -> Option<Option<SpaceId>> {
    let valid = state
        .settings
        .active_space_id
        .as_deref()
        .is_some_and(|id| state.space(id).is_some());
    if valid {
        return None;
    }

    let replacement = state.spaces.first().map(|space| space.id.clone());
    if replacement == state.settings.active_space_id {
        return None;
    }
    state.settings.active_space_id = replacement.clone();
    Some(replacement)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(id: &str, name: &str, modified: Option<Millis>, synced: Option<Millis>) -> Space {
        let mut space = Space::with_id(id, "alice", name);
        space.meta.local_modified = modified;
        space.meta.last_synced_local = synced;
        space
    }

    fn remote(id: &str, name: &str, cloud: Millis) -> Space {
        let mut space = Space::with_id(id, "alice", name);
        space.meta.cloud_timestamp = Some(cloud);
        space
    }

    fn shared(id: &str, role: Role, modified: Option<Millis>) -> Space {
        let mut space = Space::with_id(id, "bob", "Local shared");
        space.shared_role = Some(role);
        space.meta.local_modified = modified;
        space
    }

    fn state_with(spaces: Vec<Space>) -> AppState {
        AppState {
            spaces,
            ..AppState::default()
        }
    }

    #[test]
    fn test_lww_keeps_newer_local() {
        let mut state = state_with(vec![owned("a", "Local", Some(100), Some(50))]);

        let report = merge_own_spaces(&mut state, vec![remote("a", "Remote", 80)]);
        assert_eq!(report.kept_local, vec!["a".to_string()]);
        assert_eq!(state.spaces[0].name, "Local");
        assert_eq!(state.spaces[0].meta.cloud_timestamp, Some(80));
    }

    #[test]
    fn test_lww_accepts_newer_incoming() {
        let mut state = state_with(vec![owned("a", "Local", Some(100), Some(50))]);

        let report = merge_own_spaces(&mut state, vec![remote("a", "Remote", 150)]);
        assert_eq!(report.accepted, vec!["a".to_string()]);
        let space = &state.spaces[0];
        assert_eq!(space.name, "Remote");
        // Local bookkeeping is preserved on the produced record
        assert_eq!(space.meta.local_modified, Some(100));
        assert_eq!(space.meta.last_synced_local, Some(50));
        assert_eq!(space.meta.cloud_timestamp, Some(150));
    }

    #[test]
    fn test_equal_times_accept_incoming() {
        let mut state = state_with(vec![owned("a", "Local", Some(100), Some(100))]);
        merge_own_spaces(&mut state, vec![remote("a", "Remote", 100)]);
        assert_eq!(state.spaces[0].name, "Remote");
    }

    #[test]
    fn test_collaborators_always_from_incoming() {
        let mut local = owned("a", "Local", Some(500), Some(50));
        local.collaborators.insert("mallory".to_string(), Role::Editor);
        let mut state = state_with(vec![local]);

        let mut incoming = remote("a", "Remote", 80);
        incoming.collaborators.insert("bob".to_string(), Role::Viewer);
        merge_own_spaces(&mut state, vec![incoming]);

        let space = &state.spaces[0];
        assert_eq!(space.name, "Local");
        assert_eq!(space.collaborators.len(), 1);
        assert_eq!(space.collaborators["bob"], Role::Viewer);
    }

    #[test]
    fn test_new_remote_space_is_added() {
        let mut state = AppState::default();
        let report = merge_own_spaces(&mut state, vec![remote("n", "New", 10)]);
        assert_eq!(report.added, vec!["n".to_string()]);
        assert_eq!(state.spaces.len(), 1);
        // Nothing to push back
        assert!(!state.spaces[0].meta.is_dirty());
        assert_eq!(state.spaces[0].meta.last_synced_local, Some(10));
    }

    #[test]
    fn test_pending_deletion_is_not_resurrected() {
        let mut state = AppState {
            deleted_spaces: vec!["gone".to_string()],
            ..AppState::default()
        };
        let report = merge_own_spaces(&mut state, vec![remote("gone", "Gone", 10)]);
        assert!(report.added.is_empty());
        assert!(state.spaces.is_empty());
    }

    #[test]
    fn test_shared_spaces_untouched_by_own_snapshot() {
        let mut state = state_with(vec![shared("s", Role::Viewer, Some(5))]);
        merge_own_spaces(&mut state, vec![remote("a", "Mine", 10)]);

        assert_eq!(state.spaces.len(), 2);
        let kept = state.space("s").unwrap();
        assert_eq!(kept.name, "Local shared");
        assert!(kept.is_shared());
    }

    #[test]
    fn test_missing_local_spaces() {
        let mut state = state_with(vec![
            owned("fresh", "Never synced", Some(10), None),
            owned("dirty", "Unpushed edit", Some(30), Some(20)),
            owned("gone", "Deleted elsewhere", Some(10), Some(20)),
        ]);

        let report = merge_own_spaces(&mut state, vec![]);
        assert_eq!(report.removed, vec!["gone".to_string()]);
        assert!(state.space("fresh").is_some());
        assert!(state.space("dirty").is_some());
        assert!(state.space("gone").is_none());
    }

    #[test]
    fn test_active_space_repair() {
        let mut state = state_with(vec![
            owned("keep", "Keep", Some(1), Some(1)),
            owned("gone", "Gone", Some(1), Some(1)),
        ]);
        state.settings.active_space_id = Some("gone".to_string());

        let report = merge_own_spaces(&mut state, vec![remote("keep", "Keep", 5)]);
        assert_eq!(report.active_repaired, Some(Some("keep".to_string())));
        assert_eq!(state.settings.active_space_id.as_deref(), Some("keep"));
        assert!(report.changed());
    }

    #[test]
    fn test_active_space_cleared_when_nothing_left() {
        let mut state = state_with(vec![owned("gone", "Gone", Some(1), Some(1))]);
        state.settings.active_space_id = Some("gone".to_string());

        merge_own_spaces(&mut state, vec![]);
        assert!(state.settings.active_space_id.is_none());
    }

    #[test]
    fn test_valid_active_space_unchanged() {
        let mut state = state_with(vec![owned("a", "A", Some(1), Some(1))]);
        state.settings.active_space_id = Some("a".to_string());
        assert_eq!(repair_active_space(&mut state), None);
    }

    #[test]
    fn test_viewer_always_accepts() {
        let mut state = state_with(vec![shared("s", Role::Viewer, Some(10_000))]);

        let mut incoming = remote("s", "Owner copy", 5);
        incoming.owner_id = "bob".to_string();
        incoming.shared_role = Some(Role::Viewer);

        let outcome = merge_shared_space(&mut state, incoming);
        assert_eq!(outcome, SharedMergeOutcome::Accepted);
        let space = state.space("s").unwrap();
        assert_eq!(space.name, "Owner copy");
        assert_eq!(space.shared_role, Some(Role::Viewer));
    }

    #[test]
    fn test_editor_keeps_newer_local() {
        let mut state = state_with(vec![shared("s", Role::Editor, Some(200))]);

        let mut incoming = remote("s", "Owner copy", 150);
        incoming.shared_role = Some(Role::Editor);
        assert_eq!(
            merge_shared_space(&mut state, incoming),
            SharedMergeOutcome::KeptLocal
        );
        assert_eq!(state.space("s").unwrap().name, "Local shared");

        let mut incoming = remote("s", "Owner copy", 200);
        incoming.shared_role = Some(Role::Editor);
        assert_eq!(
            merge_shared_space(&mut state, incoming),
            SharedMergeOutcome::Accepted
        );
        assert_eq!(state.space("s").unwrap().name, "Owner copy");
    }

    #[test]
    fn test_role_change_is_applied() {
        let mut state = state_with(vec![shared("s", Role::Editor, Some(200))]);

        let mut incoming = remote("s", "Owner copy", 100);
        incoming.shared_role = Some(Role::Viewer);
        merge_shared_space(&mut state, incoming);

        // Decision used the local role, the record now reflects the demotion
        let space = state.space("s").unwrap();
        assert_eq!(space.name, "Local shared");
        assert_eq!(space.shared_role, Some(Role::Viewer));
    }

    #[test]
    fn test_unknown_shared_space_is_appended() {
        let mut state = state_with(vec![owned("a", "Mine", Some(1), None)]);
        let mut incoming = remote("s", "Theirs", 5);
        incoming.shared_role = Some(Role::Viewer);

        assert_eq!(
            merge_shared_space(&mut state, incoming),
            SharedMergeOutcome::Added
        );
        assert_eq!(state.spaces.len(), 2);
        assert_eq!(state.spaces[1].id, "s");
    }

    #[test]
    fn test_settings_lww() {
        let mut local = GlobalSettings::default();
        local.tags.push("local".to_string());
        local.meta.local_modified = Some(300);
        local.meta.last_synced_local = Some(100);

        let mut incoming = GlobalSettings::default();
        incoming.tags.push("remote".to_string());
        incoming.meta.cloud_timestamp = Some(200);
        assert!(!merge_settings(&mut local, incoming.clone()));
        assert_eq!(local.tags, vec!["local".to_string()]);

        incoming.meta.cloud_timestamp = Some(400);
        assert!(merge_settings(&mut local, incoming));
        assert_eq!(local.tags, vec!["remote".to_string()]);
        assert_eq!(local.meta.local_modified, Some(300));
        assert_eq!(local.meta.cloud_timestamp, Some(400));
    }
}
