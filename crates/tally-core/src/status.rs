//! Sync status and change notifications
//!
//! The rendering layer observes the engine through two typed event kinds:
//! status transitions ([`SyncStatus`]) and merged data ([`DataChange`]).
//! Status listeners are called immediately with the current status when they
//! register, so a late subscriber never misses the state it joined in.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::merge::{OwnMergeReport, SharedMergeOutcome};
use crate::models::SpaceId;

/// Sync state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// Not running
    Idle,
    /// A push or load is in flight
    Syncing,
    /// Local and remote agree as far as we know
    Synced,
    /// The last push or load failed
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Local data changed because of remote input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChange {
    /// Initial load hydrated local state
    Loaded { spaces: usize },
    /// The owned-spaces snapshot was merged
    OwnSpaces(OwnMergeReport),
    /// A shared space update was merged
    SharedSpace {
        space_id: SpaceId,
        outcome: SharedMergeOutcome,
    },
    /// A shared space was removed locally
    LeftSpace { space_id: SpaceId },
}

/// Handle returned on registration, used to remove a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StatusListener = Arc<dyn Fn(SyncStatus) + Send + Sync>;
type DataListener = Arc<dyn Fn(&DataChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    status: Vec<(ListenerId, StatusListener)>,
    data: Vec<(ListenerId, DataListener)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Fan-out of status and data events
pub struct StatusBroadcaster {
    status_tx: watch::Sender<SyncStatus>,
    status_rx: watch::Receiver<SyncStatus>,
    listeners: Mutex<Listeners>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);
        Self {
            status_tx,
            status_rx,
            listeners: Mutex::new(Listeners::default()),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Register a status callback; it runs right away with the current status
    pub fn on_status_change(&self, listener: impl Fn(SyncStatus) + Send + Sync + 'static) -> ListenerId {
        let listener: StatusListener = Arc::new(listener);
        let id = {
            let mut listeners = self.listeners();
            let id = listeners.next_id();
            listeners.status.push((id, Arc::clone(&listener)));
            id
        };
        listener(self.status());
        id
    }

    /// Register a callback for merged remote data
    pub fn on_data_change(&self, listener: impl Fn(&DataChange) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.listeners();
        let id = listeners.next_id();
        listeners.data.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener of either kind; returns false if it was unknown
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.status.len() + listeners.data.len();
        listeners.status.retain(|(lid, _)| *lid != id);
        listeners.data.retain(|(lid, _)| *lid != id);
        before != listeners.status.len() + listeners.data.len()
    }

    /// Publish a status; listeners run only on actual transitions
    pub fn set_status(&self, status: SyncStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if !changed {
            return;
        }

        // Callbacks run outside the lock so they may register listeners
        let listeners: Vec<StatusListener> = self
            .listeners()
            .status
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(status);
        }
    }

    pub fn data_changed(&self, change: &DataChange) {
        let listeners: Vec<DataListener> = self
            .listeners()
            .data
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable "last synced" label
pub fn format_last_synced(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "never".to_string();
    };

    let seconds = (now - last).num_seconds().max(0);
    match seconds {
        0..=9 => "just now".to_string(),
        10..=59 => format!("{} seconds ago", seconds),
        60..=3599 => plural(seconds / 60, "minute"),
        3600..=86_399 => plural(seconds / 3600, "hour"),
        _ => plural(seconds / 86_400, "day"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listener_receives_current_status_immediately() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.set_status(SyncStatus::Synced);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        broadcaster.on_status_change(move |status| sink.lock().unwrap().push(status));

        broadcaster.set_status(SyncStatus::Syncing);
        broadcaster.set_status(SyncStatus::Error);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncStatus::Synced, SyncStatus::Syncing, SyncStatus::Error]
        );
    }

    #[test]
    fn test_repeated_status_is_not_rebroadcast() {
        let broadcaster = StatusBroadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        broadcaster.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.set_status(SyncStatus::Synced);
        broadcaster.set_status(SyncStatus::Synced);
        // Initial call + one transition
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let broadcaster = StatusBroadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = broadcaster.on_data_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.data_changed(&DataChange::Loaded { spaces: 1 });
        assert!(broadcaster.remove_listener(id));
        assert!(!broadcaster.remove_listener(id));
        broadcaster.data_changed(&DataChange::Loaded { spaces: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watch_receiver_tracks_status() {
        let broadcaster = StatusBroadcaster::new();
        let rx = broadcaster.subscribe_status();
        assert_eq!(*rx.borrow(), SyncStatus::Idle);

        broadcaster.set_status(SyncStatus::Syncing);
        assert_eq!(*rx.borrow(), SyncStatus::Syncing);
    }

    #[test]
    fn test_format_last_synced() {
        let now = Utc::now();
        assert_eq!(format_last_synced(None, now), "never");
        assert_eq!(format_last_synced(Some(now), now), "just now");
        assert_eq!(
            format_last_synced(Some(now - Duration::seconds(42)), now),
            "42 seconds ago"
        );
        assert_eq!(
            format_last_synced(Some(now - Duration::seconds(61)), now),
            "1 minute ago"
        );
        assert_eq!(
            format_last_synced(Some(now - Duration::hours(5)), now),
            "5 hours ago"
        );
        assert_eq!(
            format_last_synced(Some(now - Duration::days(3)), now),
            "3 days ago"
        );
        // Clock went backwards
        assert_eq!(
            format_last_synced(Some(now + Duration::seconds(30)), now),
            "just now"
        );
    }
}
