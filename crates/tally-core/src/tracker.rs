//! Change tracking
//!
//! Every local mutation of a space or of the global settings must stamp
//! `local_modified` on the document. The sync engine compares that stamp
//! with `last_synced_local` to decide what belongs in the next push.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::models::{GlobalSettings, Millis, Space, SyncMeta};

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Millis;
}

/// Wall clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// A document carrying sync bookkeeping
pub trait Tracked {
    fn sync_meta(&self) -> &SyncMeta;
    fn sync_meta_mut(&mut self) -> &mut SyncMeta;

    fn is_dirty(&self) -> bool {
        self.sync_meta().is_dirty()
    }
}

impl Tracked for Space {
    fn sync_meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

impl Tracked for GlobalSettings {
    fn sync_meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

/// Stamps modification times on mutated documents
///
/// Stamps are ordered against push snapshots: an edit stamped after
/// [`ChangeTracker::capture`] is always later than the captured time, even
/// within the same clock millisecond. Clones share that ordering.
#[derive(Clone)]
pub struct ChangeTracker {
    clock: Arc<dyn Clock>,
    marks: Arc<Marks>,
}

#[derive(Debug)]
struct Marks {
    /// Latest stamp handed to a document
    stamped: AtomicI64,
    /// Latest snapshot time handed to the sync engine
    captured: AtomicI64,
}

impl ChangeTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            marks: Arc::new(Marks {
                stamped: AtomicI64::new(Millis::MIN),
                captured: AtomicI64::new(Millis::MIN),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Time to record as `last_synced_local` for a snapshot taken now
    ///
    /// Covers every stamp issued so far. Call with the state lock held so
    /// no edit slips between the snapshot and the capture.
    pub fn capture(&self) -> Millis {
        let at = self
            .clock
            .now_millis()
            .max(self.marks.stamped.load(Ordering::SeqCst));
        self.marks.captured.fetch_max(at, Ordering::SeqCst);
        at
    }

    /// Record that `doc` was just changed locally
    pub fn touch<T: Tracked + ?Sized>(&self, doc: &mut T) {
        let captured = self.marks.captured.load(Ordering::SeqCst);
        let at = self.clock.now_millis().max(captured.saturating_add(1));
        self.marks.stamped.fetch_max(at, Ordering::SeqCst);
        doc.sync_meta_mut().local_modified = Some(at);
    }

    /// Apply `mutate` to `doc` and stamp it
    pub fn record<T, R>(&self, doc: &mut T, mutate: impl FnOnce(&mut T) -> R) -> R
    where
        T: Tracked,
    {
        let result = mutate(doc);
        self.touch(doc);
        result
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("now", &self.clock.now_millis())
            .finish()
    }
}
