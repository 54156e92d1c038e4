//! Flush deferral
//!
//! A host can hold pushes back while the user is in the middle of an
//! interaction (dragging, hovering an item whose layout a remote merge would
//! shift). The engine asks the gate before every flush and, when deferred,
//! waits for the gate to open before rescheduling.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

#[async_trait]
pub trait FlushGate: Send + Sync {
    /// Whether a flush starting now should wait
    fn should_defer(&self) -> bool;

    /// Resolves once a deferred flush may proceed
    async fn released(&self);
}

/// Gate that never holds a flush back
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDefer;

#[async_trait]
impl FlushGate for NeverDefer {
    fn should_defer(&self) -> bool {
        false
    }

    async fn released(&self) {}
}

/// Flag-driven gate for interactive hosts
#[derive(Debug, Default)]
pub struct HoverGate {
    held: AtomicBool,
    notify: Notify,
}

impl HoverGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold flushes until [`HoverGate::release`]
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlushGate for HoverGate {
    fn should_defer(&self) -> bool {
        self.is_held()
    }

    async fn released(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if !self.is_held() {
                return;
            }
            notified.await;
        }
    }
}
