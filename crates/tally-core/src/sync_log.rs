//! Bounded in-memory sync log
//!
//! Engine failures are never returned to callers; they end up here (and in
//! `tracing`) so a status panel can show what happened recently.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Ring buffer of recent sync events
pub struct SyncLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl SyncLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!(target: "tally_core::sync", "{}", message),
            LogLevel::Warn => warn!(target: "tally_core::sync", "{}", message),
            LogLevel::Error => error!(target: "tally_core::sync", "{}", message),
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            at: Utc::now(),
            level,
            message,
        });
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = SyncLog::new(3);
        for i in 0..5 {
            log.info(format!("event {}", i));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "event 2");
        assert_eq!(entries[2].message, "event 4");
    }

    #[test]
    fn test_levels_are_kept() {
        let log = SyncLog::new(10);
        assert!(log.is_empty());
        log.warn("careful");
        log.error("broken");

        let levels: Vec<LogLevel> = log.entries().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Warn, LogLevel::Error]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let log = SyncLog::new(0);
        log.info("a");
        log.info("b");
        assert_eq!(log.len(), 1);
    }
}
