//! Local storage layer
//!
//! The device keeps its full document tree on disk so the app works offline
//! and unsynced edits survive restarts.

mod error;
mod persistence;

pub use error::{StorageError, StorageResult};
pub use persistence::LocalPersistence;

pub(crate) use persistence::atomic_write;
