//! Tally Core Library
//!
//! This crate provides the core functionality for Tally, a local-first
//! progress tracker whose collections ("spaces") are mirrored to a shared
//! remote document store across devices and collaborators.
//!
//! # Architecture
//!
//! - **Local state** is the source of truth for the UI and is saved on every
//!   change.
//! - **The sync engine** pushes dirty documents in debounced batches and
//!   merges remote snapshots with a last-writer-wins rule that respects
//!   ownership and collaborator roles.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Store::open(&config)?;
//! let remote = MemoryRemote::open(config.remote_store_path())?;
//! let engine = SyncEngine::init(config.sync.clone(), store, Arc::new(remote.client()));
//!
//! engine.sign_in("alice");
//! engine.load().await;
//! engine.start().await;
//!
//! let space = engine.store().create_space("alice", "Shells").await?;
//! engine.schedule();
//! ```
//!
//! # Modules
//!
//! - `store`: Local mutation surface (main entry point for edits)
//! - `engine`: Push scheduling, subscriptions, initial load
//! - `merge`: Conflict resolution between local and remote copies
//! - `remote`: Remote store contract and the in-process store
//! - `tracker`: Modification timestamps
//! - `status`: Sync status and change notifications
//! - `storage`: Local JSON persistence
//! - `config`: Application configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod remote;
pub mod status;
pub mod storage;
pub mod store;
pub mod sync_log;
pub mod tracker;

pub use config::{Config, SyncConfig};
pub use engine::{EngineStats, FlushGate, FlushOutcome, HoverGate, NeverDefer, RemoteSnapshot, SyncEngine};
pub use error::{RemoteError, SyncError};
pub use models::{AppState, GlobalSettings, Item, Millis, Role, ShareGrant, Space, SpaceId, SyncMeta, UserId};
pub use remote::{DocPath, MemoryClient, MemoryRemote, RemoteStore};
pub use status::{DataChange, ListenerId, SyncStatus};
pub use storage::{LocalPersistence, StorageError};
pub use store::Store;
pub use sync_log::{LogEntry, LogLevel};
pub use tracker::{ChangeTracker, Clock, ManualClock, SystemClock};
