//! Per-invocation wiring of config, local store and sync engine

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;
use uuid::Uuid;

use tally_core::{
    AppState, Config, FlushOutcome, LogLevel, MemoryRemote, Space, SpaceId, Store, SyncEngine,
    SyncStatus,
};

use crate::output::Output;

/// Everything a command needs
pub struct Session {
    pub config: Config,
    pub store: Store,
    engine: Option<SyncEngine>,
}

impl Session {
    /// Open the local store and, if sync is enabled, the sync engine
    pub fn open(config: Config) -> Result<Self> {
        let store = Store::open(&config).context("Failed to open local state")?;

        let engine = if config.sync_enabled {
            let path = config.remote_store_path();
            let remote = MemoryRemote::open(path.clone())
                .with_context(|| format!("Failed to open document store at {:?}", path))?;
            let engine = SyncEngine::init(config.sync.clone(), store.clone(), Arc::new(remote.client()));
            if let Some(ref user) = config.user_id {
                engine.sign_in(user.clone());
            }
            debug!(remote = %path.display(), user = ?config.user_id, "Sync engine ready");
            Some(engine)
        } else {
            None
        };

        Ok(Self {
            config,
            store,
            engine,
        })
    }

    /// The configured user, required for creating spaces
    pub fn user(&self) -> Result<&str> {
        match self.config.user_id.as_deref() {
            Some(user) => Ok(user),
            None => bail!(
                "No user configured. Set one with:\n  \
                 tally config set user_id <name>"
            ),
        }
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    /// The engine, for commands that only make sense with sync on
    pub fn require_engine(&self) -> Result<&SyncEngine> {
        let Some(ref engine) = self.engine else {
            bail!(
                "Sync is not enabled. Enable it with:\n  \
                 tally config set sync_enabled true"
            );
        };
        if !engine.is_signed_in() {
            self.user()?;
        }
        Ok(engine)
    }

    /// Pull remote state before a command reads local state
    pub async fn pull(&self, output: &Output) {
        let Some(engine) = self.signed_in_engine() else {
            return;
        };
        engine.load().await;
        if engine.status() == SyncStatus::Error {
            self.warn_last_error(engine, output);
        }
    }

    /// Push local changes after a command wrote them
    pub async fn push(&self, output: &Output) {
        let Some(engine) = self.signed_in_engine() else {
            return;
        };
        if engine.flush().await == FlushOutcome::Failed {
            self.warn_last_error(engine, output);
        }
    }

    fn signed_in_engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref().filter(|engine| engine.is_signed_in())
    }

    fn warn_last_error(&self, engine: &SyncEngine, output: &Output) {
        if output.is_quiet() {
            return;
        }
        let entries = engine.log_entries();
        let last = entries
            .iter()
            .rev()
            .find(|entry| entry.level != LogLevel::Info)
            .map(|entry| entry.message.as_str())
            .unwrap_or("unknown error");
        eprintln!("⚠ Auto-sync failed: {}", last);
    }

    // ==================== Lookups ====================

    /// Resolve a space by full id, id prefix, or name
    ///
    /// Falls back to the active space when `query` is `None`.
    pub async fn resolve_space(&self, query: Option<&str>) -> Result<SpaceId> {
        let state = self.store.lock().await;
        match query {
            Some(query) => find_space(&state, query).map(|space| space.id.clone()),
            None => match state.active_space() {
                Some(space) => Ok(space.id.clone()),
                None => bail!("No active space. Create one with `tally space create <name>`"),
            },
        }
    }

    /// Resolve an item of a space by full UUID or prefix
    pub async fn resolve_item(&self, space_id: &str, query: &str) -> Result<Uuid> {
        let state = self.store.lock().await;
        let Some(space) = state.space(space_id) else {
            bail!("No space with id '{}'", space_id);
        };
        find_item(space, query)
    }
}

fn find_space<'a>(state: &'a AppState, query: &str) -> Result<&'a Space> {
    if let Some(space) = state.space(query) {
        return Ok(space);
    }

    let by_name: Vec<&Space> = state
        .spaces
        .iter()
        .filter(|s| s.name.eq_ignore_ascii_case(query))
        .collect();
    if by_name.len() == 1 {
        return Ok(by_name[0]);
    }

    let matches: Vec<&Space> = state
        .spaces
        .iter()
        .filter(|s| s.id.starts_with(query))
        .collect();

    match matches.len() {
        0 if by_name.is_empty() => bail!("No space found matching: {}", query),
        0 => ambiguous("spaces", query, by_name.iter().map(|s| (s.id.clone(), s.name.clone()))),
        1 => Ok(matches[0]),
        _ => ambiguous("spaces", query, matches.iter().map(|s| (s.id.clone(), s.name.clone()))),
    }
}

fn find_item(space: &Space, query: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(query) {
        return Ok(id);
    }

    let matches: Vec<_> = space
        .items
        .iter()
        .filter(|item| item.id.to_string().starts_with(query))
        .collect();

    match matches.len() {
        0 => bail!("No item found matching: {}", query),
        1 => Ok(matches[0].id),
        _ => ambiguous(
            "items",
            query,
            matches.iter().map(|i| (i.id.to_string(), i.name.clone())),
        ),
    }
}

fn ambiguous<T>(kind: &str, query: &str, candidates: impl Iterator<Item = (String, String)>) -> Result<T> {
    eprintln!("Multiple {} match '{}':", kind, query);
    for (id, name) in candidates {
        eprintln!("  {} - {}", id, name);
    }
    bail!("Ambiguous ID. Please provide more characters.");
}
