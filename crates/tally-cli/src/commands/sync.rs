//! Sync command handler

use anyhow::{bail, Result};
use chrono::Utc;

use tally_core::{FlushOutcome, SyncStatus};

use crate::output::Output;
use crate::session::Session;

/// Load remote changes, then push local ones
pub async fn sync(session: &Session, show_log: bool, output: &Output) -> Result<()> {
    let engine = session.require_engine()?;
    let started = Utc::now();

    output.message("Loading remote changes...");
    let loaded = engine.load().await;
    if engine.status() == SyncStatus::Error {
        print_log(session, show_log, output);
        bail!("Sync failed while loading");
    }

    let outcome = engine.flush().await;
    let elapsed = (Utc::now() - started).num_milliseconds();

    if output.is_json() {
        let log = show_log.then(|| engine.log_entries());
        output.json(&serde_json::json!({
            "loaded_spaces": loaded.as_ref().map(|s| s.spaces.len() + s.shared.len()),
            "outcome": format!("{:?}", outcome),
            "status": engine.status().to_string(),
            "elapsed_ms": elapsed,
            "log": log,
        }));
    } else {
        print_log(session, show_log, output);
    }

    match outcome {
        FlushOutcome::Committed { documents } => {
            output.success(&format!("Sync complete - pushed {} document(s)", documents));
        }
        FlushOutcome::Clean => output.success("Sync complete - already up to date"),
        FlushOutcome::Failed => bail!("Sync failed while pushing"),
        FlushOutcome::Deferred | FlushOutcome::Stale | FlushOutcome::NotSignedIn => {
            output.message(&format!("Sync did not run: {:?}", outcome));
        }
    }

    Ok(())
}

fn print_log(session: &Session, show_log: bool, output: &Output) {
    if !show_log || output.is_json() {
        return;
    }
    if let Some(engine) = session.engine() {
        output.print_log(&engine.log_entries());
    }
}
