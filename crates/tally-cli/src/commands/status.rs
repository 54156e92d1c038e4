//! Status command handler

use anyhow::Result;

use crate::output::{Output, OutputFormat};
use crate::session::Session;

/// Show status information
pub async fn show(session: &Session, output: &Output) -> Result<()> {
    let config = &session.config;
    let state = session.store.snapshot().await;
    let owned = state.spaces.iter().filter(|s| s.is_owned()).count();
    let shared = state.spaces.len() - owned;
    let dirty = state.dirty_count();

    let engine = session.engine();
    let status = engine.map(|e| e.status().to_string());
    let last_synced = engine.map(|e| e.last_synced_label());

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "user_id": config.user_id,
                "sync_enabled": config.sync_enabled,
                "sync_status": status,
                "last_synced": last_synced,
                "data_dir": config.data_dir,
                "remote_path": config.remote_store_path(),
                "active_space": state.settings.active_space_id,
                "counts": {
                    "owned_spaces": owned,
                    "shared_spaces": shared,
                    "unsynced": dirty
                },
                "stats": engine.map(|e| e.stats())
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", status.as_deref().unwrap_or("disabled"));
        }
        OutputFormat::Human => {
            println!("Tally Status");
            println!("============");
            println!();
            println!("User: {}", config.user_id.as_deref().unwrap_or("(not set)"));
            println!();
            println!("Sync:");
            match (status, last_synced) {
                (Some(status), Some(last)) => {
                    println!("  Status:      {}", status);
                    println!("  Last synced: {}", last);
                    println!("  Store:       {}", config.remote_store_path().display());
                }
                _ => println!("  Status:      disabled"),
            }
            println!("  Unsynced:    {}", dirty);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Spaces: {} owned, {} shared", owned, shared);
            if let Some(active) = state.active_space() {
                println!("  Active: {}", active.name);
            }
        }
    }

    Ok(())
}
