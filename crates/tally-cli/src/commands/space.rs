//! Space command handlers

use std::io::{self, IsTerminal, Write};

use anyhow::{Context, Result};

use crate::output::{short_id, Output};
use crate::session::Session;

/// Create a new owned space
pub async fn create(session: &Session, name: String, categories: Vec<String>, output: &Output) -> Result<()> {
    let owner = session.user()?;
    let id = session
        .store
        .create_space(owner, &name)
        .await
        .context("Failed to create space")?;
    for category in &categories {
        session.store.add_category(&id, category).await?;
    }

    output.success(&format!("Created space: {} ({})", name, short_id(&id)));
    show(session, Some(id), output).await
}

/// List all spaces, owned and shared
pub async fn list(session: &Session, output: &Output) -> Result<()> {
    let state = session.store.snapshot().await;
    output.print_spaces(&state.spaces, state.settings.active_space_id.as_deref());
    Ok(())
}

/// Show one space, the active one by default
pub async fn show(session: &Session, query: Option<String>, output: &Output) -> Result<()> {
    let id = session.resolve_space(query.as_deref()).await?;
    let state = session.store.lock().await;
    if let Some(space) = state.space(&id) {
        let active = state.settings.active_space_id.as_deref() == Some(id.as_str());
        output.print_space(space, active);
    }
    Ok(())
}

pub async fn rename(session: &Session, query: String, name: String, output: &Output) -> Result<()> {
    let id = session.resolve_space(Some(&query)).await?;
    session
        .store
        .rename_space(&id, &name)
        .await
        .context("Failed to rename space")?;

    output.success(&format!("Renamed space {} to {}", short_id(&id), name));
    Ok(())
}

/// Delete an owned space, locally and remotely
pub async fn delete(session: &Session, query: String, yes: bool, output: &Output) -> Result<()> {
    let id = session.resolve_space(Some(&query)).await?;

    if output.should_prompt() && !yes {
        let name = session
            .store
            .lock()
            .await
            .space(&id)
            .map(|space| space.name.clone())
            .unwrap_or_default();
        println!("Delete space: {} - {}", short_id(&id), name);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = session
        .store
        .delete_space(&id)
        .await
        .context("Failed to delete space")?;

    output.success(&format!("Deleted space: {}", removed.name));
    Ok(())
}

/// Make a space the active one
pub async fn use_space(session: &Session, query: String, output: &Output) -> Result<()> {
    let id = session.resolve_space(Some(&query)).await?;
    session.store.set_active_space(&id).await?;

    output.success(&format!("Active space: {}", short_id(&id)));
    Ok(())
}

/// Ask for a yes/no answer; anything but yes on a non-terminal is a no
fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}
