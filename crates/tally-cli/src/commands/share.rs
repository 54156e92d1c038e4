//! Sharing command handlers

use anyhow::{bail, Result};

use tally_core::Role;

use crate::output::{short_id, Output};
use crate::session::Session;

/// Share an owned space with another user
pub async fn grant(session: &Session, space: String, with: String, role: Role, output: &Output) -> Result<()> {
    let engine = session.require_engine()?;
    let space_id = session.resolve_space(Some(&space)).await?;

    if !engine.share_space(&space_id, &with, role).await {
        bail!("Failed to share space: {}", last_problem(session));
    }

    output.success(&format!(
        "Shared space {} with {} as {}",
        short_id(&space_id),
        with,
        role
    ));
    Ok(())
}

/// Stop following a space someone shared with us
pub async fn leave(session: &Session, space: String, output: &Output) -> Result<()> {
    let engine = session.require_engine()?;
    let space_id = session.resolve_space(Some(&space)).await?;

    if !engine.leave_shared_space(&space_id).await {
        bail!("Space {} is not shared with you", short_id(&space_id));
    }

    output.success(&format!("Left space: {}", short_id(&space_id)));
    Ok(())
}

fn last_problem(session: &Session) -> String {
    session
        .engine()
        .and_then(|engine| engine.log_entries().pop())
        .map(|entry| entry.message)
        .unwrap_or_else(|| "unknown error".to_string())
}
