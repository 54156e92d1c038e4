//! Item command handlers

use anyhow::{bail, Context, Result};

use tally_core::Item;

use crate::output::Output;
use crate::session::Session;

/// Add an item to a space
pub async fn add(
    session: &Session,
    space: Option<String>,
    name: String,
    target: u32,
    category: Option<String>,
    output: &Output,
) -> Result<()> {
    let space_id = session.resolve_space(space.as_deref()).await?;

    let mut item = Item::new(name).with_target(target);
    if let Some(category) = category {
        session.store.add_category(&space_id, &category).await?;
        item = item.with_category(category);
    }

    let id = session
        .store
        .add_item(&space_id, item)
        .await
        .context("Failed to add item")?;

    output.success(&format!("Added item: {}", id));
    if output.is_quiet() {
        println!("{}", id);
    }
    Ok(())
}

/// List items of a space
pub async fn list(session: &Session, space: Option<String>, archived: bool, output: &Output) -> Result<()> {
    let space_id = session.resolve_space(space.as_deref()).await?;
    let state = session.store.lock().await;
    let Some(space) = state.space(&space_id) else {
        bail!("No space with id '{}'", space_id);
    };

    if archived {
        output.print_items(&space.archived_items);
    } else {
        output.print_items(&space.items);
    }
    Ok(())
}

/// Set the collected count of an item
pub async fn progress(
    session: &Session,
    space: Option<String>,
    item: String,
    count: u32,
    output: &Output,
) -> Result<()> {
    let space_id = session.resolve_space(space.as_deref()).await?;
    let item_id = session.resolve_item(&space_id, &item).await?;

    session
        .store
        .set_item_progress(&space_id, item_id, count)
        .await
        .context("Failed to update item")?;

    output.success(&format!("Progress of {} set to {}", &item_id.to_string()[..8], count));
    Ok(())
}

/// Record one more collected unit of an item
pub async fn collect(session: &Session, space: Option<String>, item: String, output: &Output) -> Result<()> {
    let space_id = session.resolve_space(space.as_deref()).await?;
    let item_id = session.resolve_item(&space_id, &item).await?;

    let current = {
        let state = session.store.lock().await;
        state
            .space(&space_id)
            .and_then(|space| space.item(item_id))
            .map(|item| (item.progress, item.target))
    };
    let Some((progress, target)) = current else {
        bail!("No item found matching: {}", item);
    };

    session
        .store
        .set_item_progress(&space_id, item_id, progress.saturating_add(1))
        .await
        .context("Failed to update item")?;

    output.success(&format!("{}/{} collected", progress.saturating_add(1), target));
    Ok(())
}

/// Move an item to the archive
pub async fn archive(session: &Session, space: Option<String>, item: String, output: &Output) -> Result<()> {
    let space_id = session.resolve_space(space.as_deref()).await?;
    let item_id = session.resolve_item(&space_id, &item).await?;

    session
        .store
        .archive_item(&space_id, item_id)
        .await
        .context("Failed to archive item")?;

    output.success(&format!("Archived item: {}", item_id));
    Ok(())
}
