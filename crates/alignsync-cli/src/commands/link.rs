//! Link command handlers

use anyhow::{anyhow, Context, Result};

use alignsync_core::reference::RefField;
use alignsync_core::{AlignmentSide, Config, LinkStatus, Reference};

use super::project::{open_workspace, resolve_id};
use crate::output::Output;
use crate::prompt::confirm;

/// List links, a page at a time
pub fn list(config: Config, project: &str, limit: usize, offset: usize, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let links = workspace.database(&id)?.links().all(limit, offset)?;
    output.print_links(&links);
    Ok(())
}

/// Show a single link with its cached texts
pub fn show(config: Config, project: &str, link_id: &str, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let db = workspace.database(&id)?;

    let link = db
        .links()
        .get(link_id)?
        .ok_or_else(|| anyhow!("Link not found: {}", link_id))?;
    let texts = db.links().cached_texts(link_id)?;

    output.print_link(&link, texts.as_ref());
    Ok(())
}

/// Find links by word reference, or by verse for a verse-level reference
pub fn find(
    config: Config,
    project: &str,
    reference: &str,
    side: AlignmentSide,
    output: &Output,
) -> Result<()> {
    let reference = Reference::decode(reference).context("Invalid reference")?;

    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let links = workspace.database(&id)?.links();
    let found = if reference.has_fields(RefField::Word) {
        links.find_by_member(side, &reference)?
    } else {
        links.find_by_verse(side, &reference)?
    };

    output.print_links(&found);
    Ok(())
}

/// Change the status of a link
pub fn set_status(
    config: Config,
    project: &str,
    link_id: &str,
    status: LinkStatus,
    output: &Output,
) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;

    let link = workspace
        .database(&id)?
        .links()
        .get(link_id)?
        .ok_or_else(|| anyhow!("Link not found: {}", link_id))?;
    if link.meta.status == status {
        output.message(&format!("Link already {}", status.as_str()));
        return Ok(());
    }

    workspace
        .save_links(&id, &[link.with_status(status)])
        .context("Failed to update link")?;
    output.success(&format!("Link {} is now {}", link_id, status.as_str()));
    Ok(())
}

/// Delete a link
pub fn delete(config: Config, project: &str, link_id: &str, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;

    if output.should_prompt() {
        println!("Delete link: {}", link_id);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = workspace
        .remove_links(&id, &[link_id.to_string()])
        .context("Failed to delete link")?;
    if removed == 0 {
        return Err(anyhow!("Link not found: {}", link_id));
    }

    output.success(&format!("Deleted link: {}", link_id));
    Ok(())
}
