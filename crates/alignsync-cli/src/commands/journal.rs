//! Journal command handler

use anyhow::Result;

use alignsync_core::Config;

use super::project::{open_workspace, resolve_id};
use crate::output::Output;

/// Show the oldest pending journal entries of a project
pub fn show(config: Config, project: &str, limit: usize, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    if !workspace.has_local_data(&id) {
        output.message("Project has no local data.");
        return Ok(());
    }

    let db = workspace.database(&id)?;
    let journal = db.journal();
    let total = journal.count()?;
    let entries = journal.entries(limit, 0)?;

    output.print_journal(total, &entries);
    Ok(())
}
