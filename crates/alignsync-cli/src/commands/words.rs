//! Pivot word (concordance) command handler

use anyhow::{Context, Result};

use alignsync_core::{AlignmentSide, Config, PivotWordSort};

use super::project::{open_workspace, resolve_id};
use crate::output::Output;

/// List the pivot words of one side of a project
pub async fn list(
    config: Config,
    project: &str,
    side: AlignmentSide,
    sort: PivotWordSort,
    aligned_only: bool,
    limit: usize,
    output: &Output,
) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let index = workspace
        .open_index(&id, side)
        .context("Failed to build pivot word index")?;
    index.wait_until_idle().await;

    let mut words = if aligned_only {
        index.aligned_pivot_words(sort)
    } else {
        index.pivot_words(sort)
    };
    words.truncate(limit);

    output.print_pivot_words(&words);
    Ok(())
}
