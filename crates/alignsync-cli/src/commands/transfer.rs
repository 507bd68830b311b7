//! Alignment file import and export

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;

use alignsync_core::{check_alignment_file, AlignmentFile, Config};

use super::project::{open_workspace, resolve_id};
use crate::output::{Output, OutputFormat};

/// Import the valid records of an alignment file as links
pub fn import(
    config: Config,
    project: &str,
    file: &Path,
    max_errors: usize,
    dry_run: bool,
    output: &Output,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read alignment file: {:?}", file))?;
    let check = check_alignment_file(&content, max_errors);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "isFileValid": check.is_file_valid,
                    "errorMessages": check.error_messages,
                    "submittedLinks": check.submitted_links,
                    "acceptedLinks": check.accepted_links,
                    "rejectedLinks": check.rejected_links,
                    "type": check.file_type,
                    "creator": check.creator,
                })
            );
        }
        OutputFormat::Human => {
            println!(
                "{} record(s): {} accepted, {} rejected",
                check.submitted_links, check.accepted_links, check.rejected_links
            );
            for message in &check.error_messages {
                println!("  ! {}", message);
            }
        }
        OutputFormat::Quiet => {}
    }

    if check.links.is_empty() {
        bail!("No importable links in {:?}", file);
    }
    if dry_run {
        return Ok(());
    }

    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let imported = workspace
        .import_links(&id, &check.links)
        .context("Failed to import links")?;

    output.success(&format!("Imported {} link(s) into {}", imported, id));
    Ok(())
}

/// Write every link of a project as an alignment file
pub fn export(config: Config, project: &str, path: Option<&Path>, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, project)?;
    let links = workspace.database(&id)?.links().all_links()?;
    let content = AlignmentFile::from_links(&links)
        .to_json_pretty()
        .context("Failed to serialize alignment file")?;

    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write alignment file: {:?}", path))?;
            output.success(&format!("Exported {} link(s) to {}", links.len(), path.display()));
        }
        None => println!("{}", content),
    }
    Ok(())
}
