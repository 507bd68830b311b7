//! Status command handler

use anyhow::Result;

use alignsync_core::{Config, ProjectLocation};

use super::project::open_workspace;
use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: Config, output: &Output) -> Result<()> {
    let server_url = config.server_url.clone();
    let data_dir = config.data_dir.clone();
    let mut workspace = open_workspace(config)?;
    let projects = workspace.projects()?;

    let count = |location: ProjectLocation| projects.iter().filter(|p| p.location == location).count();
    let (local, synced, remote) = (
        count(ProjectLocation::Local),
        count(ProjectLocation::Synced),
        count(ProjectLocation::Remote),
    );

    let mut pending = 0;
    let mut needs_sync = 0;
    for project in &projects {
        if project.location == ProjectLocation::Remote || !workspace.has_local_data(&project.id) {
            continue;
        }
        pending += workspace.database(&project.id)?.journal().count()?;
        if project.location == ProjectLocation::Synced
            && workspace.hydrated_project(&project.id)?.is_sync_eligible()
        {
            needs_sync += 1;
        }
    }

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": data_dir,
                    "server_url": server_url,
                    "projects": {
                        "local": local,
                        "synced": synced,
                        "remote": remote,
                        "needs_sync": needs_sync
                    },
                    "pending_changes": pending
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("alignsync Status");
            println!("================");
            println!();
            println!("Server:");
            println!("  URL: {}", server_url.as_deref().unwrap_or("(not set)"));
            println!();
            println!("Storage:");
            println!("  Location: {}", data_dir.display());
            println!();
            println!("Projects:");
            println!("  Local:  {}", local);
            println!("  Synced: {} ({} with changes)", synced, needs_sync);
            println!("  Remote: {}", remote);
            println!();
            println!("Pending changes: {}", pending);
        }
    }

    Ok(())
}
