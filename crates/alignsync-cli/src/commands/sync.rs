//! Sync command handlers

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use alignsync_core::sync::SyncPhase;
use alignsync_core::{Config, HttpRemote, ProjectLocation, SyncCoordinator, SyncEvent, SyncOutcome};

use super::project::{open_workspace, resolve_id};
use crate::output::{Output, OutputFormat};

/// A coordinator connected to the configured server, with Ctrl-C
/// cancellation and progress on stderr
struct Session {
    coordinator: SyncCoordinator,
    cancel: CancellationToken,
    progress: Option<JoinHandle<()>>,
}

impl Session {
    fn connect(config: Config, output: &Output) -> Result<Self> {
        let Some(url) = config.server_url.clone() else {
            bail!(
                "Server URL not configured. Set it with:\n  \
                 alignsync config set server_url https://your-server"
            );
        };
        let remote = HttpRemote::new(&url, config.request_timeout())
            .context("Failed to create HTTP client")?;
        let workspace = open_workspace(config)?;
        let mut coordinator = SyncCoordinator::new(workspace, Arc::new(remote));

        let progress = match (output.format, coordinator.take_events()) {
            (OutputFormat::Human, Some(events)) => Some(tokio::spawn(print_progress(events))),
            _ => None,
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        Ok(Self {
            coordinator,
            cancel,
            progress,
        })
    }

    async fn resolve(&self, id: &str) -> Result<String> {
        let workspace = self.coordinator.workspace();
        let workspace = workspace.lock().await;
        resolve_id(&workspace, id)
    }

    /// Wait for pending progress output
    async fn close(self) {
        let Session {
            coordinator,
            progress,
            ..
        } = self;
        // The coordinator owns the only event sender
        drop(coordinator);
        if let Some(progress) = progress {
            let _ = progress.await;
        }
    }
}

async fn print_progress(mut events: tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) {
    let mut last_phase: Option<SyncPhase> = None;
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::PhaseChanged { phase, .. } if last_phase != Some(phase) => {
                eprintln!("  {}...", phase);
                last_phase = Some(phase);
            }
            SyncEvent::Started { project_id, operation } => {
                eprintln!("{} {}", capitalize(&operation.to_string()), project_id);
                last_phase = None;
            }
            _ => {}
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Turn an outcome into output; cancellation is an error for the shell
fn report(output: &Output, project_id: &str, done: &str, outcome: SyncOutcome) -> Result<()> {
    match outcome {
        SyncOutcome::Completed(report) => {
            output.success(&format!("{} {}", done, project_id));
            output.print_report(&report);
            Ok(())
        }
        SyncOutcome::Skipped => {
            output.message(&format!("{} - already up to date", project_id));
            Ok(())
        }
        SyncOutcome::Cancelled => {
            bail!("Cancelled; {} was restored to its previous state", project_id)
        }
    }
}

/// Sync one project, or every project with changes
pub async fn sync(config: Config, project: Option<&str>, output: &Output) -> Result<()> {
    let session = Session::connect(config, output)?;

    let result = match project {
        Some(project) => sync_one(&session, project, output).await,
        None => sync_all(&session, output).await,
    };

    session.close().await;
    result
}

async fn sync_one(session: &Session, project: &str, output: &Output) -> Result<()> {
    let id = session.resolve(project).await?;
    let outcome = session
        .coordinator
        .sync(&id, session.cancel.clone())
        .await
        .with_context(|| format!("Failed to sync {}", id))?;
    report(output, &id, "Synced", outcome)
}

async fn sync_all(session: &Session, output: &Output) -> Result<()> {
    let projects = session.coordinator.workspace().lock().await.projects()?;
    let mut failed = 0;

    for project in projects {
        if project.location != ProjectLocation::Synced {
            continue;
        }
        if session.cancel.is_cancelled() {
            break;
        }
        let result = session
            .coordinator
            .sync(&project.id, session.cancel.clone())
            .await
            .map_err(anyhow::Error::from)
            .and_then(|outcome| report(output, &project.id, "Synced", outcome));
        if let Err(e) = result {
            eprintln!("⚠ {}: {:#}", project.id, e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} project(s) failed to sync", failed);
    }
    Ok(())
}

/// Publish a local project
pub async fn publish(config: Config, project: &str, output: &Output) -> Result<()> {
    let session = Session::connect(config, output)?;
    let result = async {
        let id = session.resolve(project).await?;
        let outcome = session
            .coordinator
            .publish(&id, ProjectLocation::Synced, session.cancel.clone())
            .await
            .with_context(|| format!("Failed to publish {}", id))?;
        report(output, &id, "Published", outcome)
    }
    .await;
    session.close().await;
    result
}

/// Remove a project from the server, keeping the local copy
pub async fn unpublish(config: Config, project: &str, output: &Output) -> Result<()> {
    let session = Session::connect(config, output)?;
    let result = async {
        let id = session.resolve(project).await?;
        let outcome = session
            .coordinator
            .publish(&id, ProjectLocation::Local, session.cancel.clone())
            .await
            .with_context(|| format!("Failed to unpublish {}", id))?;
        report(output, &id, "Unpublished", outcome)
    }
    .await;
    session.close().await;
    result
}

/// Download a project, refreshing the project list first if it is unknown
pub async fn download(config: Config, project: &str, output: &Output) -> Result<()> {
    let session = Session::connect(config, output)?;
    let result = async {
        let id = match session.resolve(project).await {
            Ok(id) => id,
            Err(_) => {
                session
                    .coordinator
                    .refresh_remote_projects()
                    .await
                    .context("Failed to refresh project list")?;
                session.resolve(project).await?
            }
        };
        let outcome = session
            .coordinator
            .download(&id, session.cancel.clone())
            .await
            .with_context(|| format!("Failed to download {}", id))?;
        report(output, &id, "Downloaded", outcome)
    }
    .await;
    session.close().await;
    result
}

/// Reconcile the project list with the server
pub async fn refresh(config: Config, output: &Output) -> Result<()> {
    let session = Session::connect(config, output)?;
    let result = session
        .coordinator
        .refresh_remote_projects()
        .await
        .context("Failed to refresh project list");
    session.close().await;
    let refresh = result?;

    output.success(&format!(
        "Project list refreshed: {} new, {} updated, {} no longer on server, {} removed",
        refresh.added, refresh.updated, refresh.reverted, refresh.dropped
    ));
    Ok(())
}
