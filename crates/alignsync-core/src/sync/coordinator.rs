//! Sync coordinator
//!
//! Orchestrates project-level transfers against a [`RemoteService`] and
//! owns the project location state machine:
//!
//! ```text
//! LOCAL ──publish/sync──▶ SYNCED ◀──download── REMOTE
//!   ▲                       │
//!   └──────unpublish────────┘
//! ```
//!
//! LOCAL and REMOTE never move into each other directly.
//!
//! Every operation runs as a list of phases. The workspace lock is held for
//! local steps only, never across a request. Requests are raced against the
//! caller's cancellation token, which is also checked before and after each
//! one. When a step fails or the token fires, the attempt is rolled back:
//! a remote copy created by the attempt is deleted, a remote copy deleted by
//! it is republished, local data it created is removed and the registry
//! entry and corpus sync flags are restored.
//!
//! Journal entries are deleted as soon as the unit carrying them is
//! acknowledged, so an interrupted sync resumes where it stopped without
//! resending acknowledged changes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::RemoteService;
use super::dto::{JournalEntryDto, ProjectDto, TokenDto};
use super::state::{RemoteRefresh, SyncEvent, SyncOperation, SyncOutcome, SyncPhase, SyncReport};
use crate::error::{Error, Result};
use crate::models::{now_millis, AlignmentSide, Corpus, Project, ProjectLocation, ProjectState, Word};
use crate::workspace::Workspace;

/// Coordinates sync, publish and download of projects
pub struct SyncCoordinator {
    workspace: Arc<Mutex<Workspace>>,
    remote: Arc<dyn RemoteService>,
    busy: Arc<StdMutex<HashSet<String>>>,
    upload_chunk_size: usize,
    token_chunk_size: usize,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
}

/// Marks a project busy until dropped
struct BusyGuard {
    busy: Arc<StdMutex<HashSet<String>>>,
    project_id: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        lock_busy(&self.busy).remove(&self.project_id);
    }
}

fn lock_busy(busy: &StdMutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What an attempt changed so far, for rolling it back
struct Attempt {
    project_id: String,
    operation: SyncOperation,
    started_at: i64,
    /// Registry entry before the attempt; `None` if it was not registered
    snapshot: Option<Project>,
    /// Corpora flagged `updated_since_sync` before the attempt
    flagged: Vec<String>,
    /// The attempt created the remote copy
    remote_created: bool,
    /// The attempt deleted this remote copy
    remote_deleted: Option<ProjectDto>,
    /// The attempt created the local database
    local_created: bool,
    report: SyncReport,
}

impl Attempt {
    fn new(project_id: &str, operation: SyncOperation, snapshot: Option<Project>) -> Self {
        let flagged = snapshot
            .iter()
            .flat_map(|p| p.corpora.iter())
            .filter(|c| c.updated_since_sync)
            .map(|c| c.id.clone())
            .collect();
        Self {
            project_id: project_id.to_string(),
            operation,
            started_at: now_millis(),
            snapshot,
            flagged,
            remote_created: false,
            remote_deleted: None,
            local_created: false,
            report: SyncReport {
                project_id: project_id.to_string(),
                ..SyncReport::default()
            },
        }
    }
}

impl SyncCoordinator {
    /// Take ownership of the workspace and talk to `remote`
    pub fn new(workspace: Workspace, remote: Arc<dyn RemoteService>) -> Self {
        let upload_chunk_size = workspace.config().upload_chunk_size.max(1);
        let token_chunk_size = workspace.config().token_chunk_size.max(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            workspace: Arc::new(Mutex::new(workspace)),
            remote,
            busy: Arc::new(StdMutex::new(HashSet::new())),
            upload_chunk_size,
            token_chunk_size,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Shared handle to the workspace
    pub fn workspace(&self) -> Arc<Mutex<Workspace>> {
        self.workspace.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Whether a sync/publish/download of the project is running
    pub fn is_busy(&self, project_id: &str) -> bool {
        lock_busy(&self.busy).contains(project_id)
    }

    /// Whether a sync of the project would have anything to do
    pub async fn is_sync_eligible(&self, project_id: &str) -> Result<bool> {
        let mut workspace = self.workspace.lock().await;
        Ok(workspace.hydrated_project(project_id)?.is_sync_eligible())
    }

    // ==================== Sync ====================

    /// Upload local changes and adopt the server's link set
    ///
    /// A LOCAL project gets its first upload and becomes SYNCED. A SYNCED
    /// project that is not eligible is skipped without any request. Every
    /// completed sync leaves the project PUBLISHED on the server.
    pub async fn sync(&self, project_id: &str, cancel: CancellationToken) -> Result<SyncOutcome> {
        let _guard = self.acquire(project_id)?;

        let project = self.workspace.lock().await.hydrated_project(project_id)?;
        match project.location {
            ProjectLocation::Remote => {
                return Err(Error::InvalidTransition {
                    from: ProjectLocation::Remote,
                    to: ProjectLocation::Synced,
                })
            }
            ProjectLocation::Synced if !project.is_sync_eligible() => {
                debug!(project = project_id, "Nothing to sync");
                return Ok(SyncOutcome::Skipped);
            }
            _ => {}
        }

        let mut attempt = Attempt::new(project_id, SyncOperation::Sync, Some(project));
        self.started(&attempt);
        let result = self.upload(&mut attempt, ProjectState::Published, &cancel).await;
        self.finish(attempt, result).await
    }

    // ==================== Publish ====================

    /// Move a project between LOCAL and SYNCED
    ///
    /// LOCAL → SYNCED uploads the whole project and publishes it.
    /// SYNCED → LOCAL deletes the remote copy and forgets the last sync.
    pub async fn publish(
        &self,
        project_id: &str,
        target: ProjectLocation,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome> {
        let _guard = self.acquire(project_id)?;

        let project = self.workspace.lock().await.hydrated_project(project_id)?;
        if project.location == target {
            return Ok(SyncOutcome::Skipped);
        }
        match (project.location, target) {
            (ProjectLocation::Local, ProjectLocation::Synced) => {
                let mut attempt = Attempt::new(project_id, SyncOperation::Publish, Some(project));
                self.started(&attempt);
                let result = self.upload(&mut attempt, ProjectState::Published, &cancel).await;
                self.finish(attempt, result).await
            }
            (ProjectLocation::Synced, ProjectLocation::Local) => {
                let mut attempt = Attempt::new(project_id, SyncOperation::Unpublish, Some(project));
                self.started(&attempt);
                let result = self.unpublish(&mut attempt, &cancel).await;
                self.finish(attempt, result).await
            }
            (from, to) => Err(Error::InvalidTransition { from, to }),
        }
    }

    /// Phases shared by sync and publish
    async fn upload(
        &self,
        attempt: &mut Attempt,
        state: ProjectState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = attempt.project_id.clone();

        self.phase(&id, SyncPhase::HydratingCorpora);
        let (project, words) = {
            let mut workspace = self.workspace.lock().await;
            let project = workspace.hydrated_project(&id)?;
            let first_upload = project.location == ProjectLocation::Local;
            let db = workspace.database(&id)?;
            let words = if first_upload {
                let links = db.links().all_links()?;
                let chunks = db.journal().rebase(&links)?;
                debug!(project = %id, links = links.len(), chunks, "Prepared first upload");
                db.corpora().all_words()?
            } else {
                db.corpora().flagged_words()?
            };
            (project, words)
        };
        let first_upload = project.location == ProjectLocation::Local;

        self.phase(&id, SyncPhase::SendingProject);
        let saved = guarded(
            cancel,
            self.remote.save_project(&ProjectDto::from_project(&project, state)),
        )
        .await?;
        attempt.remote_created = first_upload;

        self.phase(&id, SyncPhase::SendingTokens);
        let total = words.len();
        for chunk in words.chunks(self.token_chunk_size) {
            let tokens: Vec<TokenDto> = chunk.iter().map(TokenDto::from).collect();
            guarded(cancel, self.remote.save_tokens(&id, &tokens)).await?;
            attempt.report.tokens_sent += tokens.len();
            self.progress(&id, SyncPhase::SendingTokens, attempt.report.tokens_sent, total);
        }

        self.phase(&id, SyncPhase::SendingJournal);
        self.drain_journal(attempt, cancel).await?;

        if !first_upload {
            self.phase(&id, SyncPhase::FetchingLinks);
            let links = guarded(cancel, self.remote.get_links(&id)).await?;
            let summary = {
                let mut workspace = self.workspace.lock().await;
                workspace.database(&id)?.links().replace_all(&links)?
            };
            attempt.report.links_received = links.len();
            attempt.report.links_changed = summary.changed + summary.removed;
        }

        self.phase(&id, SyncPhase::PublishingState);
        let published = guarded(cancel, self.remote.set_state(&id, state)).await?;

        let mut workspace = self.workspace.lock().await;
        let mut project = workspace.project(&id)?;
        // Publishing bumps the server's updatedAt, so it must come from the
        // state response
        let server_time = published
            .updated_at
            .or(saved.updated_at)
            .unwrap_or(attempt.started_at);
        project.location = ProjectLocation::Synced;
        project.server_state = Some(state);
        project.last_sync_time = attempt.started_at.max(project.last_sync_time);
        project.server_updated_at = server_time;
        project.last_sync_server_time = server_time;
        workspace.database(&id)?.corpora().clear_sync_flags()?;
        workspace.update_project(&project)?;
        Ok(())
    }

    /// Send the journal oldest first, one bounded unit per request
    async fn drain_journal(&self, attempt: &mut Attempt, cancel: &CancellationToken) -> Result<()> {
        let id = attempt.project_id.clone();
        let total = self.workspace.lock().await.database(&id)?.journal().count()?;

        loop {
            let (ids, unit) = {
                let mut workspace = self.workspace.lock().await;
                let db = workspace.database(&id)?;
                let journal = db.journal();
                let entries = journal.first_upload_chunk(self.upload_chunk_size)?;
                let mut unit = Vec::with_capacity(entries.len());
                for entry in &entries {
                    let chunk = if entry.is_bulk() {
                        Some(journal.load_chunk(entry)?)
                    } else {
                        None
                    };
                    unit.push(JournalEntryDto::from_entry(entry, chunk.as_deref())?);
                }
                let ids: Vec<String> = entries.into_iter().map(|e| e.id).collect();
                (ids, unit)
            };
            if unit.is_empty() {
                return Ok(());
            }

            guarded(cancel, self.remote.send_journal(&id, &unit)).await?;

            self.workspace.lock().await.database(&id)?.journal().delete(&ids)?;
            attempt.report.journal_entries_sent += ids.len();
            attempt.report.journal_units_sent += 1;
            self.progress(
                &id,
                SyncPhase::SendingJournal,
                attempt.report.journal_entries_sent,
                total,
            );
        }
    }

    async fn unpublish(&self, attempt: &mut Attempt, cancel: &CancellationToken) -> Result<()> {
        let id = attempt.project_id.clone();
        let project = self.workspace.lock().await.hydrated_project(&id)?;
        let republish = ProjectDto::from_project(&project, project.server_state.unwrap_or_default());

        self.phase(&id, SyncPhase::RemovingRemote);
        guarded(cancel, self.remote.delete_project(&id)).await?;
        attempt.remote_deleted = Some(republish);

        let workspace = self.workspace.lock().await;
        let mut project = workspace.project(&id)?;
        project.location = ProjectLocation::Local;
        project.server_state = None;
        project.last_sync_time = 0;
        project.server_updated_at = 0;
        project.last_sync_server_time = 0;
        workspace.update_project(&project)?;
        Ok(())
    }

    // ==================== Download ====================

    /// Fetch a project from the server and store it locally as SYNCED
    ///
    /// Projects with unsent journal entries are refused; sync them first.
    pub async fn download(&self, project_id: &str, cancel: CancellationToken) -> Result<SyncOutcome> {
        let _guard = self.acquire(project_id)?;

        let mut attempt = {
            let mut workspace = self.workspace.lock().await;
            let snapshot = match workspace.registry().get(project_id)? {
                Some(project) if project.location == ProjectLocation::Local => {
                    return Err(Error::InvalidTransition {
                        from: ProjectLocation::Local,
                        to: ProjectLocation::Synced,
                    })
                }
                Some(_) => Some(workspace.hydrated_project(project_id)?),
                None => None,
            };
            if workspace.has_local_data(project_id) {
                let pending = workspace.database(project_id)?.journal().count()?;
                if pending > 0 {
                    return Err(Error::validation(format!(
                        "project '{}' has {} unsent changes; sync it before downloading",
                        project_id, pending
                    )));
                }
            }
            let mut attempt = Attempt::new(project_id, SyncOperation::Download, snapshot);
            attempt.local_created = !workspace.has_local_data(project_id);
            attempt
        };

        self.started(&attempt);
        let result = self.fetch(&mut attempt, &cancel).await;
        self.finish(attempt, result).await
    }

    async fn fetch(&self, attempt: &mut Attempt, cancel: &CancellationToken) -> Result<()> {
        let id = attempt.project_id.clone();

        self.phase(&id, SyncPhase::RetrievingProject);
        let dto = guarded(cancel, self.remote.get_project(&id)).await?;

        self.phase(&id, SyncPhase::RetrievingTokens);
        let mut tokens = Vec::new();
        for side in AlignmentSide::ALL {
            tokens.extend(guarded(cancel, self.remote.get_tokens(&id, Some(side))).await?);
        }
        attempt.report.tokens_received = tokens.len();

        self.phase(&id, SyncPhase::FormattingResponse);
        let mut corpora: Vec<Corpus> = dto.corpora.iter().cloned().map(|c| c.into_corpus()).collect();
        self.append_tokens(&id, &mut corpora, tokens, cancel).await?;

        self.phase(&id, SyncPhase::FetchingLinks);
        let links = guarded(cancel, self.remote.get_links(&id)).await?;
        attempt.report.links_received = links.len();

        self.phase(&id, SyncPhase::Updating);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut workspace = self.workspace.lock().await;
        workspace.database(&id)?.import_snapshot(&corpora, &links)?;

        let now = now_millis();
        let server_time = dto.updated_at.unwrap_or(now);
        let mut project = dto.into_project(ProjectLocation::Synced);
        if let Some(previous) = &attempt.snapshot {
            project.created_at = previous.created_at;
        }
        project.updated_at = now;
        project.last_sync_time = now;
        project.server_updated_at = server_time;
        project.last_sync_server_time = server_time;
        workspace.update_project(&project)?;
        Ok(())
    }

    /// Group tokens into their corpora, a bounded chunk at a time
    async fn append_tokens(
        &self,
        project_id: &str,
        corpora: &mut [Corpus],
        tokens: Vec<TokenDto>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let positions: HashMap<String, usize> = corpora
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        let mut seen: HashSet<String> = HashSet::new();
        let total = tokens.len();
        let mut done = 0;
        let mut orphans = 0;

        let mut tokens = tokens.into_iter().peekable();
        while tokens.peek().is_some() {
            for token in tokens.by_ref().take(self.token_chunk_size) {
                done += 1;
                let Some(&position) = positions.get(&token.corpus_id) else {
                    orphans += 1;
                    continue;
                };
                let word = Word::try_from(token)?;
                if seen.insert(word.key()) {
                    corpora[position].words.push(word);
                }
            }
            self.progress(project_id, SyncPhase::FormattingResponse, done, total);
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::task::yield_now().await;
        }

        if orphans > 0 {
            warn!(project = project_id, orphans, "Skipped tokens of unknown corpora");
        }
        for corpus in corpora.iter_mut() {
            corpus.words.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Ok(())
    }

    // ==================== Registry refresh ====================

    /// Reconcile the registry with the server's project list
    ///
    /// Unknown server projects are registered as REMOTE. SYNCED projects
    /// missing from the server become LOCAL and REMOTE ones are dropped.
    /// LOCAL projects only become SYNCED through publish or sync, and busy
    /// projects are left alone.
    pub async fn refresh_remote_projects(&self) -> Result<RemoteRefresh> {
        let remote_projects = self.remote.list_projects().await?;
        let busy = lock_busy(&self.busy).clone();

        let workspace = self.workspace.lock().await;
        let mut refresh = RemoteRefresh::default();
        let mut seen = HashSet::new();

        for dto in remote_projects {
            seen.insert(dto.id.clone());
            if busy.contains(&dto.id) {
                continue;
            }
            match workspace.registry().get(&dto.id)? {
                Some(project) if project.location == ProjectLocation::Local => {
                    debug!(project = %project.id, "Local project also exists remotely; left as is");
                }
                Some(mut project) => {
                    if let Some(updated_at) = dto.updated_at {
                        project.server_updated_at = updated_at;
                    }
                    if dto.state.is_some() {
                        project.server_state = dto.state;
                    }
                    if project.location == ProjectLocation::Remote {
                        project.name = dto.name;
                        project.members = dto.members;
                    }
                    workspace.update_project(&project)?;
                    refresh.updated += 1;
                }
                None => {
                    let mut project = dto.into_project(ProjectLocation::Remote);
                    project.corpora.clear();
                    workspace.update_project(&project)?;
                    refresh.added += 1;
                }
            }
        }

        for mut project in workspace.projects()? {
            if seen.contains(&project.id) || busy.contains(&project.id) {
                continue;
            }
            match project.location {
                ProjectLocation::Synced => {
                    project.location = ProjectLocation::Local;
                    project.server_state = None;
                    project.last_sync_time = 0;
                    project.server_updated_at = 0;
                    project.last_sync_server_time = 0;
                    workspace.update_project(&project)?;
                    refresh.reverted += 1;
                }
                ProjectLocation::Remote => {
                    workspace.registry().remove(&project.id)?;
                    refresh.dropped += 1;
                }
                ProjectLocation::Local => {}
            }
        }

        info!(
            added = refresh.added,
            updated = refresh.updated,
            reverted = refresh.reverted,
            dropped = refresh.dropped,
            "Refreshed remote projects"
        );
        Ok(refresh)
    }

    // ==================== Internals ====================

    fn acquire(&self, project_id: &str) -> Result<BusyGuard> {
        let mut busy = lock_busy(&self.busy);
        if !busy.insert(project_id.to_string()) {
            return Err(Error::Busy(project_id.to_string()));
        }
        Ok(BusyGuard {
            busy: self.busy.clone(),
            project_id: project_id.to_string(),
        })
    }

    async fn finish(&self, attempt: Attempt, result: Result<()>) -> Result<SyncOutcome> {
        let id = attempt.project_id.clone();
        let operation = attempt.operation;
        match result {
            Ok(()) => {
                info!(project = %id, %operation, report = ?attempt.report, "Operation finished");
                self.emit(SyncEvent::Finished {
                    project_id: id,
                    operation,
                });
                Ok(SyncOutcome::Completed(attempt.report))
            }
            Err(error) => {
                self.roll_back(&attempt).await;
                if matches!(error, Error::Cancelled) {
                    info!(project = %id, %operation, "Operation cancelled");
                    self.emit(SyncEvent::Cancelled {
                        project_id: id,
                        operation,
                    });
                    Ok(SyncOutcome::Cancelled)
                } else {
                    warn!(project = %id, %operation, error = %error, "Operation failed");
                    self.emit(SyncEvent::Error {
                        project_id: id,
                        message: error.to_string(),
                    });
                    Err(error)
                }
            }
        }
    }

    /// Undo what a failed attempt changed; failures are logged
    async fn roll_back(&self, attempt: &Attempt) {
        let id = &attempt.project_id;
        self.phase(id, SyncPhase::RollingBack);

        if attempt.remote_created {
            if let Err(e) = self.remote.delete_project(id).await {
                warn!(project = %id, error = %e, "Failed to delete partially uploaded project");
            }
        }
        if let Some(dto) = &attempt.remote_deleted {
            if let Err(e) = self.remote.save_project(dto).await {
                warn!(project = %id, error = %e, "Failed to republish project");
            }
        }

        let mut workspace = self.workspace.lock().await;
        if attempt.local_created {
            if let Err(e) = workspace.destroy_local_data(id) {
                warn!(project = %id, error = %e, "Failed to remove partial download");
            }
        }

        let restored = match &attempt.snapshot {
            Some(project) => workspace.update_project(project),
            None => workspace.registry().remove(id).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(project = %id, error = %e, "Failed to restore registry entry");
        }

        if !attempt.flagged.is_empty() && workspace.has_local_data(id) {
            let flags = workspace
                .database(id)
                .and_then(|db| db.corpora().restore_sync_flags(&attempt.flagged));
            if let Err(e) = flags {
                warn!(project = %id, error = %e, "Failed to restore corpus sync flags");
            }
        }
    }

    fn started(&self, attempt: &Attempt) {
        info!(project = %attempt.project_id, operation = %attempt.operation, "Operation started");
        self.emit(SyncEvent::Started {
            project_id: attempt.project_id.clone(),
            operation: attempt.operation,
        });
    }

    fn phase(&self, project_id: &str, phase: SyncPhase) {
        debug!(project = project_id, %phase, "Phase");
        self.emit(SyncEvent::PhaseChanged {
            project_id: project_id.to_string(),
            phase,
        });
    }

    fn progress(&self, project_id: &str, phase: SyncPhase, done: usize, total: usize) {
        self.emit(SyncEvent::Progress {
            project_id: project_id.to_string(),
            phase,
            done,
            total,
        });
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Run a request unless cancelled, racing it against the token
///
/// A token that fires while the request is in flight, or right after it
/// returns, turns the result into [`Error::Cancelled`].
async fn guarded<T, F>(cancel: &CancellationToken, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = request => result,
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    result
}
