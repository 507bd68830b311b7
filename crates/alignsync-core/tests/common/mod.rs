//! In-memory remote service for sync tests
//!
//! Keeps projects, tokens and links the way the real service would, applies
//! uploaded journal entries and records every call. Failures, delays and
//! cancellation can be injected per test.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alignsync_core::journal::JournalEntryType;
use alignsync_core::models::{now_millis, AlignmentSide, Corpus, Language, Link, ProjectState, Word};
use alignsync_core::sync::{JournalEntryDto, JournalPayload, ProjectDto, RemoteService, TokenDto};
use alignsync_core::{Config, Error, Reference, Result, Workspace};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Permission,
}

#[derive(Debug, Clone, Default)]
pub struct ServerProject {
    pub dto: Option<ProjectDto>,
    /// (side, token id) -> token
    pub tokens: BTreeMap<(String, String), TokenDto>,
    pub links: BTreeMap<String, Link>,
}

#[derive(Default)]
struct MockState {
    projects: BTreeMap<String, ServerProject>,
    calls: Vec<String>,
    failures: BTreeMap<String, Failure>,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
    /// Last `updatedAt` handed out; strictly increasing
    clock: i64,
}

impl MockState {
    fn tick(&mut self) -> i64 {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }
}

#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Names of the calls made so far
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every later call of `call` fail
    pub fn fail_on(&self, call: &str, failure: Failure) {
        self.state().failures.insert(call.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Cancel `token` while the `n`-th call from now is in flight
    pub fn cancel_after(&self, n: usize, token: CancellationToken) {
        let mut state = self.state();
        let target = state.calls.len() + n;
        state.cancel_after = Some((target, token));
    }

    /// Slow every call down
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn project(&self, id: &str) -> Option<ServerProject> {
        self.state().projects.get(id).cloned()
    }

    /// Drop a project behind the client's back
    pub fn forget(&self, id: &str) {
        self.state().projects.remove(id);
    }

    /// Put a complete project on the server
    pub fn seed(&self, dto: ProjectDto, tokens: Vec<TokenDto>, links: Vec<Link>) {
        let mut project = ServerProject {
            dto: Some(dto.clone()),
            ..ServerProject::default()
        };
        for token in tokens {
            project.tokens.insert((token.side.as_str().to_string(), token.id.clone()), token);
        }
        for link in links {
            project.links.insert(link.id.clone(), link);
        }
        self.state().projects.insert(dto.id, project);
    }

    async fn enter(&self, call: &str) -> Result<()> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.calls.push(call.to_string());
        let count = state.calls.len();
        if let Some((target, token)) = &state.cancel_after {
            if count >= *target {
                token.cancel();
            }
        }
        match state.failures.get(call) {
            Some(Failure::Network) => Err(Error::Network(format!("{} failed", call))),
            Some(Failure::Permission) => Err(Error::Permission(format!("{} denied", call))),
            None => Ok(()),
        }
    }

    fn with_project<T>(&self, id: &str, f: impl FnOnce(&mut ServerProject) -> T) -> Result<T> {
        let mut state = self.state();
        match state.projects.get_mut(id) {
            Some(project) if project.dto.is_some() => Ok(f(project)),
            _ => Err(Error::NotFound(format!("project '{}'", id))),
        }
    }

    /// Like `with_project`, then bumps `updatedAt` the way the service does
    /// on every write
    fn write_project<T>(&self, id: &str, f: impl FnOnce(&mut ServerProject) -> T) -> Result<T> {
        let mut state = self.state();
        let now = state.tick();
        match state.projects.get_mut(id) {
            Some(project) if project.dto.is_some() => {
                let result = f(project);
                if let Some(dto) = project.dto.as_mut() {
                    dto.updated_at = Some(now);
                }
                Ok(result)
            }
            _ => Err(Error::NotFound(format!("project '{}'", id))),
        }
    }
}

fn apply_entry(project: &mut ServerProject, entry: &JournalEntryDto) -> Result<()> {
    match entry.payload()? {
        JournalPayload::Link(link) => {
            if entry.entry_type == JournalEntryType::Delete {
                project.links.remove(&link.id);
            } else {
                project.links.insert(link.id.clone(), link);
            }
        }
        JournalPayload::Diff(diff) => {
            if let Some(link) = entry.link_id.as_ref().and_then(|id| project.links.get_mut(id)) {
                diff.apply(link);
            }
        }
        JournalPayload::Links(links) => {
            for link in links {
                project.links.insert(link.id.clone(), link);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn list_projects(&self) -> Result<Vec<ProjectDto>> {
        self.enter("list_projects").await?;
        Ok(self.state().projects.values().filter_map(|p| p.dto.clone()).collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectDto> {
        self.enter("get_project").await?;
        self.with_project(project_id, |p| p.dto.clone())?
            .ok_or_else(|| Error::NotFound(project_id.to_string()))
    }

    async fn save_project(&self, project: &ProjectDto) -> Result<ProjectDto> {
        self.enter("save_project").await?;
        let mut state = self.state();
        let mut stored = project.clone();
        stored.updated_at = Some(state.tick());
        let entry = state.projects.entry(project.id.clone()).or_default();
        entry.dto = Some(stored.clone());
        Ok(stored)
    }

    async fn get_tokens(&self, project_id: &str, side: Option<AlignmentSide>) -> Result<Vec<TokenDto>> {
        self.enter("get_tokens").await?;
        self.with_project(project_id, |p| {
            p.tokens
                .values()
                .filter(|t| side.map_or(true, |s| t.side == s))
                .cloned()
                .collect()
        })
    }

    async fn save_tokens(&self, project_id: &str, tokens: &[TokenDto]) -> Result<()> {
        self.enter("save_tokens").await?;
        self.write_project(project_id, |p| {
            for token in tokens {
                p.tokens
                    .insert((token.side.as_str().to_string(), token.id.clone()), token.clone());
            }
        })
    }

    async fn get_links(&self, project_id: &str) -> Result<Vec<Link>> {
        self.enter("get_links").await?;
        self.with_project(project_id, |p| p.links.values().cloned().collect())
    }

    async fn send_journal(&self, project_id: &str, entries: &[JournalEntryDto]) -> Result<()> {
        self.enter("send_journal").await?;
        self.write_project(project_id, |p| {
            entries.iter().try_for_each(|entry| apply_entry(p, entry))
        })?
    }

    async fn set_state(&self, project_id: &str, state: ProjectState) -> Result<ProjectDto> {
        self.enter("set_state").await?;
        self.write_project(project_id, |p| {
            if let Some(dto) = p.dto.as_mut() {
                dto.state = Some(state);
            }
        })?;
        self.with_project(project_id, |p| p.dto.clone())?
            .ok_or_else(|| Error::NotFound(project_id.to_string()))
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.enter("delete_project").await?;
        match self.state().projects.remove(project_id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("project '{}'", project_id))),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn config(temp: &TempDir) -> Config {
    let mut config = Config::with_data_dir(temp.path());
    config.bulk_chunk_size = 200;
    config.upload_chunk_size = 50;
    config.token_chunk_size = 120;
    config
}

pub fn workspace(temp: &TempDir) -> Workspace {
    Workspace::open(config(temp)).unwrap()
}

pub fn word_ref(i: usize) -> Reference {
    Reference::word(1, (i / 999) as u16 + 1, 1, (i % 999) as u16 + 1).unwrap()
}

pub fn corpus(id: &str, side: AlignmentSide, words: usize) -> Corpus {
    let mut corpus = Corpus::new(id, id.to_uppercase(), side, Language::new("eng"));
    corpus.words = (0..words)
        .map(|i| Word::new(word_ref(i), id, side, format!("w{}", i % 37)))
        .collect();
    corpus
}

pub fn links(count: usize) -> Vec<Link> {
    (0..count)
        .map(|i| Link::with_id(format!("link-{:05}", i), vec![word_ref(i)], vec![word_ref(i)]))
        .collect()
}
