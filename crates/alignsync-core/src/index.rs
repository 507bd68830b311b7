//! Pivot-word (concordance) index
//!
//! Aggregates, for one side of the alignment, every distinct normalized word
//! text with its corpus frequency and the number of links using it. The
//! index is fed by committed link changes and maintained on a background
//! task:
//!
//! - `on_change` only enqueues; it never blocks the writer
//! - tasks run one at a time in the order they were enqueued
//! - [`PivotWordIndex::is_loading`] is true while any task is pending
//!
//! Rejected links contribute nothing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::models::{normalize_text, AlignmentSide, Corpus, Language, Link, LinkStatus};
use crate::storage::{LinkChangeListener, LinkEvent, LinkEventKind};

/// One distinct word text of a side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotWord {
    pub normalized_text: String,
    pub side: AlignmentSide,
    pub language: Language,
    /// Occurrences in the side's corpora
    pub frequency: usize,
    /// Non-rejected links that include the text on this side
    pub aligned_links: usize,
}

/// Ordering of [`PivotWordIndex::pivot_words`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PivotWordSort {
    #[default]
    Text,
    /// Most frequent first
    Frequency,
    /// Most aligned first
    AlignedLinks,
}

#[derive(Default)]
struct IndexState {
    /// word key -> normalized text
    words: HashMap<String, String>,
    pivot_words: HashMap<String, PivotWord>,
    link_texts: HashMap<String, Vec<String>>,
}

impl IndexState {
    fn from_corpora(side: AlignmentSide, corpora: &[Corpus]) -> Self {
        let mut state = IndexState::default();
        for corpus in corpora.iter().filter(|c| c.side == side) {
            for word in &corpus.words {
                let text = word.normalized_text();
                if text.is_empty() {
                    continue;
                }
                state.words.insert(word.key(), text.clone());
                state
                    .pivot_words
                    .entry(text.clone())
                    .or_insert_with(|| PivotWord {
                        normalized_text: text,
                        side,
                        language: corpus.language.clone(),
                        frequency: 0,
                        aligned_links: 0,
                    })
                    .frequency += 1;
            }
        }
        state
    }

    fn apply(&mut self, side: AlignmentSide, event: &LinkEvent) {
        self.retract(&event.link.id);
        if event.kind == LinkEventKind::Remove || event.link.meta.status == LinkStatus::Rejected {
            return;
        }

        let mut seen = HashSet::new();
        let texts: Vec<String> = event
            .link
            .members(side)
            .iter()
            .filter_map(|r| self.words.get(&crate::models::word_key(side, r)))
            .filter(|text| seen.insert(text.as_str()))
            .cloned()
            .collect();

        for text in &texts {
            if let Some(pivot) = self.pivot_words.get_mut(text) {
                pivot.aligned_links += 1;
            }
        }
        if !texts.is_empty() {
            self.link_texts.insert(event.link.id.clone(), texts);
        }
    }

    fn retract(&mut self, link_id: &str) {
        if let Some(texts) = self.link_texts.remove(link_id) {
            for text in texts {
                if let Some(pivot) = self.pivot_words.get_mut(&text) {
                    pivot.aligned_links = pivot.aligned_links.saturating_sub(1);
                }
            }
        }
    }
}

enum IndexTask {
    Change(LinkEvent),
    Reset(IndexState),
}

/// Incrementally maintained pivot-word index of one side
pub struct PivotWordIndex {
    side: AlignmentSide,
    state: Arc<RwLock<IndexState>>,
    tasks: mpsc::UnboundedSender<IndexTask>,
    pending: Arc<watch::Sender<usize>>,
}

impl PivotWordIndex {
    /// Build the word lookup from `corpora` and start the worker task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(side: AlignmentSide, corpora: &[Corpus]) -> Arc<Self> {
        let state = Arc::new(RwLock::new(IndexState::from_corpora(side, corpora)));
        let (tasks, mut rx) = mpsc::unbounded_channel::<IndexTask>();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        let worker_state = state.clone();
        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                {
                    let mut state = write(&worker_state);
                    match task {
                        IndexTask::Change(event) => {
                            trace!(link = %event.link.id, kind = ?event.kind, "Indexing link");
                            state.apply(side, &event);
                        }
                        IndexTask::Reset(fresh) => *state = fresh,
                    }
                }
                worker_pending.send_modify(|n| *n = n.saturating_sub(1));
            }
            debug!(side = %side, "Pivot word index worker stopped");
        });

        Arc::new(Self {
            side,
            state,
            tasks,
            pending,
        })
    }

    pub fn side(&self) -> AlignmentSide {
        self.side
    }

    /// Queue the contribution of existing links
    pub fn seed(&self, links: &[Link]) {
        for link in links {
            self.enqueue(IndexTask::Change(LinkEvent {
                kind: LinkEventKind::Save,
                link: link.clone(),
            }));
        }
    }

    /// Queue a rebuild of the word lookup from new corpus content
    ///
    /// Link contributions are dropped; seed again afterwards.
    pub fn reset(&self, corpora: &[Corpus]) {
        self.enqueue(IndexTask::Reset(IndexState::from_corpora(self.side, corpora)));
    }

    /// True while any queued task is pending or running
    pub fn is_loading(&self) -> bool {
        *self.pending.borrow() > 0
    }

    /// Wait until every queued task has run
    pub async fn wait_until_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Snapshot of every pivot word
    pub fn pivot_words(&self, sort: PivotWordSort) -> Vec<PivotWord> {
        let mut words: Vec<PivotWord> = read(&self.state).pivot_words.values().cloned().collect();
        sort_pivot_words(&mut words, sort);
        words
    }

    /// Snapshot of pivot words used by at least one link
    pub fn aligned_pivot_words(&self, sort: PivotWordSort) -> Vec<PivotWord> {
        let mut words: Vec<PivotWord> = read(&self.state)
            .pivot_words
            .values()
            .filter(|p| p.aligned_links > 0)
            .cloned()
            .collect();
        sort_pivot_words(&mut words, sort);
        words
    }

    /// Look up one pivot word; the text is normalized first
    pub fn pivot_word(&self, text: &str) -> Option<PivotWord> {
        read(&self.state).pivot_words.get(&normalize_text(text)).cloned()
    }

    /// Normalized texts a link currently contributes
    pub fn link_texts(&self, link_id: &str) -> Option<Vec<String>> {
        read(&self.state).link_texts.get(link_id).cloned()
    }

    fn enqueue(&self, task: IndexTask) {
        self.pending.send_modify(|n| *n += 1);
        if self.tasks.send(task).is_err() {
            // Worker is gone (runtime shut down); nothing will drain the count
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

impl LinkChangeListener for PivotWordIndex {
    fn on_change(&self, event: LinkEvent) {
        self.enqueue(IndexTask::Change(event));
    }
}

fn sort_pivot_words(words: &mut [PivotWord], sort: PivotWordSort) {
    match sort {
        PivotWordSort::Text => words.sort_by(|a, b| a.normalized_text.cmp(&b.normalized_text)),
        PivotWordSort::Frequency => words.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.normalized_text.cmp(&b.normalized_text))
        }),
        PivotWordSort::AlignedLinks => words.sort_by(|a, b| {
            b.aligned_links
                .cmp(&a.aligned_links)
                .then_with(|| a.normalized_text.cmp(&b.normalized_text))
        }),
    }
}

fn read(state: &RwLock<IndexState>) -> RwLockReadGuard<'_, IndexState> {
    state.read().unwrap_or_else(|e| e.into_inner())
}

fn write(state: &RwLock<IndexState>) -> RwLockWriteGuard<'_, IndexState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}
