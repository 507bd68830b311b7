//! Sync progress and results
//!
//! Every coordinator operation walks through a fixed list of phases and
//! reports them as [`SyncEvent`]s; the final result is a [`SyncOutcome`].

use std::fmt;

/// A mutating project operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    /// LOCAL → SYNCED
    Publish,
    /// SYNCED → LOCAL
    Unpublish,
    /// REMOTE → SYNCED
    Download,
    /// SYNCED → SYNCED, or a first upload of a LOCAL project
    Sync,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOperation::Publish => "publish",
            SyncOperation::Unpublish => "unpublish",
            SyncOperation::Download => "download",
            SyncOperation::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// Step of an operation in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Loading corpora from the project database
    HydratingCorpora,
    /// Sending project and corpus metadata
    SendingProject,
    /// Sending word changes
    SendingTokens,
    /// Draining the change journal
    SendingJournal,
    /// Pulling the authoritative link set back
    FetchingLinks,
    /// Publishing the project state
    PublishingState,
    /// Deleting the remote copy
    RemovingRemote,
    RetrievingProject,
    RetrievingTokens,
    /// Grouping downloaded tokens into corpora
    FormattingResponse,
    /// Writing downloaded data locally
    Updating,
    /// Undoing the partial effects of a failed operation
    RollingBack,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncPhase::HydratingCorpora => "Loading corpora",
            SyncPhase::SendingProject => "Sending project",
            SyncPhase::SendingTokens => "Sending tokens",
            SyncPhase::SendingJournal => "Sending alignment changes",
            SyncPhase::FetchingLinks => "Fetching alignment links",
            SyncPhase::PublishingState => "Publishing project state",
            SyncPhase::RemovingRemote => "Removing project from server",
            SyncPhase::RetrievingProject => "Retrieving project from server",
            SyncPhase::RetrievingTokens => "Retrieving tokens from server",
            SyncPhase::FormattingResponse => "Preparing to update the local database",
            SyncPhase::Updating => "Updating the local database",
            SyncPhase::RollingBack => "Rolling back",
        };
        f.write_str(text)
    }
}

/// Events emitted by the sync coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started {
        project_id: String,
        operation: SyncOperation,
    },
    PhaseChanged {
        project_id: String,
        phase: SyncPhase,
    },
    /// Items of the current phase sent or processed so far
    Progress {
        project_id: String,
        phase: SyncPhase,
        done: usize,
        total: usize,
    },
    Finished {
        project_id: String,
        operation: SyncOperation,
    },
    Cancelled {
        project_id: String,
        operation: SyncOperation,
    },
    Error {
        project_id: String,
        message: String,
    },
}

/// What a completed operation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub project_id: String,
    pub tokens_sent: usize,
    pub journal_entries_sent: usize,
    /// Requests used to drain the journal
    pub journal_units_sent: usize,
    pub tokens_received: usize,
    pub links_received: usize,
    /// Local links added, changed or removed by pulling the remote set
    pub links_changed: usize,
}

/// Result of a coordinator operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Nothing to do; no request was made
    Skipped,
    /// Stopped through the cancellation token; local state was restored
    Cancelled,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncOutcome::Cancelled)
    }
}

/// Result of refreshing the registry from the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRefresh {
    /// Server projects registered as REMOTE
    pub added: usize,
    /// Known projects whose server timestamps were updated
    pub updated: usize,
    /// SYNCED projects that vanished remotely and became LOCAL
    pub reverted: usize,
    /// REMOTE projects that vanished and were unregistered
    pub dropped: usize,
}
