//! Sync with the remote alignment service
//!
//! Provides project-level synchronization against a single authoritative
//! server.
//!
//! ## Operations
//!
//! 1. **sync**: send project metadata, changed tokens and the change
//!    journal, then adopt the server's link set (last writer wins)
//! 2. **publish**: first upload of a LOCAL project, or removal of the
//!    remote copy of a SYNCED one
//! 3. **download**: fetch a REMOTE project with its tokens and links
//!
//! ## Usage
//!
//! ```ignore
//! let remote = Arc::new(HttpRemote::new(&url, config.request_timeout())?);
//! let coordinator = SyncCoordinator::new(workspace, remote);
//! coordinator.sync(&project_id, CancellationToken::new()).await?;
//! ```

mod client;
mod coordinator;
mod dto;
mod state;

pub use client::{HttpRemote, RemoteService};
pub use coordinator::SyncCoordinator;
pub use dto::{
    CorpusDto, JournalEntryDto, JournalPayload, LinksResponse, ProjectDto, TokenDto,
    TokensResponse,
};
pub use state::{RemoteRefresh, SyncEvent, SyncOperation, SyncOutcome, SyncPhase, SyncReport};
