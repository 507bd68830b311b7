//! Error taxonomy
//!
//! Every public operation of the core reports one of these kinds. Storage
//! and transport failures are converted here so that no `rusqlite` or
//! `reqwest` type crosses a component boundary.

use thiserror::Error;

use crate::models::ProjectLocation;
use crate::storage::StorageError;

/// Errors surfaced by the alignsync core
#[derive(Error, Debug)]
pub enum Error {
    /// Input was rejected before any I/O took place
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A storage write failed and was rolled back
    #[error("Transaction failed: {0}")]
    Transaction(#[from] StorageError),

    /// The remote service could not be reached or answered with a failure
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service did not answer in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The remote service refused the operation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Another mutating operation is already running for the project
    #[error("Project '{0}' already has a sync operation in progress")]
    Busy(String),

    /// A project, link or journal entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The project location state machine forbids the move
    #[error("Cannot move project from {from} to {to}")]
    InvalidTransition {
        from: ProjectLocation,
        to: ProjectLocation,
    },
}

impl Error {
    /// Build a validation error from anything printable
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Whether a caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Busy(_)
        )
    }

    /// A hint for the user on how to get past the error, if there is one
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Transaction(e) => e.recovery_suggestion(),
            Error::Network(_) | Error::Timeout(_) => {
                Some("Check the connection to the server and try again.")
            }
            Error::Permission(_) => {
                Some("Check that you are signed in and a member of the project.")
            }
            Error::Busy(_) => Some("Wait for the running sync to finish and try again."),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Error::Transaction(StorageError::Database(error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Transaction(StorageError::Serialization(error))
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
