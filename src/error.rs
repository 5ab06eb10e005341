//! Error types for batchdl
//!
//! This module provides the error handling for the library:
//! - The crate-wide [`Error`] type and [`Result`] alias
//! - [`SearchError`], the typed outcome of a failed search-and-download attempt
//! - [`DatabaseError`] for the run index
//!
//! Per-track faults never escape the per-track download task; they are turned into
//! [`TrackState`](crate::types::TrackState) values instead. The errors here are what
//! collaborators report to the engine and what the engine reports to its embedder.

use crate::types::FailureReason;
use thiserror::Error;

/// Result type alias for batchdl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batchdl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.output_dir")
        key: Option<String>,
    },

    /// Run index operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session (connect/login) failure
    #[error("session error: {message}")]
    Session {
        /// Human-readable error message
        message: String,
        /// Whether the failure is expected to clear up on its own (timeouts, unreachable address)
        transient: bool,
    },

    /// Search or transfer failure reported by the search collaborator
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// A collaborator (organizer, source remover, file index, ...) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Post-completion hook failed to run
    #[error("on-complete hook error: {0}")]
    Hook(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for a non-transient session error
    pub fn session(message: impl Into<String>) -> Self {
        Error::Session {
            message: message.into(),
            transient: false,
        }
    }

    /// Convenience constructor for a transient session error (timeout, unreachable server)
    pub fn session_transient(message: impl Into<String>) -> Self {
        Error::Session {
            message: message.into(),
            transient: true,
        }
    }
}

/// Failure of a single search-and-download attempt
///
/// The variants drive the per-track retry loop: a classified "no suitable file"
/// result is terminal, cancellation propagates, anything else is a transient fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Nothing on the network matched the acceptance criteria
    #[error("no suitable file found")]
    NoSuitableFileFound,

    /// A different classified failure (recorded with its own reason)
    #[error("search failed: {0:?}")]
    Classified(FailureReason),

    /// The transfer or search was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Any unclassified fault (connection reset, peer went away, ...)
    #[error("{0}")]
    Transient(String),
}

impl SearchError {
    /// The failure reason recorded on the track for classified failures
    ///
    /// Returns `None` for cancellation and transient faults, which are not terminal
    /// by themselves.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SearchError::NoSuitableFileFound => Some(FailureReason::NoSuitableFileFound),
            SearchError::Classified(reason) => Some(*reason),
            SearchError::Cancelled | SearchError::Transient(_) => None,
        }
    }
}

/// Run index errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
