//! Error types for records-dl
//!
//! This module provides the error taxonomy for the library:
//! - Transport failures (network/HTTP), retried per the retry policy
//! - Extraction failures (malformed pages), degraded to empty pages
//! - Storage failures (batch spool write/read/delete)
//! - Finalization failure, the only run-fatal condition

use thiserror::Error;

/// Result type alias for records-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for records-dl
///
/// Failures local to one query task (transport exhaustion, extraction errors)
/// never abort other tasks or the overall run; only [`Error::Finalization`]
/// is run-fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_days")
        key: Option<String>,
    },

    /// Network or HTTP failure while fetching a page
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed page that could not be parsed into rows
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Batch spool operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No artifact could be produced at finalization, even via the fallback path
    #[error("finalization failed: {0}")]
    Finalization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not starting new query tasks
    #[error("shutdown in progress: not starting new query tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Transport-level failures from the page fetcher
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying HTTP client error (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status from the records site
    #[error("HTTP status {status} from {url}")]
    Status {
        /// The HTTP status code returned
        status: u16,
        /// The URL that returned the status
        url: String,
    },

    /// Response body exceeded the configured size guard
    #[error("response of {actual} bytes exceeds the {limit} byte limit")]
    ResponseTooLarge {
        /// Observed (or declared) response size in bytes
        actual: u64,
        /// Configured maximum response size in bytes
        limit: u64,
    },

    /// A pagination cursor was not a usable URL
    #[error("invalid cursor URL: {0}")]
    InvalidCursor(#[from] url::ParseError),
}

/// Batch spool storage failures
///
/// Write failures abort the current flush (retried once by the sink);
/// read/delete failures during merge are skipped with a logged warning.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Writing a batch to the spool failed
    #[error("failed to write batch {sequence}: {reason}")]
    WriteFailed {
        /// Sequence number of the batch
        sequence: u64,
        /// Underlying failure description
        reason: String,
    },

    /// Reading a batch back from the spool failed
    #[error("failed to read batch {sequence}: {reason}")]
    ReadFailed {
        /// Sequence number of the batch
        sequence: u64,
        /// Underlying failure description
        reason: String,
    },

    /// Deleting a merged batch from the spool failed
    #[error("failed to delete batch {sequence}: {reason}")]
    DeleteFailed {
        /// Sequence number of the batch
        sequence: u64,
        /// Underlying failure description
        reason: String,
    },
}
