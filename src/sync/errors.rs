//! # Sync Errors
//!
//! Error types for the freshness layer.

use thiserror::Error;

/// Result type for freshness operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Freshness-layer errors
///
/// `Clone` because an error lives inside a [`Snapshot`](super::Snapshot)
/// and is handed to every waiter of a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // ==================
    // Read Errors
    // ==================
    /// Backend answered a read with a failure
    #[error("Fetch of '{endpoint}' failed: {message}")]
    Fetch { endpoint: String, message: String },

    /// Response envelope was neither an array nor an object holding one
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    /// An item of the response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    // ==================
    // Write Errors
    // ==================
    /// Backend rejected a mutation
    #[error("Mutation {method} {path} failed with status {status}: {message}")]
    Mutation {
        method: String,
        path: String,
        status: u16,
        message: String,
    },

    // ==================
    // Transport Errors
    // ==================
    /// Request never produced a response (connect, timeout, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    // ==================
    // Coordination Errors
    // ==================
    /// A view was mounted outside a tokio runtime
    #[error("No tokio runtime to drive the view")]
    NoRuntime,

    /// Operation on a view that has already unmounted
    #[error("View is unmounted")]
    Unmounted,

    // ==================
    // Internal Errors
    // ==================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Stable error code for logs and CLI responses
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Fetch { .. } => "FRESH_FETCH_FAILED",
            SyncError::UnexpectedShape(_) => "FRESH_UNEXPECTED_SHAPE",
            SyncError::Decode(_) => "FRESH_DECODE_FAILED",
            SyncError::Mutation { .. } => "FRESH_MUTATION_FAILED",
            SyncError::Transport(_) => "FRESH_TRANSPORT_ERROR",
            SyncError::NoRuntime => "FRESH_NO_RUNTIME",
            SyncError::Unmounted => "FRESH_UNMOUNTED",
            SyncError::Config(_) => "FRESH_CONFIG_ERROR",
            SyncError::Internal(_) => "FRESH_INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request may succeed
    ///
    /// Transport failures and 5xx answers are transient; 4xx answers and
    /// local decoding problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Mutation { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this error belongs to the read path
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::UnexpectedShape(_) | SyncError::Decode(_)
        )
    }
}
