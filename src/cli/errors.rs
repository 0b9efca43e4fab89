//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::io;

use thiserror::Error;

use crate::sync::SyncError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing or invalid
    #[error("FRESH_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    /// stdin/stdout failure
    #[error("FRESH_CLI_IO_ERROR: {0}")]
    Io(String),

    /// Runtime or backend client could not start
    #[error("FRESH_CLI_BOOT_FAILED: {0}")]
    BootFailed(String),
}

impl CliError {
    /// Stable code string
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "FRESH_CLI_CONFIG_ERROR",
            CliError::Io(_) => "FRESH_CLI_IO_ERROR",
            CliError::BootFailed(_) => "FRESH_CLI_BOOT_FAILED",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CliError::Config(m) | CliError::Io(m) | CliError::BootFailed(m) => m,
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(format!("JSON error: {}", e))
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Config(message) => CliError::Config(message),
            other => CliError::BootFailed(other.to_string()),
        }
    }
}
