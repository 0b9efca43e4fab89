//! JSON I/O handling for CLI
//!
//! - Input: one JSON object per stdin line
//! - Output: one JSON object per stdout line
//! - Logs never go to stdout

use std::io::{self, Write};

use serde::Deserialize;
use serde_json::Value;

use super::errors::{CliError, CliResult};
use crate::sync::{CollectionKey, Mutation};

/// One stdin command of `watch`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// `{"op":"mutate","method":"DELETE","path":"/usuarios/7"}`
    Mutate(Mutation),
    /// `{"op":"announce","collection":"users"}`
    Announce { collection: CollectionKey },
    /// `{"op":"refresh_all"}`
    RefreshAll,
    /// `{"op":"status"}`
    Status,
}

/// Parse one stdin line
pub fn parse_request(line: &str) -> CliResult<Request> {
    if line.trim().is_empty() {
        return Err(CliError::Io("Empty line".into()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    write_line(&serde_json::json!({
        "status": "ok",
        "data": data
    }))
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_line(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

fn write_line(response: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}
