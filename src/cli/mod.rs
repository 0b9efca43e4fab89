//! CLI module for freshsync
//!
//! Provides command-line interface for:
//! - watch: mount the configured views, serve stdin commands
//! - check-config: validate the configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, watch};
pub use errors::{CliError, CliResult};
pub use io::{parse_request, write_error, write_response, Request};
