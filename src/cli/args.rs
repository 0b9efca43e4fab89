//! CLI argument definitions using clap
//!
//! Commands:
//! - freshsync watch --config <path>
//! - freshsync check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// freshsync - keeps mounted views of backend collections fresh
#[derive(Parser, Debug)]
#[command(name = "freshsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the configured views and read commands from stdin
    Watch {
        /// Path to configuration file
        #[arg(long, default_value = "./freshsync.json")]
        config: PathBuf,
    },

    /// Validate the configuration and print the resolved route table
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./freshsync.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from(["freshsync", "watch", "--config", "/etc/fs.json"]).unwrap();
        match cli.command {
            Command::Watch { config } => assert_eq!(config, PathBuf::from("/etc/fs.json")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["freshsync", "check-config"]).unwrap();
        match cli.command {
            Command::CheckConfig { config } => {
                assert_eq!(config, PathBuf::from("./freshsync.json"))
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
