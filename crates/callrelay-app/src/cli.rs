//! CLI argument definitions for the callrelay binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// callrelay: store-and-forward notifications for messages and missed calls.
#[derive(Parser, Debug)]
#[command(name = "callrelay", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the queue database and the outbox.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read newline-delimited JSON events from stdin and dispatch them (default).
    Run,
    /// Run one consolidated delivery of the queue and exit.
    Drain,
    /// Print the number of queued events.
    Status,
}

impl CliArgs {
    /// The subcommand to execute, `run` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CALLRELAY_CONFIG env var > ~/.callrelay/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CALLRELAY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> PathBuf {
        match self.data_dir {
            Some(ref p) => p.clone(),
            None => expand_home(config_data_dir),
        }
    }

    /// Resolve the log level used when RUST_LOG is not set.
    ///
    /// Priority: --log-level flag > config file value > "info".
    pub fn resolve_log_level(&self, config_level: Option<&str>) -> String {
        self.log_level
            .clone()
            .or_else(|| {
                config_level
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
            })
            .unwrap_or_else(|| "info".to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        (Some(rest), None) => PathBuf::from(".").join(rest),
        (None, _) => PathBuf::from(path),
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".callrelay").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
