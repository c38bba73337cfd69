//! CLI argument definitions for Logbook.

use clap::{Parser, Subcommand};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("LB_GIT_COMMIT"),
    ", built ",
    env!("LB_BUILD_TIMESTAMP"),
    ")"
);

/// Logbook - per-commit test and coverage history.
///
/// Run `lb record` after each commit (for example from a post-commit hook)
/// to append the current commit to the history file.
#[derive(Parser, Debug)]
#[command(name = "lb")]
#[command(author, version, long_version = LONG_VERSION, about = "Track test results and coverage for every commit", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if lb was started in <path> instead of the current directory.
    /// The path must exist. Bypasses git root detection.
    /// Can also be set via LB_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "LB_REPO")]
    pub repo_path: Option<std::path::PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record the current commit in the history file
    ///
    /// Re-identifies the previous tip record, runs the test suite for the
    /// current commit and writes the updated history.
    Record {
        /// History file, relative to the repository root
        #[arg(long)]
        history_file: Option<String>,

        /// Test run timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Do not run the test suite (record zero tests)
        #[arg(long)]
        skip_tests: bool,

        /// Build the record but do not write the history file
        #[arg(long)]
        dry_run: bool,
    },

    /// Create an empty history file if none exists
    Init {
        /// History file, relative to the repository root
        #[arg(long)]
        history_file: Option<String>,
    },

    /// List recorded commits, newest first
    Log {
        /// Maximum number of records to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// History file, relative to the repository root
        #[arg(long)]
        history_file: Option<String>,
    },

    /// Show one recorded commit
    Show {
        /// Commit id (or unique prefix of at least 4 characters), or HEAD
        id: String,

        /// History file, relative to the repository root
        #[arg(long)]
        history_file: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}
