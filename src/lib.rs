//! Logbook - per-commit test and coverage history for a repository.
//!
//! This library provides the core functionality for the `lb` CLI tool:
//! querying git for revision metadata, running the project's test suite for
//! a coverage summary, and maintaining the commit history file.

pub mod builder;
pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod storage;
pub mod testrun;
pub mod tracker;
pub mod vcs;


/// Library-level error type for Logbook operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git lookup failed: {0}")]
    Lookup(String),

    #[error("Test run failed: {0}")]
    TestRun(String),

    #[error("History file error: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Logbook operations.
pub type Result<T> = std::result::Result<T, Error>;
