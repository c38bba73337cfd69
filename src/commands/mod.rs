//! Command implementations for the `lb` CLI.
//!
//! Each command resolves configuration for the repository, does its work and
//! returns a result that `main` prints as JSON or human-readable text:
//! - `record` - Run the tracker once for the current tip
//! - `init` - Create an empty history file
//! - `log` / `show` - Read the history file
//! - `config show` - Resolved configuration and where each value came from

use crate::config::{ConfigEntry, ConfigOverrides, ResolvedConfig, resolve_config};
use crate::models::CommitRecord;
use crate::storage::HistoryStore;
use crate::testrun::{JestRunner, SkipTests, TestRunner};
use crate::tracker::{RecordReport, RunOutcome, Tracker};
use crate::vcs::GitCli;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

// === Record ===

/// Options for `lb record` beyond the config overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOptions {
    pub skip_tests: bool,
    pub dry_run: bool,
}

#[derive(Serialize)]
pub struct RecordResult {
    pub history_file: PathBuf,
    #[serde(flatten)]
    pub report: RecordReport,
}

impl CommandResult for RecordResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        match (&self.report.outcome, &self.report.record) {
            (RunOutcome::Skipped, _) | (_, None) => {
                lines.push("Skipped: the current commit could not be read.".to_string());
            }
            (outcome, Some(record)) => {
                let verb = if *outcome == RunOutcome::DryRun {
                    "Would record"
                } else {
                    "Recorded"
                };
                lines.push(format!(
                    "{} {} in {}",
                    verb,
                    record.identity,
                    self.history_file.display()
                ));
                lines.push(format!(
                    "  +{} -{} | {} tests, {} failed | {:.2}% coverage | {}",
                    record.stats.additions,
                    record.stats.deletions,
                    record.test_count,
                    record.failed_tests,
                    record.coverage,
                    record.conclusion
                ));
            }
        }
        if let Some(ref id) = self.report.reconciled {
            lines.push(format!("  Previous tip record is now {}", id));
        }
        lines.push(format!("  {} records total", self.report.total));
        lines.join("\n")
    }
}

/// Record the current tip of the repository at `repo_path`.
pub fn record(
    repo_path: &Path,
    overrides: &ConfigOverrides,
    options: RecordOptions,
) -> Result<RecordResult> {
    let config = resolve_config(repo_path, overrides)?;

    let vcs = GitCli::new(repo_path).with_remote(config.remote.value.clone());
    let runner: Box<dyn TestRunner> = if options.skip_tests {
        Box::new(SkipTests)
    } else {
        Box::new(jest_runner(repo_path, &config))
    };

    let mut store = HistoryStore::new(config.history_path(repo_path));
    let report = Tracker::new(&vcs, runner.as_ref(), &config.history_file.value)
        .with_dry_run(options.dry_run)
        .record(&mut store)?;

    Ok(RecordResult {
        history_file: config.history_file.value,
        report,
    })
}

fn jest_runner(repo_path: &Path, config: &ResolvedConfig) -> JestRunner {
    JestRunner::new(repo_path)
        .with_command(config.test_command.value.clone())
        .with_manifest(config.test_manifest.value.clone())
        .with_temp_dir(config.temp_dir.value.clone())
        .with_timeout(config.test_timeout.value)
}

// === Init ===

#[derive(Serialize)]
pub struct InitResult {
    pub history_file: PathBuf,
    pub created: bool,
}

impl CommandResult for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.created {
            format!("Created {}", self.history_file.display())
        } else {
            format!("{} already exists", self.history_file.display())
        }
    }
}

/// Create an empty history file if none exists.
pub fn init(repo_path: &Path, overrides: &ConfigOverrides) -> Result<InitResult> {
    let config = resolve_config(repo_path, overrides)?;
    let created = HistoryStore::init(&config.history_path(repo_path))?;
    Ok(InitResult {
        history_file: config.history_file.value,
        created,
    })
}

// === Log ===

#[derive(Serialize)]
pub struct LogResult {
    pub records: Vec<CommitRecord>,
    pub count: usize,
    pub total: usize,
}

impl CommandResult for LogResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.records.is_empty() {
            return "No records.".to_string();
        }
        let mut lines: Vec<String> = self.records.iter().map(summary_line).collect();
        if self.count < self.total {
            lines.push(format!("({} of {} records)", self.count, self.total));
        }
        lines.join("\n")
    }
}

fn summary_line(record: &CommitRecord) -> String {
    let id = record.identity.as_str();
    let short = id.get(..8).unwrap_or(id);
    let subject = record.commit.message.lines().next().unwrap_or("");
    format!(
        "{:<8} {} {:<7} {:>6.2}% {:>4}/{:<4} {}",
        short,
        record.stats.date,
        record.conclusion,
        record.coverage,
        record.test_count - record.failed_tests.min(record.test_count),
        record.test_count,
        subject
    )
}

/// List records, newest first.
pub fn log(repo_path: &Path, overrides: &ConfigOverrides, limit: Option<usize>) -> Result<LogResult> {
    let store = read_store(repo_path, overrides)?;

    // file order breaks ties between equal commit dates
    let mut records = store.records().to_vec();
    records.sort_by(|a, b| a.commit.date.cmp(&b.commit.date));
    records.reverse();
    let total = records.len();
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    Ok(LogResult {
        count: records.len(),
        total,
        records,
    })
}

// === Show ===

#[derive(Serialize)]
#[serde(transparent)]
pub struct ShowResult {
    pub record: CommitRecord,
}

impl CommandResult for ShowResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.record;
        let mut lines = vec![
            format!("commit {}", r.identity),
            format!("Author: {}", r.author),
            format!("Date:   {}", r.commit.date.to_rfc3339()),
        ];
        if !r.commit.url.is_empty() {
            lines.push(format!("URL:    {}", r.commit.url));
        }
        lines.push(String::new());
        for line in r.commit.message.lines() {
            lines.push(format!("    {}", line));
        }
        lines.push(String::new());
        lines.push(format!(
            "Changes:  {} (+{} -{})",
            r.stats.total, r.stats.additions, r.stats.deletions
        ));
        lines.push(format!(
            "Tests:    {} run, {} failed ({})",
            r.test_count, r.failed_tests, r.conclusion
        ));
        lines.push(format!("Coverage: {:.2}%", r.coverage));
        lines.join("\n")
    }
}

/// Show one record by `HEAD` or commit id prefix.
pub fn show(repo_path: &Path, overrides: &ConfigOverrides, id: &str) -> Result<ShowResult> {
    let store = read_store(repo_path, overrides)?;
    let record = store.find_prefix(id)?.clone();
    Ok(ShowResult { record })
}

/// Open the history file for reading without creating it.
fn read_store(repo_path: &Path, overrides: &ConfigOverrides) -> Result<HistoryStore> {
    let config = resolve_config(repo_path, overrides)?;
    let path = config.history_path(repo_path);
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "No history file at {}. Run `lb init` or `lb record` first.",
            path.display()
        )));
    }
    HistoryStore::open(path)
}

// === Config ===

#[derive(Serialize)]
pub struct ConfigShowResult {
    pub entries: Vec<ConfigEntry>,
}

impl CommandResult for ConfigShowResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let width = self.entries.iter().map(|e| e.key.len()).max().unwrap_or(0);
        self.entries
            .iter()
            .map(|e| format!("{:<width$} = {}  ({})", e.key, e.value, e.source, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Resolved configuration with the source of each value.
pub fn config_show(repo_path: &Path, overrides: &ConfigOverrides) -> Result<ConfigShowResult> {
    let config = resolve_config(repo_path, overrides)?;
    Ok(ConfigShowResult {
        entries: config.entries(),
    })
}
