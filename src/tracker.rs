//! One recording run against the history file.
//!
//! A run walks `Load → ReconcileTip → BuildNewTipRecord → Upsert →
//! BackfillUrls → Persist`, reading the file once and writing it at most once.

use crate::builder::RecordBuilder;
use crate::models::{CommitRecord, Identity, url_base};
use crate::storage::{HistoryStore, TipReconciliation};
use crate::testrun::TestRunner;
use crate::vcs::VcsQuery;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// The history file was rewritten
    Persisted,
    /// The tip could not be read; nothing was written
    Skipped,
    /// Records were merged in memory only
    DryRun,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Persisted => write!(f, "persisted"),
            RunOutcome::Skipped => write!(f, "skipped"),
            RunOutcome::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Result of `Tracker::record`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub outcome: RunOutcome,
    /// The new tip record, absent when skipped
    pub record: Option<CommitRecord>,
    /// Commit id the previous tip record now carries
    pub reconciled: Option<String>,
    /// Number of records after the run
    pub total: usize,
}

/// Drives a recording run.
pub struct Tracker<'a> {
    vcs: &'a dyn VcsQuery,
    tests: &'a dyn TestRunner,
    history_file: PathBuf,
    dry_run: bool,
}

impl<'a> Tracker<'a> {
    /// `history_file` is relative to the repository root.
    pub fn new(
        vcs: &'a dyn VcsQuery,
        tests: &'a dyn TestRunner,
        history_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vcs,
            tests,
            history_file: history_file.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Record the current tip into `store`.
    pub fn record(&self, store: &mut HistoryStore) -> Result<RecordReport> {
        store.load()?;

        let reconciled = self.reconcile(store)?;

        let builder = RecordBuilder::new(self.vcs, self.tests, &self.history_file);
        let Some(record) = builder.build(&Identity::Tip) else {
            warn!("Skipping record: the current commit could not be read");
            return Ok(RecordReport {
                outcome: RunOutcome::Skipped,
                record: None,
                reconciled: None,
                total: store.len(),
            });
        };

        let base = url_base(&record.commit.url).map(str::to_string);
        store.upsert(record.clone());
        if let Some(base) = base {
            store.backfill_urls(&base);
        }

        let outcome = if self.dry_run {
            info!("Dry run, not writing {}", store.path().display());
            RunOutcome::DryRun
        } else {
            store.persist()?;
            info!("Recorded {} in {}", record.identity, store.path().display());
            RunOutcome::Persisted
        };

        Ok(RecordReport {
            outcome,
            record: Some(record),
            reconciled,
            total: store.len(),
        })
    }

    /// Re-identify the stored tip record as the commit before the new tip.
    fn reconcile(&self, store: &mut HistoryStore) -> Result<Option<String>> {
        if !store.has_tip() {
            return Ok(None);
        }

        let previous = self.vcs.resolve("HEAD~1").map_err(|e| {
            Error::Lookup(format!(
                "cannot resolve the previous commit for the stored tip record: {}",
                e
            ))
        })?;

        Ok(match store.reconcile_tip(&previous) {
            TipReconciliation::Resolved(id) => Some(id),
            TipReconciliation::Dropped(_) | TipReconciliation::NoTip => None,
        })
    }
}
