//! Commit record assembly.
//!
//! Combines a `VcsQuery` and a `TestRunner` into one `CommitRecord` for a
//! single revision. Only the primary revision lookup is fatal to the record;
//! every other failed query is logged and the affected field defaults.

use crate::models::{CommitInfo, CommitRecord, DiffStats, Identity, commit_url};
use crate::testrun::TestRunner;
use crate::vcs::{LineDelta, RevisionInfo, VcsQuery};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Builds commit records from repository and test-run data.
pub struct RecordBuilder<'a> {
    vcs: &'a dyn VcsQuery,
    tests: &'a dyn TestRunner,
    /// History file, relative to the repository root; excluded from line deltas
    history_file: PathBuf,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(
        vcs: &'a dyn VcsQuery,
        tests: &'a dyn TestRunner,
        history_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vcs,
            tests,
            history_file: history_file.into(),
        }
    }

    /// Build the record for `identity`.
    ///
    /// Returns `None` when the revision itself cannot be looked up; the
    /// caller must not persist anything for this run.
    pub fn build(&self, identity: &Identity) -> Option<CommitRecord> {
        let reference = identity.git_ref();
        let info = match self.vcs.lookup_revision(reference) {
            Ok(info) => info,
            Err(e) => {
                warn!("Could not read commit {}: {}", reference, e);
                return None;
            }
        };

        let repo_url = self.vcs.remote_url().unwrap_or_else(|e| {
            warn!("No remote repository URL found: {}", e);
            String::new()
        });

        let delta = self.line_delta(reference, &info);
        let summary = self.tests.run_tests();

        debug!(
            "Built record for {}: +{} -{}, {} tests, {}% coverage",
            reference, delta.additions, delta.deletions, summary.test_count, summary.coverage
        );

        Some(CommitRecord {
            identity: identity.clone(),
            author: info.author,
            commit: CommitInfo {
                date: info.date,
                message: info.message,
                url: commit_url(&repo_url, identity),
            },
            stats: DiffStats::new(delta.additions, delta.deletions, info.date.date_naive()),
            coverage: summary.coverage,
            test_count: summary.test_count,
            failed_tests: summary.failed_tests,
            conclusion: summary.conclusion(),
        })
    }

    /// Lines changed by `reference` against its logical parent.
    ///
    /// Falls back to a single-revision diff when there is no parent to
    /// compare against, and to zero when that fails too.
    fn line_delta(&self, reference: &str, info: &RevisionInfo) -> LineDelta {
        let exclude: &Path = &self.history_file;
        let base = self.vcs.comparison_base(reference, info);

        match self.vcs.diff_stat(&base, reference, exclude) {
            Ok(delta) => delta,
            Err(e) => {
                warn!(
                    "Could not diff {} against {}, treating it as a root commit: {}",
                    reference, base, e
                );
                self.vcs.show_stat(reference, exclude).unwrap_or_else(|e| {
                    warn!("Could not read stats for root commit {}: {}", reference, e);
                    LineDelta::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conclusion;
    use crate::test_utils::{FakeRunner, FakeVcs};
    use crate::testrun::TestSummary;

    const HISTORY: &str = "script/commit-history.json";

    #[test]
    fn test_build_tip_record() {
        let vcs = FakeVcs::new()
            .with_revision("HEAD", "feat: totals", "2024-05-01T10:00:00Z", &["p1"])
            .with_diff("HEAD~1", "HEAD", 12, 3)
            .with_remote("https://github.com/acme/shop");
        let runner = FakeRunner::new(TestSummary {
            test_count: 10,
            failed_tests: 2,
            coverage: 80.0,
        });

        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&Identity::Tip)
            .unwrap();

        assert_eq!(record.identity, Identity::Tip);
        assert_eq!(record.author, "Ada");
        assert_eq!(record.commit.message, "feat: totals");
        assert_eq!(record.commit.url, "https://github.com/acme/shop/commit/HEAD");
        assert_eq!(record.stats.additions, 12);
        assert_eq!(record.stats.deletions, 3);
        assert_eq!(record.stats.total, 15);
        assert_eq!(record.stats.date.to_string(), "2024-05-01");
        assert_eq!(record.test_count, 10);
        assert_eq!(record.failed_tests, 2);
        assert_eq!(record.coverage, 80.0);
        assert_eq!(record.conclusion, Conclusion::Failure);
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn test_lookup_failure_yields_no_record() {
        let vcs = FakeVcs::new();
        let runner = FakeRunner::default();

        assert!(
            RecordBuilder::new(&vcs, &runner, HISTORY)
                .build(&Identity::Tip)
                .is_none()
        );
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn test_missing_remote_leaves_url_empty() {
        let vcs = FakeVcs::new()
            .with_revision("HEAD", "fix: x", "2024-05-01T10:00:00Z", &["p1"])
            .with_diff("HEAD~1", "HEAD", 1, 0);
        let runner = FakeRunner::default();

        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&Identity::Tip)
            .unwrap();
        assert_eq!(record.commit.url, "");
        assert_eq!(record.conclusion, Conclusion::Neutral);
    }

    #[test]
    fn test_root_commit_falls_back_to_show_stat() {
        let vcs = FakeVcs::new()
            .with_revision("HEAD", "initial commit", "2024-05-01T10:00:00Z", &[])
            .with_show("HEAD", 42);
        let runner = FakeRunner::default();

        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&Identity::Tip)
            .unwrap();
        assert_eq!(record.stats.additions, 42);
        assert_eq!(record.stats.deletions, 0);
        assert_eq!(record.stats.total, 42);
    }

    #[test]
    fn test_all_stats_failing_yields_zero() {
        let vcs = FakeVcs::new().with_revision("HEAD", "x", "2024-05-01T10:00:00Z", &[]);
        let runner = FakeRunner::default();

        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&Identity::Tip)
            .unwrap();
        assert_eq!(record.stats.total, 0);
    }

    #[test]
    fn test_merge_commit_diffs_against_first_parent() {
        let vcs = FakeVcs::new()
            .with_revision(
                "HEAD",
                "Merge branch 'topic'",
                "2024-05-01T10:00:00Z",
                &["first", "second"],
            )
            .with_diff("first", "HEAD", 5, 1)
            .with_diff("HEAD~1", "HEAD", 99, 99);
        let runner = FakeRunner::default();

        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&Identity::Tip)
            .unwrap();
        assert_eq!(record.stats.additions, 5);
        assert_eq!(record.stats.deletions, 1);
    }

    #[test]
    fn test_resolved_identity_gets_concrete_url() {
        let vcs = FakeVcs::new()
            .with_revision("abc1234", "fix: y", "2024-05-01T10:00:00Z", &["p"])
            .with_diff("abc1234~1", "abc1234", 1, 1)
            .with_remote("https://github.com/acme/shop");
        let runner = FakeRunner::default();

        let identity = Identity::Resolved("abc1234".to_string());
        let record = RecordBuilder::new(&vcs, &runner, HISTORY)
            .build(&identity)
            .unwrap();
        assert_eq!(
            record.commit.url,
            "https://github.com/acme/shop/commit/abc1234"
        );
    }
}
