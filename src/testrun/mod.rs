//! Test-result collection.
//!
//! Runs the project's test command with coverage enabled, reads back the
//! JSON summary it writes to a unique temporary file, and removes the file.
//! A failing, hanging or missing test run never aborts tracking: every
//! problem is logged and folded into an all-zero summary.

use crate::models::Conclusion;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use wait_timeout::ChildExt;

/// Placeholder in the test command replaced by the summary file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Default manifest whose presence enables the test run.
pub const DEFAULT_MANIFEST: &str = "package.json";

/// Default upper bound for one test run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default test command: Jest with coverage and a JSON summary.
pub fn default_command() -> Vec<String> {
    [
        "npx",
        "jest",
        "--coverage",
        "--json",
        "--outputFile={output}",
        "--passWithNoTests",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Aggregated result of one test run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestSummary {
    pub test_count: u64,
    pub failed_tests: u64,
    /// Statement coverage percentage (0-100, two decimals)
    pub coverage: f64,
}

impl TestSummary {
    pub fn conclusion(&self) -> Conclusion {
        Conclusion::from_counts(self.test_count, self.failed_tests)
    }
}

/// Something that can produce a test summary for the working tree.
pub trait TestRunner {
    /// Run the tests. Never fails; problems yield a zero summary.
    fn run_tests(&self) -> TestSummary;
}

/// `TestRunner` for `--skip-tests`: reports no tests.
pub struct SkipTests;

impl TestRunner for SkipTests {
    fn run_tests(&self) -> TestSummary {
        debug!("Test run disabled");
        TestSummary::default()
    }
}

/// Subset of the Jest `--json` output that is tracked.
#[derive(Debug, Deserialize)]
struct JestSummary {
    #[serde(rename = "numTotalTests", default)]
    num_total_tests: u64,

    #[serde(rename = "numFailedTests", default)]
    num_failed_tests: u64,

    #[serde(rename = "coverageMap", default)]
    coverage_map: Option<HashMap<String, FileCoverage>>,
}

/// Per-file Istanbul coverage; only statement hit counts are read.
#[derive(Debug, Deserialize)]
struct FileCoverage {
    #[serde(default)]
    s: HashMap<String, u64>,
}

/// Parse a Jest JSON summary.
pub fn parse_summary(raw: &str) -> Result<TestSummary> {
    let summary: JestSummary = serde_json::from_str(raw)?;

    let (covered, total) = summary
        .coverage_map
        .iter()
        .flat_map(|map| map.values())
        .fold((0u64, 0u64), |(covered, total), file| {
            let hit = file.s.values().filter(|&&hits| hits > 0).count() as u64;
            (covered + hit, total + file.s.len() as u64)
        });

    Ok(TestSummary {
        test_count: summary.num_total_tests,
        failed_tests: summary.num_failed_tests,
        coverage: coverage_percent(covered, total),
    })
}

/// `100 * covered / total`, rounded to two decimals; 0 when nothing is instrumented.
pub fn coverage_percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = covered as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// `TestRunner` that shells out to a Jest-compatible command.
pub struct JestRunner {
    repo_path: PathBuf,
    command: Vec<String>,
    /// Run only when this file exists in the repository root
    manifest: Option<String>,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl JestRunner {
    /// Create a runner with the default Jest command for the given repository.
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            command: default_command(),
            manifest: Some(DEFAULT_MANIFEST.to_string()),
            temp_dir: std::env::temp_dir(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Require `manifest` to exist before running; `None` always runs.
    pub fn with_manifest(mut self, manifest: Option<String>) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fresh summary path; unique so concurrent runs never share a file.
    fn summary_path(&self) -> PathBuf {
        self.temp_dir
            .join(format!("jest-results-{}.json", Uuid::new_v4().simple()))
    }

    /// Run the test command, waiting at most `timeout`.
    ///
    /// The exit status is reported but not treated as an error.
    fn invoke(&self, output: &Path) -> Result<()> {
        let output = output.to_string_lossy();
        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Error::TestRun("test command is empty".to_string()))?;

        debug!("Running tests: {}", args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&self.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // own process group, so a timeout also reaches spawned workers
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::TestRun(format!("Failed to start {}: {}", program, e)))?;

        match child
            .wait_timeout(self.timeout)
            .map_err(|e| Error::TestRun(format!("Failed to wait for {}: {}", program, e)))?
        {
            Some(status) if !status.success() => {
                warn!("Test command exited with {}", status);
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                kill_tree(&mut child);
                let _ = child.wait();
                Err(Error::TestRun(format!(
                    "{} timed out after {}s and was killed",
                    program,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Read and delete the summary file.
    fn collect(&self, output: &Path) -> TestSummary {
        if !output.exists() {
            warn!("Test summary was not created at {}", output.display());
            return TestSummary::default();
        }

        let summary = fs::read_to_string(output)
            .map_err(Error::from)
            .and_then(|raw| parse_summary(&raw))
            .unwrap_or_else(|e| {
                warn!("Could not read test summary {}: {}", output.display(), e);
                TestSummary::default()
            });

        if let Err(e) = fs::remove_file(output) {
            warn!("Could not remove temporary file {}: {}", output.display(), e);
        }

        summary
    }
}

/// Kill the test command together with every process in its group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg({}) failed: {}, killing the child only", pgid, e);
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

impl TestRunner for JestRunner {
    fn run_tests(&self) -> TestSummary {
        if let Some(manifest) = &self.manifest {
            if !self.repo_path.join(manifest).exists() {
                debug!("No {} found, skipping tests", manifest);
                return TestSummary::default();
            }
        }

        let output = self.summary_path();
        if let Err(e) = self.invoke(&output) {
            warn!("{}", e);
        }
        self.collect(&output)
    }
}
