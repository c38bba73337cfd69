//! Common test utilities for logbook integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't read the
//! user's `~/.config/logbook/config.kdl`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
use std::process::Command as StdCommand;
pub use tempfile::TempDir;

/// Relative location of the history file with default configuration.
pub const HISTORY_FILE: &str = "script/commit-history.json";

/// A test environment with an isolated git repository and config directory.
///
/// Each `TestEnv` creates two temporary directories:
/// - `repo_dir`: a git repository with a configured identity
/// - `config_dir`: stands in for `$XDG_CONFIG_HOME` (and `$HOME`)
///
/// The `lb()` method returns a `Command` that points at both per-invocation,
/// making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with an empty git repository.
    pub fn new() -> Self {
        let env = Self {
            repo_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        };
        env.git(&["init", "-q", "-b", "main"]);
        env.git(&["config", "user.email", "test@test.com"]);
        env.git(&["config", "user.name", "Test"]);
        env.git(&["config", "commit.gpgsign", "false"]);
        env
    }

    /// Get a Command for the lb binary with isolated configuration.
    pub fn lb(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_lb"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("XDG_CONFIG_HOME", self.config_dir.path());
        cmd.env("HOME", self.config_dir.path());
        for var in ["LB_REPO", "LB_HISTORY_FILE", "LB_TEST_TIMEOUT", "LB_LOG", "RUST_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Get the path to the repo directory.
    pub fn repo_path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Run git in the repository, panicking on failure.
    pub fn git(&self, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(self.repo_dir.path())
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Write a file, stage everything and commit. Returns the new commit id.
    pub fn commit(&self, rel: &str, content: &str, message: &str) -> String {
        let path = self.repo_dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    /// Write the system config file (`$XDG_CONFIG_HOME/logbook/config.kdl`).
    pub fn write_system_config(&self, kdl: &str) {
        let dir = self.config_dir.path().join("logbook");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.kdl"), kdl).unwrap();
    }

    /// Configure a test command that copies `summary_json` to the output path.
    pub fn use_fixture_summary(&self, summary_json: &str) {
        let fixture = self.config_dir.path().join("summary.json");
        fs::write(&fixture, summary_json).unwrap();
        self.write_system_config(&format!(
            "test-command \"cp\" \"{}\" \"{{output}}\"\ntest-manifest \"\"\n",
            fixture.display()
        ));
    }

    /// Parse the history file.
    pub fn history(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.repo_dir.path().join(HISTORY_FILE)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
