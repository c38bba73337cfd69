//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`LB_HISTORY_FILE`, `LB_TEST_TIMEOUT`)
//! 3. Project config (`<repo>/.logbook.kdl`)
//! 4. System config (`~/.config/logbook/config.kdl`)
//! 5. Built-in defaults

use crate::config::schema::{LogbookConfig, validate_history_file};
use crate::storage::DEFAULT_HISTORY_FILE;
use crate::testrun::{DEFAULT_MANIFEST, DEFAULT_TIMEOUT, default_command};
use crate::vcs::DEFAULT_REMOTE;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the history file location.
pub const HISTORY_FILE_ENV: &str = "LB_HISTORY_FILE";
/// Environment variable overriding the test timeout (seconds).
pub const TEST_TIMEOUT_ENV: &str = "LB_TEST_TIMEOUT";
/// Project config file name, at the repository root.
pub const PROJECT_CONFIG_FILE: &str = ".logbook.kdl";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from the repository's `.logbook.kdl`
    Project,
    /// Value from the user's config directory
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Project => write!(f, "project"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// History file, relative to the repository root
    pub history_file: Resolved<PathBuf>,
    pub remote: Resolved<String>,
    pub test_command: Resolved<Vec<String>>,
    /// `None` runs tests unconditionally
    pub test_manifest: Resolved<Option<String>>,
    pub test_timeout: Resolved<Duration>,
    pub temp_dir: Resolved<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            history_file: Resolved::new(PathBuf::from(DEFAULT_HISTORY_FILE), ValueSource::Default),
            remote: Resolved::new(DEFAULT_REMOTE.to_string(), ValueSource::Default),
            test_command: Resolved::new(default_command(), ValueSource::Default),
            test_manifest: Resolved::new(
                Some(DEFAULT_MANIFEST.to_string()),
                ValueSource::Default,
            ),
            test_timeout: Resolved::new(DEFAULT_TIMEOUT, ValueSource::Default),
            temp_dir: Resolved::new(std::env::temp_dir(), ValueSource::Default),
        }
    }
}

/// One line of `lb config show`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

impl ResolvedConfig {
    /// Absolute path of the history file for `repo_path`.
    pub fn history_path(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.history_file.value)
    }

    /// Flatten into displayable key/value/source entries.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        fn entry<T>(key: &'static str, r: &Resolved<T>, value: String) -> ConfigEntry {
            ConfigEntry {
                key,
                value,
                source: r.source.to_string(),
            }
        }

        vec![
            entry(
                "history-file",
                &self.history_file,
                self.history_file.value.display().to_string(),
            ),
            entry("remote", &self.remote, self.remote.value.clone()),
            entry(
                "test-command",
                &self.test_command,
                self.test_command.value.join(" "),
            ),
            entry(
                "test-manifest",
                &self.test_manifest,
                self.test_manifest.value.clone().unwrap_or_default(),
            ),
            entry(
                "test-timeout",
                &self.test_timeout,
                self.test_timeout.value.as_secs().to_string(),
            ),
            entry(
                "temp-dir",
                &self.temp_dir,
                self.temp_dir.value.display().to_string(),
            ),
        ]
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub history_file: Option<String>,
    pub test_timeout: Option<u64>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_file(mut self, file: impl Into<String>) -> Self {
        self.history_file = Some(file.into());
        self
    }

    pub fn with_test_timeout(mut self, secs: u64) -> Self {
        self.test_timeout = Some(secs);
        self
    }
}

/// Values read from the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub history_file: Option<String>,
    pub test_timeout: Option<String>,
}

impl EnvOverrides {
    /// Read `LB_*` variables from the process environment.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            history_file: read(HISTORY_FILE_ENV),
            test_timeout: read(TEST_TIMEOUT_ENV),
        }
    }
}

/// Location of the system config file.
pub fn system_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("logbook").join("config.kdl"))
}

/// Location of the project config file.
pub fn project_config_path(repo_path: &Path) -> PathBuf {
    repo_path.join(PROJECT_CONFIG_FILE)
}

/// Resolve configuration for `repo_path` with full precedence chain.
pub fn resolve_config(repo_path: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match system_config_path() {
        Some(path) => LogbookConfig::load(&path)?,
        None => LogbookConfig::new(),
    };
    let project = LogbookConfig::load(&project_config_path(repo_path))?;

    resolve_layers(overrides, &EnvOverrides::from_env(), &project, &system)
}

/// Merge already-loaded layers.
pub fn resolve_layers(
    overrides: &ConfigOverrides,
    env: &EnvOverrides,
    project: &LogbookConfig,
    system: &LogbookConfig,
) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig::default();

    // Resolve history_file
    let history_file = if let Some(ref file) = overrides.history_file {
        Some(Resolved::new(file.clone(), ValueSource::CliFlag))
    } else if let Some(ref file) = env.history_file {
        Some(Resolved::new(
            file.clone(),
            ValueSource::EnvVar(HISTORY_FILE_ENV.to_string()),
        ))
    } else {
        layered(project.history_file.as_ref(), system.history_file.as_ref())
    };
    if let Some(file) = history_file {
        validate_history_file(&file.value).map_err(Error::Config)?;
        result.history_file = Resolved::new(PathBuf::from(file.value), file.source);
    }

    // Resolve test_timeout
    if let Some(secs) = overrides.test_timeout {
        result.test_timeout = Resolved::new(timeout_secs(secs)?, ValueSource::CliFlag);
    } else if let Some(ref raw) = env.test_timeout {
        let secs = raw.trim().parse::<u64>().map_err(|_| {
            Error::Config(format!("{} must be a number of seconds, got: {}", TEST_TIMEOUT_ENV, raw))
        })?;
        result.test_timeout = Resolved::new(
            timeout_secs(secs)?,
            ValueSource::EnvVar(TEST_TIMEOUT_ENV.to_string()),
        );
    } else if let Some(secs) = layered(project.test_timeout.as_ref(), system.test_timeout.as_ref()) {
        result.test_timeout = Resolved::new(timeout_secs(secs.value)?, secs.source);
    }

    if let Some(remote) = layered(project.remote.as_ref(), system.remote.as_ref()) {
        result.remote = remote;
    }

    if let Some(command) = layered(project.test_command.as_ref(), system.test_command.as_ref()) {
        if command.value.is_empty() {
            return Err(Error::Config("test-command must not be empty".to_string()));
        }
        result.test_command = command;
    }

    if let Some(manifest) = layered(project.test_manifest.as_ref(), system.test_manifest.as_ref()) {
        let value = Some(manifest.value).filter(|m| !m.is_empty());
        result.test_manifest = Resolved::new(value, manifest.source);
    }

    if let Some(dir) = layered(project.temp_dir.as_ref(), system.temp_dir.as_ref()) {
        result.temp_dir = Resolved::new(PathBuf::from(dir.value), dir.source);
    }

    Ok(result)
}

/// Pick the project value over the system value.
fn layered<T: Clone>(project: Option<&T>, system: Option<&T>) -> Option<Resolved<T>> {
    project
        .map(|v| Resolved::new(v.clone(), ValueSource::Project))
        .or_else(|| system.map(|v| Resolved::new(v.clone(), ValueSource::System)))
}

fn timeout_secs(secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Config("test timeout must be greater than 0".to_string()));
    }
    Ok(Duration::from_secs(secs))
}
