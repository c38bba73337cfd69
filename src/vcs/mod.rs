//! Version-control queries.
//!
//! Read-only point lookups against the repository: revision metadata, line
//! deltas, parents, remote URL. `GitCli` answers them by running the `git`
//! executable; tests substitute their own `VcsQuery` implementation.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::debug;

/// Default remote used to build browsable URLs.
pub const DEFAULT_REMOTE: &str = "origin";

/// Pathspec for the whole work tree, wherever git is started from.
const WHOLE_TREE: &str = ":(top)";

/// Message prefix git uses for merge commits.
const MERGE_PREFIX: &str = "Merge ";

static INSERTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) insertion").expect("valid regex"));
static DELETIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) deletion").expect("valid regex"));

/// Metadata of a single revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    /// Full commit message, trimmed
    pub message: String,
    /// Committer date
    pub date: DateTime<Utc>,
    /// Author name
    pub author: String,
    /// Parent commit ids, first parent first
    pub parents: Vec<String>,
}

impl RevisionInfo {
    pub fn is_merge(&self) -> bool {
        self.message.starts_with(MERGE_PREFIX)
    }
}

/// Added and removed line counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineDelta {
    pub additions: u64,
    pub deletions: u64,
}

/// Read-only queries against a repository.
pub trait VcsQuery {
    /// Look up message, date, author and parents of `reference`.
    fn lookup_revision(&self, reference: &str) -> Result<RevisionInfo>;

    /// List the parents of `reference`, first parent first.
    fn parent_refs(&self, reference: &str) -> Result<Vec<String>>;

    /// Line delta between two revisions, ignoring `exclude`.
    fn diff_stat(&self, from: &str, to: &str, exclude: &Path) -> Result<LineDelta>;

    /// Line delta introduced by a single revision, ignoring `exclude`.
    ///
    /// Used for root commits; only additions are reported.
    fn show_stat(&self, reference: &str, exclude: &Path) -> Result<LineDelta>;

    /// Browsable HTTPS URL of the configured remote.
    fn remote_url(&self) -> Result<String>;

    /// Resolve a revision expression (e.g. `HEAD~1`) to a full commit id.
    fn resolve(&self, reference: &str) -> Result<String>;

    /// Reference to diff `reference` against.
    ///
    /// Merge commits compare against their first parent; everything else, and
    /// any merge whose parents cannot be listed, against `<reference>~1`.
    fn comparison_base(&self, reference: &str, info: &RevisionInfo) -> String {
        let fallback = format!("{}~1", reference);
        if !info.is_merge() {
            return fallback;
        }
        match self.parent_refs(reference) {
            Ok(parents) => parents.into_iter().next().unwrap_or(fallback),
            Err(e) => {
                debug!("Falling back to {} for merge parent: {}", fallback, e);
                fallback
            }
        }
    }
}

/// `VcsQuery` backed by the `git` command line.
pub struct GitCli {
    /// Path to the git repository.
    repo_path: PathBuf,
    /// Remote whose URL is used for commit links.
    remote: String,
}

impl GitCli {
    /// Create a git adapter for the given repository.
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            remote: DEFAULT_REMOTE.to_string(),
        }
    }

    /// Use a remote other than `origin` for commit links.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run git and return its stdout, or a lookup error carrying stderr.
    fn git(&self, args: &[&str]) -> Result<String> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| Error::Lookup(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Lookup(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl VcsQuery for GitCli {
    fn lookup_revision(&self, reference: &str) -> Result<RevisionInfo> {
        let raw = self.git(&[
            "log",
            "-1",
            "--format=%cI%x00%an%x00%P%x00%B",
            reference,
            "--",
        ])?;
        parse_revision(&raw)
            .ok_or_else(|| Error::Lookup(format!("Unexpected git log output for {}", reference)))
    }

    fn parent_refs(&self, reference: &str) -> Result<Vec<String>> {
        let raw = self.git(&["log", "-1", "--pretty=%P", reference, "--"])?;
        Ok(raw.split_whitespace().map(str::to_string).collect())
    }

    fn diff_stat(&self, from: &str, to: &str, exclude: &Path) -> Result<LineDelta> {
        let exclude = exclude_pathspec(exclude);
        let raw = self.git(&["diff", "--shortstat", from, to, "--", WHOLE_TREE, &exclude])?;
        Ok(parse_shortstat(&raw))
    }

    fn show_stat(&self, reference: &str, exclude: &Path) -> Result<LineDelta> {
        let exclude = exclude_pathspec(exclude);
        let raw = self.git(&[
            "show",
            "--format=",
            "--shortstat",
            reference,
            "--",
            WHOLE_TREE,
            &exclude,
        ])?;
        let delta = parse_shortstat(&raw);
        Ok(LineDelta {
            additions: delta.additions,
            deletions: 0,
        })
    }

    fn remote_url(&self) -> Result<String> {
        let key = format!("remote.{}.url", self.remote);
        let raw = self.git(&["config", "--get", &key])?;
        let url = normalize_remote_url(&raw);
        if url.is_empty() {
            return Err(Error::Lookup(format!("Remote '{}' has no URL", self.remote)));
        }
        Ok(url)
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", reference);
        let raw = self.git(&["rev-parse", "--verify", &spec])?;
        Ok(raw.trim().to_string())
    }
}

/// Find the top-level directory of the git repository containing `path`.
pub fn find_git_root(path: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Excludes `path`, relative to the working directory git runs in. That is
/// the directory the history file path is joined to, even below the top level.
fn exclude_pathspec(path: &Path) -> String {
    let rel = path.to_string_lossy().replace('\\', "/");
    format!(":(exclude){}", rel)
}

/// Parse `%cI NUL %an NUL %P NUL %B` output of `git log`.
fn parse_revision(raw: &str) -> Option<RevisionInfo> {
    let mut parts = raw.splitn(4, '\0');
    let date = parts.next()?.trim();
    let author = parts.next()?.trim().to_string();
    let parents = parts
        .next()?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let message = parts.next().unwrap_or("").trim().to_string();

    let date = DateTime::parse_from_rfc3339(date)
        .ok()?
        .with_timezone(&Utc);

    Some(RevisionInfo {
        message,
        date,
        author,
        parents,
    })
}

/// Pull insertion and deletion counts out of diff-stat output.
pub fn parse_shortstat(raw: &str) -> LineDelta {
    let count = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    LineDelta {
        additions: count(&INSERTIONS_RE),
        deletions: count(&DELETIONS_RE),
    }
}

/// Turn a configured remote URL into a browsable HTTPS URL.
///
/// - `git@host:owner/repo.git` becomes `https://host/owner/repo`
/// - `ssh://git@host:22/owner/repo.git` becomes `https://host/owner/repo`
/// - credentials in HTTP(S) URLs are dropped
pub fn normalize_remote_url(raw: &str) -> String {
    let mut url = raw.trim().trim_end_matches('/');
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped;
    }

    if let Some(rest) = url.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            return format!("https://{}/{}", host, path);
        }
    }

    if let Some(rest) = url.strip_prefix("ssh://") {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        return format!("https://{}/{}", host, path);
    }

    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            if let Some((_, host)) = authority.rsplit_once('@') {
                return format!("{}{}/{}", scheme, host, path);
            }
        }
    }

    url.to_string()
}
