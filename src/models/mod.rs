//! Data models for Logbook entities.
//!
//! This module defines the core data structures:
//! - `Identity` - Either the moving tip or a resolved commit id
//! - `CommitRecord` - One history entry per tracked revision
//! - `CommitInfo` - Date, message and browsable URL of a revision
//! - `DiffStats` - Line delta against the logical parent
//! - `Conclusion` - Pass/fail verdict of the test run

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// On-disk encoding of the tip identity.
pub const TIP_MARKER: &str = "HEAD";

/// Identity of a tracked revision.
///
/// The tip is the most recent revision whose entry will be re-identified on
/// the next run. Git object ids are hex, so `"HEAD"` never collides with a
/// resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The current tip, not yet pinned to a commit id
    Tip,
    /// A concrete commit id
    Resolved(String),
}

impl Identity {
    /// Parse an identity from its on-disk form.
    pub fn parse(s: &str) -> Self {
        if s == TIP_MARKER {
            Self::Tip
        } else {
            Self::Resolved(s.to_string())
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tip => TIP_MARKER,
            Self::Resolved(id) => id,
        }
    }

    pub fn is_tip(&self) -> bool {
        matches!(self, Self::Tip)
    }

    /// Git revision expression for this identity.
    pub fn git_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Verdict of the test run for a revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conclusion {
    Success,
    Failure,
    /// No tests ran
    #[default]
    Neutral,
}

impl Conclusion {
    /// Derive the verdict from test counters.
    pub fn from_counts(test_count: u64, failed_tests: u64) -> Self {
        if test_count == 0 {
            Self::Neutral
        } else if failed_tests > 0 {
            Self::Failure
        } else {
            Self::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Commit metadata stored with each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit timestamp, written as `YYYY-MM-DDTHH:MM:SS.mmmZ`
    #[serde(with = "iso_millis")]
    pub date: DateTime<Utc>,

    /// Full commit message, trimmed
    pub message: String,

    /// Browsable commit URL; empty when no remote is known
    #[serde(default)]
    pub url: String,
}

/// Line delta between a revision and its logical parent.
///
/// Changes to the history file itself are never counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub total: u64,
    pub additions: u64,
    pub deletions: u64,
    /// Calendar day of the commit
    pub date: NaiveDate,
}

impl DiffStats {
    pub fn new(additions: u64, deletions: u64, date: NaiveDate) -> Self {
        Self {
            total: additions + deletions,
            additions,
            deletions,
            date,
        }
    }
}

/// One entry in the commit history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit id, or the tip marker
    #[serde(rename = "sha")]
    pub identity: Identity,

    #[serde(default)]
    pub author: String,

    pub commit: CommitInfo,

    pub stats: DiffStats,

    /// Statement coverage percentage (0-100, two decimals)
    #[serde(default)]
    pub coverage: f64,

    #[serde(default)]
    pub test_count: u64,

    #[serde(default)]
    pub failed_tests: u64,

    #[serde(default)]
    pub conclusion: Conclusion,
}

/// Build the browsable URL for `identity` under `repo_url`.
///
/// Returns an empty string when the repository URL is unknown.
pub fn commit_url(repo_url: &str, identity: &Identity) -> String {
    if repo_url.is_empty() {
        return String::new();
    }
    format!("{}/commit/{}", repo_url, identity.as_str())
}

/// Split a commit URL at `/commit/` and return the repository part.
pub fn url_base(url: &str) -> Option<&str> {
    if url.is_empty() {
        return None;
    }
    let base = url.split("/commit/").next().unwrap_or(url);
    if base.is_empty() { None } else { Some(base) }
}

mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
