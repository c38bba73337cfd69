//! Storage layer for the commit history file.
//!
//! The history is a pretty-printed JSON array of `CommitRecord`s kept inside
//! the repository (by default `script/commit-history.json`). Each run reads
//! the whole file, mutates it in memory and writes it back in one piece.
//!
//! ## Tip handling
//!
//! The record for the current tip is stored under the `HEAD` marker. On the
//! next run, once a newer commit exists, that record is re-identified with
//! its real commit id (`reconcile_tip`) before the new tip record is added.
//!
//! ## Durability
//!
//! `persist` writes to a temporary file next to the history file and renames
//! it into place, so readers never see a partial file. There is no locking:
//! two concurrent runs race and the last writer wins.

use crate::models::{CommitRecord, Identity};
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

/// Default history file location, relative to the repository root.
pub const DEFAULT_HISTORY_FILE: &str = "script/commit-history.json";

/// Shortest prefix accepted when looking up a record by commit id.
pub const MIN_PREFIX_LEN: usize = 4;

/// What `reconcile_tip` did with the stored tip record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipReconciliation {
    /// No tip record was stored
    NoTip,
    /// The tip record now carries this commit id
    Resolved(String),
    /// A record for this commit id already existed; the stale tip was dropped.
    /// This is the only case where a tip record is deleted rather than re-identified.
    Dropped(String),
}

/// In-memory view of the history file.
pub struct HistoryStore {
    /// Location of the history file
    path: PathBuf,
    /// Records in file order
    records: Vec<CommitRecord>,
}

impl HistoryStore {
    /// Create a store for `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Create a store for `path` and load it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Create an empty history file if none exists.
    ///
    /// Returns `true` when the file was created.
    pub fn init(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        write_empty(path)?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the history file into memory.
    ///
    /// A missing file is created empty. A file that is not a JSON array is
    /// logged and treated as empty; it is overwritten on the next persist.
    /// Individual records that do not match the schema are logged and dropped.
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            info!("Creating history file {}", self.path.display());
            write_empty(&self.path)?;
            self.records.clear();
            return Ok(());
        }

        let raw = fs::read(&self.path)?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            self.records.clear();
            return Ok(());
        }

        self.records = match serde_json::from_slice::<Vec<Value>>(&raw) {
            Ok(entries) => self.parse_records(entries),
            Err(e) => {
                let err = Error::Persistence(format!("{}: {}", self.path.display(), e));
                error!("{}; starting from an empty history", err);
                Vec::new()
            }
        };
        debug!("Loaded {} records from {}", self.records.len(), self.path.display());
        Ok(())
    }

    fn parse_records(&self, entries: Vec<Value>) -> Vec<CommitRecord> {
        entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    error!(
                        "Dropping record {} of {}: {}",
                        index,
                        self.path.display(),
                        e
                    );
                    None
                }
            })
            .collect()
    }

    pub fn records(&self) -> &[CommitRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record currently stored under the tip marker.
    pub fn tip(&self) -> Option<&CommitRecord> {
        self.records.iter().find(|r| r.identity.is_tip())
    }

    pub fn has_tip(&self) -> bool {
        self.tip().is_some()
    }

    pub fn find(&self, identity: &Identity) -> Option<&CommitRecord> {
        self.records.iter().find(|r| &r.identity == identity)
    }

    /// Look up a record by `HEAD` or by a unique commit id prefix.
    pub fn find_prefix(&self, prefix: &str) -> Result<&CommitRecord> {
        let identity = Identity::parse(prefix);
        if identity.is_tip() {
            return self
                .tip()
                .ok_or_else(|| Error::NotFound("no tip record stored".to_string()));
        }

        if prefix.len() < MIN_PREFIX_LEN {
            return Err(Error::Other(format!(
                "Commit id prefix must be at least {} characters, got: {}",
                MIN_PREFIX_LEN, prefix
            )));
        }

        let mut matches = self
            .records
            .iter()
            .filter(|r| !r.identity.is_tip() && r.identity.as_str().starts_with(prefix));

        match (matches.next(), matches.next()) {
            (Some(record), None) => Ok(record),
            (Some(_), Some(_)) => Err(Error::Other(format!(
                "Commit id prefix {} is ambiguous",
                prefix
            ))),
            (None, _) => Err(Error::NotFound(prefix.to_string())),
        }
    }

    /// Give the stored tip record its real commit id.
    ///
    /// `previous_tip` is the commit immediately before the new tip. The
    /// record's URL is rewritten to point at that commit. If a record for
    /// `previous_tip` already exists, the stale tip record is dropped instead
    /// so commit ids stay unique.
    pub fn reconcile_tip(&mut self, previous_tip: &str) -> TipReconciliation {
        let Some(index) = self.records.iter().position(|r| r.identity.is_tip()) else {
            return TipReconciliation::NoTip;
        };

        let resolved = Identity::Resolved(previous_tip.to_string());
        if self.find(&resolved).is_some() {
            info!(
                "Commit {} is already recorded, dropping the stale tip record",
                previous_tip
            );
            self.records.remove(index);
            return TipReconciliation::Dropped(previous_tip.to_string());
        }

        // the base may be empty when the tip was recorded without a remote
        let record = &mut self.records[index];
        if let Some((base, _)) = record.commit.url.split_once("/commit/") {
            record.commit.url = format!("{}/commit/{}", base, previous_tip);
        }
        record.identity = resolved;
        info!("Previous tip record is now {}", previous_tip);
        TipReconciliation::Resolved(previous_tip.to_string())
    }

    /// Insert or replace a record.
    ///
    /// A resolved record replaces the one with the same commit id, or is
    /// appended. A tip record is always appended, replacing any tip record
    /// still present.
    pub fn upsert(&mut self, record: CommitRecord) {
        if record.identity.is_tip() {
            self.records.retain(|r| !r.identity.is_tip());
            self.records.push(record);
            return;
        }

        match self
            .records
            .iter_mut()
            .find(|r| r.identity == record.identity)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Fill in missing URLs of resolved records from `base_url`.
    ///
    /// Returns the number of records updated.
    pub fn backfill_urls(&mut self, base_url: &str) -> usize {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return 0;
        }

        let mut updated = 0;
        for record in &mut self.records {
            if record.commit.url.is_empty() && !record.identity.is_tip() {
                record.commit.url = format!("{}/commit/{}", base_url, record.identity);
                updated += 1;
            }
        }
        if updated > 0 {
            debug!("Backfilled {} commit URLs", updated);
        }
        updated
    }

    /// Sort records by commit date and atomically replace the history file.
    pub fn persist(&mut self) -> Result<()> {
        self.records.sort_by(|a, b| a.commit.date.cmp(&b.commit.date));
        let json = serde_json::to_string_pretty(&self.records)?;
        write_atomic(&self.path, &json)?;
        debug!("Wrote {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

fn write_empty(path: &Path) -> Result<()> {
    write_atomic(path, "[]")
}

/// Write `content` to a sibling temp file, then rename it over `path`.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| {
        Error::Persistence(format!("Failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommitInfo, Conclusion, DiffStats};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    const REPO: &str = "https://github.com/acme/shop";

    fn record(identity: Identity, date: &str) -> CommitRecord {
        let date: DateTime<Utc> = DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc);
        CommitRecord {
            commit: CommitInfo {
                date,
                message: format!("commit {}", identity),
                url: format!("{}/commit/{}", REPO, identity),
            },
            identity,
            author: "Ada".to_string(),
            stats: DiffStats::new(1, 0, date.date_naive()),
            coverage: 0.0,
            test_count: 0,
            failed_tests: 0,
            conclusion: Conclusion::Neutral,
        }
    }

    fn resolved(id: &str) -> Identity {
        Identity::Resolved(id.to_string())
    }

    fn create_test_store() -> (TempDir, HistoryStore) {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path().join("script/commit-history.json"));
        (temp, store)
    }

    #[test]
    fn test_load_creates_missing_file() {
        let (_temp, mut store) = create_test_store();
        assert!(!store.exists());

        store.load().unwrap();
        assert!(store.exists());
        assert!(store.is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "[]");
    }

    #[test]
    fn test_load_unparseable_file_is_empty() {
        let (_temp, mut store) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ definitely not a list").unwrap();

        store.load().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_invalid_utf8_is_empty() {
        let (_temp, mut store) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), [0xff, 0xfe, b'[', b']']).unwrap();

        store.load().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_drops_only_invalid_records() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.upsert(record(resolved("bbbb222"), "2024-05-02T00:00:00Z"));
        store.persist().unwrap();

        let mut entries: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        entries[0]["commit"]["date"] = Value::from("last tuesday");
        fs::write(store.path(), serde_json::to_string(&entries).unwrap()).unwrap();

        store.load().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].identity, resolved("bbbb222"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_temp, store) = create_test_store();
        assert!(HistoryStore::init(store.path()).unwrap());
        assert!(!HistoryStore::init(store.path()).unwrap());
    }

    #[test]
    fn test_load_persist_roundtrip_sorts_by_date() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("bbbb222"), "2024-05-02T00:00:00Z"));
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.upsert(record(Identity::Tip, "2024-05-03T00:00:00Z"));
        store.persist().unwrap();

        let mut reloaded = HistoryStore::open(store.path()).unwrap();
        let ids: Vec<_> = reloaded.records().iter().map(|r| r.identity.to_string()).collect();
        assert_eq!(ids, vec!["aaaa111", "bbbb222", "HEAD"]);

        let before = fs::read_to_string(store.path()).unwrap();
        reloaded.persist().unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_persist_is_pretty_printed() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.persist().unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("[\n  {\n    \"sha\": \"aaaa111\""));
        assert!(raw.contains("\"date\": \"2024-05-01T00:00:00.000Z\""));
    }

    #[test]
    fn test_persist_leaves_no_temp_files() {
        let (_temp, mut store) = create_test_store();
        store.load().unwrap();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.persist().unwrap();

        let entries = fs::read_dir(store.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_persist_keeps_equal_dates_in_order() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("cccc333"), "2024-05-01T00:00:00Z"));
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.persist().unwrap();

        let ids: Vec<_> = store.records().iter().map(|r| r.identity.to_string()).collect();
        assert_eq!(ids, vec!["cccc333", "aaaa111"]);
    }

    #[test]
    fn test_upsert_replaces_resolved_record() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));

        let mut updated = record(resolved("aaaa111"), "2024-05-01T00:00:00Z");
        updated.test_count = 7;
        store.upsert(updated);

        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].test_count, 7);
    }

    #[test]
    fn test_upsert_never_duplicates_tip() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(Identity::Tip, "2024-05-01T00:00:00Z"));
        store.upsert(record(Identity::Tip, "2024-05-02T00:00:00Z"));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.tip().unwrap().commit.date.to_rfc3339(),
            "2024-05-02T00:00:00+00:00"
        );
    }

    #[test]
    fn test_reconcile_tip_assigns_id_and_url() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(Identity::Tip, "2024-05-01T00:00:00Z"));

        let outcome = store.reconcile_tip("abcdef0");
        assert_eq!(outcome, TipReconciliation::Resolved("abcdef0".to_string()));
        assert!(!store.has_tip());

        let reconciled = store.find(&resolved("abcdef0")).unwrap();
        assert_eq!(reconciled.commit.url, format!("{}/commit/abcdef0", REPO));
    }

    #[test]
    fn test_reconcile_without_tip_is_noop() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));

        assert_eq!(store.reconcile_tip("abcdef0"), TipReconciliation::NoTip);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reconcile_keeps_empty_url_empty() {
        let (_temp, mut store) = create_test_store();
        let mut tip = record(Identity::Tip, "2024-05-01T00:00:00Z");
        tip.commit.url = String::new();
        store.upsert(tip);

        store.reconcile_tip("abcdef0");
        assert_eq!(store.find(&resolved("abcdef0")).unwrap().commit.url, "");
    }

    #[test]
    fn test_reconcile_rewrites_url_with_empty_base() {
        let (_temp, mut store) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let mut tip = record(Identity::Tip, "2024-05-01T00:00:00Z");
        tip.commit.url = "/commit/HEAD".to_string();
        fs::write(store.path(), serde_json::to_string(&vec![tip]).unwrap()).unwrap();

        store.load().unwrap();
        store.reconcile_tip("abc1234");
        assert_eq!(
            store.find(&resolved("abc1234")).unwrap().commit.url,
            "/commit/abc1234"
        );
    }

    #[test]
    fn test_reconcile_drops_tip_when_id_already_recorded() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa111"), "2024-05-01T00:00:00Z"));
        store.upsert(record(Identity::Tip, "2024-05-02T00:00:00Z"));

        let outcome = store.reconcile_tip("aaaa111");
        assert_eq!(outcome, TipReconciliation::Dropped("aaaa111".to_string()));
        assert_eq!(store.len(), 1);
        assert!(!store.has_tip());
    }

    #[test]
    fn test_backfill_urls() {
        let (_temp, mut store) = create_test_store();
        let mut old = record(resolved("aaaa111"), "2024-05-01T00:00:00Z");
        old.commit.url = String::new();
        store.upsert(old);
        let mut tip = record(Identity::Tip, "2024-05-02T00:00:00Z");
        tip.commit.url = String::new();
        store.upsert(tip);

        assert_eq!(store.backfill_urls("https://example.com/r/"), 1);
        assert_eq!(
            store.find(&resolved("aaaa111")).unwrap().commit.url,
            "https://example.com/r/commit/aaaa111"
        );
        assert_eq!(store.tip().unwrap().commit.url, "");
        assert_eq!(store.backfill_urls(""), 0);
    }

    #[test]
    fn test_find_prefix() {
        let (_temp, mut store) = create_test_store();
        store.upsert(record(resolved("aaaa1111"), "2024-05-01T00:00:00Z"));
        store.upsert(record(resolved("aaaa2222"), "2024-05-02T00:00:00Z"));
        store.upsert(record(Identity::Tip, "2024-05-03T00:00:00Z"));

        assert_eq!(
            store.find_prefix("aaaa1").unwrap().identity,
            resolved("aaaa1111")
        );
        assert!(store.find_prefix("HEAD").unwrap().identity.is_tip());
        assert!(matches!(store.find_prefix("aaaa"), Err(Error::Other(_))));
        assert!(matches!(store.find_prefix("bbbb"), Err(Error::NotFound(_))));
        assert!(matches!(store.find_prefix("aa"), Err(Error::Other(_))));
    }
}
