//! KDL schema for `.logbook.kdl` and the system `config.kdl`.
//!
//! ```kdl
//! history-file "script/commit-history.json"
//! remote "origin"
//! test-command "npx" "jest" "--coverage" "--json" "--outputFile={output}" "--passWithNoTests"
//! test-manifest "package.json"
//! test-timeout 600
//! temp-dir "/tmp"
//! ```
//!
//! Every key is optional. An empty `test-manifest` runs the test command
//! unconditionally.

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::path::Path;

/// Settings read from one KDL file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogbookConfig {
    /// History file, relative to the repository root
    pub history_file: Option<String>,

    /// Remote used for commit URLs
    pub remote: Option<String>,

    /// Test command; `{output}` is replaced by the summary path
    pub test_command: Option<Vec<String>>,

    /// File that must exist for tests to run
    pub test_manifest: Option<String>,

    /// Test run timeout in seconds
    pub test_timeout: Option<u64>,

    /// Directory for temporary test summaries
    pub temp_dir: Option<String>,
}

impl LogbookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ref file) = self.history_file {
            validate_history_file(file)?;
        }
        if let Some(ref command) = self.test_command {
            if command.is_empty() {
                return Err("test-command must have at least one argument".to_string());
            }
        }
        if self.test_timeout == Some(0) {
            return Err("test-timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.history_file = string_arg(doc, "history-file");
        config.remote = string_arg(doc, "remote");
        config.test_manifest = string_arg(doc, "test-manifest");
        config.temp_dir = string_arg(doc, "temp-dir");

        if let Some(node) = doc.get("test-command") {
            let args: Vec<String> = node
                .entries()
                .iter()
                .filter(|e| e.name().is_none())
                .filter_map(|e| e.value().as_string())
                .map(str::to_string)
                .collect();
            config.test_command = Some(args);
        }

        if let Some(node) = doc.get("test-timeout") {
            if let Some(entry) = node.entries().first() {
                if let Some(i) = entry.value().as_integer() {
                    if let Ok(secs) = u64::try_from(i) {
                        config.test_timeout = Some(secs);
                    }
                }
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        push_string(&mut doc, "history-file", self.history_file.as_deref());
        push_string(&mut doc, "remote", self.remote.as_deref());

        if let Some(ref command) = self.test_command {
            let mut node = KdlNode::new("test-command");
            for arg in command {
                node.push(KdlEntry::new(KdlValue::String(arg.clone())));
            }
            doc.nodes_mut().push(node);
        }

        push_string(&mut doc, "test-manifest", self.test_manifest.as_deref());

        if let Some(secs) = self.test_timeout {
            let mut node = KdlNode::new("test-timeout");
            node.push(KdlEntry::new(KdlValue::Integer(secs as i128)));
            doc.nodes_mut().push(node);
        }

        push_string(&mut doc, "temp-dir", self.temp_dir.as_deref());

        doc
    }

    /// Load and validate a config file.
    ///
    /// Returns an empty config if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;

        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// The history file must be a non-empty path relative to the repository root.
pub fn validate_history_file(file: &str) -> std::result::Result<(), String> {
    if file.trim().is_empty() {
        return Err("history-file must not be empty".to_string());
    }
    if Path::new(file).is_absolute() {
        return Err(format!(
            "history-file must be relative to the repository root, got: {}",
            file
        ));
    }
    Ok(())
}

fn string_arg(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

fn push_string(doc: &mut KdlDocument, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        let mut node = KdlNode::new(name);
        node.push(KdlEntry::new(KdlValue::String(value.to_string())));
        doc.nodes_mut().push(node);
    }
}
