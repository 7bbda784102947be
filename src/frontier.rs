//! Frontier and failure queue files.
//!
//! Both are plain text, one url per line. The frontier is produced by the
//! discovery stage and only read here; the failure queue is owned by the
//! pipeline and rewritten at the end of every run.

use crate::error::StoreError;
use crate::models::Target;
use crate::store::write_atomic;
use itertools::Itertools;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

/// Read the frontier, or `None` if the file does not exist.
///
/// Lines are trimmed; blank lines and lines that are not absolute urls are
/// skipped.
pub fn load_frontier(path: &Path, group_key: &str) -> Result<Option<Vec<Target>>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut targets = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Url::parse(line) {
            Ok(_) => targets.push(Target::new(line, group_key)),
            Err(e) => warn!(line = lineno + 1, %line, error = %e, "Skipping frontier entry that is not a url"),
        }
    }
    info!(count = targets.len(), path = %path.display(), "Loaded frontier");
    Ok(Some(targets))
}

/// Persisted list of urls whose last attempt did not produce a record.
///
/// An absent file and an empty file both mean "nothing pending".
#[derive(Debug, Clone)]
pub struct FailureQueue {
    path: PathBuf,
}

impl FailureQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unique()
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    /// Overwrite the queue with `urls`, or delete it when there are none.
    pub fn save(&self, urls: &[String]) -> Result<(), StoreError> {
        if urls.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => {
                    info!(path = %self.path.display(), "No pending failures; removed failure queue");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::io(&self.path, e)),
            };
        }

        let mut body = urls.iter().unique().join("\n");
        body.push('\n');
        write_atomic(&self.path, body.as_bytes()).map_err(|e| StoreError::io(&self.path, e))?;
        info!(count = urls.len(), path = %self.path.display(), "Saved failure queue");
        Ok(())
    }
}
