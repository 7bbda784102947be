//! Durable JSON store with atomic replace and a rotating backup.
//!
//! The store file is a pretty-printed JSON array of flat record objects.
//! It is the only contract with downstream tooling (the merge stage reads
//! it as-is), so the on-disk shape stays stable across versions.
//!
//! # Atomicity
//!
//! Every write goes through [`write_atomic`]:
//!
//! 1. serialize into `<path>.tmp` in the same directory,
//! 2. `fsync` the temp file,
//! 3. rename it over `<path>`,
//! 4. `fsync` the parent directory (best effort).
//!
//! A reader therefore sees either the complete previous snapshot or the
//! complete new one. A failed attempt removes its temp file.

use crate::error::StoreError;
use crate::models::ExtractedRecord;
use crate::paths::tmp_path;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Replace `path` with `contents` so that no partial file is ever observable.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    let result: io::Result<()> = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        sync_parent(path);
        Ok(())
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Could not remove temp file");
            }
        }
    }
    result
}

/// Persist the rename itself. Not every platform lets a directory be opened
/// for syncing, so failures are ignored.
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// Four-space indented JSON, matching the historical store files.
fn to_pretty_json(records: &[ExtractedRecord]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::with_capacity(records.len() * 256);
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    records.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Store file plus its backup sibling.
///
/// Saves to the same path are serialized through an internal lock, so two
/// callers can never interleave their temp-write-then-rename sequences.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    backup_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Load all records. An absent file is an empty store.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Vec<ExtractedRecord>, StoreError> {
        let records = read_records(&self.path)?;
        info!(count = records.len(), path = %self.path.display(), "Loaded store");
        Ok(records)
    }

    /// Load the backup snapshot, used when the primary file is unreadable.
    pub fn load_backup(&self) -> Result<Vec<ExtractedRecord>, StoreError> {
        read_records(&self.backup_path)
    }

    /// Atomically replace the store with `records`.
    pub fn save(&self, records: &[ExtractedRecord]) -> Result<(), StoreError> {
        self.save_to(&self.path, records)?;
        debug!(count = records.len(), path = %self.path.display(), "Saved store");
        Ok(())
    }

    /// Atomically replace the backup with `records`. Not versioned.
    pub fn save_backup(&self, records: &[ExtractedRecord]) -> Result<(), StoreError> {
        self.save_to(&self.backup_path, records)?;
        info!(count = records.len(), path = %self.backup_path.display(), "Backup updated");
        Ok(())
    }

    /// Move an unreadable store aside so a later save cannot destroy it.
    ///
    /// Earlier quarantined files are kept: if `to` is taken, `to.1`, `to.2`,
    /// ... are tried. Returns the path actually used.
    pub fn quarantine(&self, to: &Path) -> Result<PathBuf, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let target = free_path(to);
        fs::rename(&self.path, &target).map_err(|e| StoreError::io(&self.path, e))?;
        warn!(from = %self.path.display(), to = %target.display(), "Moved corrupt store aside");
        Ok(target)
    }

    fn save_to(&self, path: &Path, records: &[ExtractedRecord]) -> Result<(), StoreError> {
        let bytes = to_pretty_json(records)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        write_atomic(path, &bytes).map_err(|e| StoreError::io(path, e))
    }
}

fn free_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    (1..)
        .map(|n| {
            let mut name: OsString = base.as_os_str().to_owned();
            name.push(format!(".{n}"));
            PathBuf::from(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}

fn read_records(path: &Path) -> Result<Vec<ExtractedRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
