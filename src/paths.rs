//! File layout of one dataset.
//!
//! Every dataset (source × optional sub-group) lives in a data directory and
//! is keyed by a monitoring period, by default the current month:
//!
//! ```text
//! data_dir/
//! ├── data_10.2026_KeramogranitRu.json           # store
//! ├── data_10.2026_KeramogranitRu_BACKUP.json    # backup (last checkpoint)
//! ├── url_list_10.2026_KeramogranitRu.txt        # frontier
//! └── url_break_list_10.2026_KeramogranitRu.txt  # failure queue (absent = empty)
//! ```

use chrono::Local;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Current monitoring period tag, `mm.YYYY`.
pub fn current_period() -> String {
    Local::now().format("%m.%Y").to_string()
}

/// Sibling path used while a file is being replaced.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    dir: PathBuf,
    period: String,
    dataset: String,
}

impl DatasetPaths {
    pub fn new(dir: impl Into<PathBuf>, period: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            period: period.into(),
            dataset: dataset.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn store(&self) -> PathBuf {
        self.dir
            .join(format!("data_{}_{}.json", self.period, self.dataset))
    }

    pub fn backup(&self) -> PathBuf {
        self.dir
            .join(format!("data_{}_{}_BACKUP.json", self.period, self.dataset))
    }

    pub fn frontier(&self) -> PathBuf {
        self.dir
            .join(format!("url_list_{}_{}.txt", self.period, self.dataset))
    }

    pub fn failures(&self) -> PathBuf {
        self.dir
            .join(format!("url_break_list_{}_{}.txt", self.period, self.dataset))
    }

    /// Where an unreadable store is moved (numbered if already taken).
    pub fn quarantine(&self) -> PathBuf {
        let mut name: OsString = self.store().into_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }
}
