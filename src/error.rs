//! Error types shared across the harvester.
//!
//! Errors are split by who produces them:
//!
//! - [`FetchError`] and [`ExtractError`] are per-target. They never abort a
//!   run; the target is moved to the failure queue instead.
//! - [`StoreError`] comes from the persistence layer. Whether it is fatal
//!   depends on where it happens (checkpoint vs final flush).
//! - [`ProfileError`] is raised while loading a site profile.
//! - [`PipelineError`] is what a run reports to its caller.

use std::path::PathBuf;
use thiserror::Error;

/// Why a page could not be fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl FetchError {
    /// Transport failures are worth another attempt inside the same pass.
    /// A definitive status (404, 410, ...) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Record-level extraction failure. Both variants discard the page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The page has no usable name, so a record could never be deduplicated.
    #[error("no usable identity field `{field}`")]
    MissingIdentity { field: String },

    #[error("page could not be used: {0}")]
    Unusable(String),
}

impl ExtractError {
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, ExtractError::MissingIdentity { .. })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a JSON array of objects.
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("cannot read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid CSS selector `{selector}` for `{field}`")]
    Selector { field: String, selector: String },

    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Run-level failures. Per-target errors never show up here.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing inputs or unusable settings; nothing was processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("refusing to continue with a corrupt store: {0}")]
    CorruptStore(#[source] StoreError),

    /// Progress could not be written during the final flush.
    #[error("failed to persist results: {0}")]
    Persistence(#[source] StoreError),

    #[error("run interrupted after {saved} new records were flushed")]
    Interrupted { saved: usize },

    #[error("run aborted: {reason}")]
    Aborted { reason: String },
}
