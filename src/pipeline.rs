//! Run orchestration.
//!
//! A run walks through
//!
//! ```text
//! LOAD_STORE → BUILD_INDEX → LOAD_FRONTIER → FILTER → PROCESS → FLUSH → DONE
//! ```
//!
//! and ends in `FAILED` on an unrecoverable error. The same machine drives
//! both passes; they differ in where the work comes from:
//!
//! | Mode | Work source | Absent source |
//! |------|-------------|---------------|
//! | [`RunMode::Primary`] | frontier file | `FAILED` (run discovery first) |
//! | [`RunMode::Retry`] | failure queue | `DONE` (nothing pending) |
//!
//! If PROCESS is cut short (Ctrl-C or a panicking worker) FLUSH still runs
//! with whatever has accumulated before the error is returned.

use crate::controller::{self, CheckpointPolicy, PassSettings, RunContext, RunState};
use crate::error::{PipelineError, StoreError};
use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::frontier::{load_frontier, FailureQueue};
use crate::index::ProcessedIndex;
use crate::models::{ExtractedRecord, Target};
use crate::paths::DatasetPaths;
use crate::store::JsonStore;
use futures::FutureExt;
use itertools::Itertools;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    LoadStore,
    BuildIndex,
    LoadFrontier,
    Filter,
    Process,
    Flush,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::LoadStore => "LOAD_STORE",
            RunPhase::BuildIndex => "BUILD_INDEX",
            RunPhase::LoadFrontier => "LOAD_FRONTIER",
            RunPhase::Filter => "FILTER",
            RunPhase::Process => "PROCESS",
            RunPhase::Flush => "FLUSH",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Primary,
    Retry,
}

/// What to do when the store file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptStorePolicy {
    /// Move the file aside, fall back to the backup, else start empty.
    #[default]
    Recover,
    /// Fail the run and leave every file untouched.
    Abort,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub primary: PassSettings,
    pub retry: PassSettings,
    pub checkpoints: CheckpointPolicy,
    pub corrupt_store: CorruptStorePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            primary: PassSettings {
                concurrency: 6,
                timeout: Duration::from_secs(30),
                delay: Duration::ZERO,
            },
            retry: PassSettings {
                concurrency: 3,
                timeout: Duration::from_secs(30),
                delay: Duration::from_millis(500),
            },
            checkpoints: CheckpointPolicy::default(),
            corrupt_store: CorruptStorePolicy::default(),
        }
    }
}

/// Counts reported at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Targets handed to the controller.
    pub attempted: usize,
    /// Records added by this run.
    pub new_records: usize,
    /// Targets that are in the failure queue after this run.
    pub failed: usize,
    /// Records in the store after this run.
    pub total_in_store: usize,
    /// Listed targets dropped before processing (already stored or repeated).
    pub skipped: usize,
    /// New-record counts at which a checkpoint save happened.
    pub checkpoints: Vec<usize>,
    /// Store sizes at which a mid-run backup happened.
    pub backups: Vec<usize>,
}

/// Read-only view of a dataset, for `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub in_store: usize,
    pub frontier: Option<usize>,
    pub remaining: Option<usize>,
    pub pending_failures: usize,
}

enum Interruption {
    Shutdown,
    Panic(String),
}

/// One dataset's pipeline: its files plus the fetch/extract collaborators.
pub struct Pipeline<F, E> {
    fetcher: F,
    extractor: E,
    paths: DatasetPaths,
    source: String,
    options: PipelineOptions,
    store: JsonStore,
    failures: FailureQueue,
}

impl<F, E> Pipeline<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    pub fn new(
        fetcher: F,
        extractor: E,
        paths: DatasetPaths,
        source: impl Into<String>,
        options: PipelineOptions,
    ) -> Self {
        let store = JsonStore::new(paths.store(), paths.backup());
        let failures = FailureQueue::new(paths.failures());
        Self {
            fetcher,
            extractor,
            paths,
            source: source.into(),
            options,
            store,
            failures,
        }
    }

    /// Run one pass to completion.
    pub async fn run(&self, mode: RunMode) -> Result<RunSummary, PipelineError> {
        self.run_until(mode, std::future::pending()).await
    }

    /// Run one pass, stopping early (after a flush) when `shutdown` resolves.
    #[instrument(level = "info", skip_all, fields(dataset = %self.paths.dataset(), period = %self.paths.period(), mode = ?mode))]
    pub async fn run_until(
        &self,
        mode: RunMode,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PipelineError> {
        let t0 = Instant::now();
        let result = self.execute(mode, shutdown).await;
        match &result {
            Ok(summary) => {
                enter(RunPhase::Done);
                info!(
                    new = summary.new_records,
                    failed = summary.failed,
                    total_in_store = summary.total_in_store,
                    skipped = summary.skipped,
                    elapsed_secs = t0.elapsed().as_secs(),
                    "Run complete"
                );
            }
            Err(e) => {
                enter(RunPhase::Failed);
                error!(error = %e, elapsed_secs = t0.elapsed().as_secs(), "Run failed");
            }
        }
        result
    }

    async fn execute(
        &self,
        mode: RunMode,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PipelineError> {
        enter(RunPhase::LoadStore);
        let existing = self.load_store()?;

        enter(RunPhase::BuildIndex);
        let index = ProcessedIndex::build(&existing);

        enter(RunPhase::LoadFrontier);
        let Some(work) = self.load_work(mode)? else {
            return Ok(RunSummary {
                total_in_store: existing.len(),
                ..RunSummary::default()
            });
        };

        enter(RunPhase::Filter);
        let before = work.len();
        let work = index.filter(work);
        let skipped = before - work.len();
        info!(
            listed = before,
            indexed = index.len(),
            dropped = skipped,
            remaining = work.len(),
            "Filtered work list"
        );
        if work.is_empty() {
            info!("Nothing left to process");
            if mode == RunMode::Retry {
                self.failures.save(&[]).map_err(PipelineError::Persistence)?;
            }
            return Ok(RunSummary {
                total_in_store: existing.len(),
                skipped,
                ..RunSummary::default()
            });
        }

        enter(RunPhase::Process);
        let settings = match mode {
            RunMode::Primary => self.options.primary,
            RunMode::Retry => self.options.retry,
        };
        let attempted = work.len();
        let ctx = RunContext::new(&self.store, self.source.clone(), existing, self.options.checkpoints);

        let processing = AssertUnwindSafe(controller::process(
            &ctx,
            &self.fetcher,
            &self.extractor,
            work,
            settings,
        ))
        .catch_unwind();
        let interruption = tokio::select! {
            outcome = processing => outcome
                .err()
                .map(|panic| Interruption::Panic(panic_message(panic.as_ref()))),
            _ = shutdown => Some(Interruption::Shutdown),
        };

        enter(RunPhase::Flush);
        let state = ctx.into_state();
        let outstanding = match interruption {
            None => state.failures.clone(),
            Some(_) => self.outstanding_after_interruption(&state)?,
        };
        self.flush(&state, &outstanding)?;

        match interruption {
            None => Ok(RunSummary {
                attempted,
                new_records: state.new_records,
                failed: state.failures.len(),
                total_in_store: state.records.len(),
                skipped,
                checkpoints: state.checkpoints,
                backups: state.backups,
            }),
            Some(Interruption::Shutdown) => Err(PipelineError::Interrupted {
                saved: state.new_records,
            }),
            Some(Interruption::Panic(reason)) => Err(PipelineError::Aborted { reason }),
        }
    }

    /// LOAD_STORE, applying the corrupt-store policy.
    fn load_store(&self) -> Result<Vec<ExtractedRecord>, PipelineError> {
        match self.store.load() {
            Ok(records) => Ok(records),
            Err(e @ StoreError::Corrupt { .. }) => match self.options.corrupt_store {
                CorruptStorePolicy::Abort => Err(PipelineError::CorruptStore(e)),
                CorruptStorePolicy::Recover => {
                    warn!(path = %self.store.path().display(), error = %e, "Store is corrupt; recovering");
                    self.store
                        .quarantine(&self.paths.quarantine())
                        .map_err(PipelineError::Persistence)?;
                    match self.store.load_backup() {
                        Ok(records) if !records.is_empty() => {
                            warn!(
                                count = records.len(),
                                backup = %self.store.backup_path().display(),
                                "Recovered records from backup"
                            );
                            Ok(records)
                        }
                        Ok(_) => {
                            warn!("No backup available; starting with an empty store");
                            Ok(Vec::new())
                        }
                        Err(backup_err) => {
                            warn!(error = %backup_err, "Backup unreadable too; starting with an empty store");
                            Ok(Vec::new())
                        }
                    }
                }
            },
            Err(e) => Err(PipelineError::Persistence(e)),
        }
    }

    /// LOAD_FRONTIER. `None` means there is nothing to do.
    fn load_work(&self, mode: RunMode) -> Result<Option<Vec<Target>>, PipelineError> {
        match mode {
            RunMode::Primary => {
                let path = self.paths.frontier();
                match load_frontier(&path, self.paths.dataset()).map_err(PipelineError::Persistence)? {
                    Some(targets) => Ok(Some(targets)),
                    None => Err(PipelineError::Configuration(format!(
                        "frontier file {} not found; run frontier discovery first",
                        path.display()
                    ))),
                }
            }
            RunMode::Retry => {
                let urls = self.failures.load().map_err(PipelineError::Persistence)?;
                if urls.is_empty() {
                    info!(path = %self.failures.path().display(), "No failure queue; nothing to retry");
                    return Ok(None);
                }
                info!(count = urls.len(), "Loaded failure queue");
                let group = self.paths.dataset();
                Ok(Some(urls.into_iter().map(|u| Target::new(u, group)).collect()))
            }
        }
    }

    /// Failure queue contents for a pass that did not run to completion.
    ///
    /// Unattempted targets have no outcome yet, so the queue on disk is kept,
    /// this run's failures are added, and urls that now have a record are
    /// removed.
    fn outstanding_after_interruption(&self, state: &RunState) -> Result<Vec<String>, PipelineError> {
        let previous = self.failures.load().map_err(PipelineError::Persistence)?;
        let stored = ProcessedIndex::build(&state.records);
        let outstanding: Vec<String> = previous
            .into_iter()
            .chain(state.failures.iter().cloned())
            .filter(|u| !stored.contains(u))
            .unique()
            .collect();
        info!(outstanding = outstanding.len(), "Keeping unfinished failure queue entries");
        Ok(outstanding)
    }

    /// FLUSH: final store save, backup, and failure queue.
    ///
    /// Store and queue errors are run failures; a backup error is only logged.
    fn flush(&self, state: &RunState, outstanding: &[String]) -> Result<(), PipelineError> {
        let saved = self.store.save(&state.records);
        if let Err(e) = &saved {
            error!(error = %e, "Final store save failed");
        }
        if !state.records.is_empty() {
            if let Err(e) = self.store.save_backup(&state.records) {
                warn!(error = %e, "Final backup failed");
            }
        }
        let queued = self.failures.save(outstanding);
        if let Err(e) = &queued {
            error!(error = %e, "Failed to write failure queue");
        }
        saved.map_err(PipelineError::Persistence)?;
        queued.map_err(PipelineError::Persistence)?;
        info!(
            new = state.new_records,
            failed = state.failures.len(),
            queued = outstanding.len(),
            total = state.records.len(),
            "Flushed"
        );
        Ok(())
    }
}

/// Counts for a dataset, without fetching anything.
pub fn dataset_status(paths: &DatasetPaths) -> Result<DatasetStatus, PipelineError> {
    let records = JsonStore::new(paths.store(), paths.backup())
        .load()
        .map_err(PipelineError::Persistence)?;
    let index = ProcessedIndex::build(&records);
    let frontier =
        load_frontier(&paths.frontier(), paths.dataset()).map_err(PipelineError::Persistence)?;
    let pending = FailureQueue::new(paths.failures())
        .load()
        .map_err(PipelineError::Persistence)?;
    Ok(DatasetStatus {
        in_store: records.len(),
        frontier: frontier.as_ref().map(Vec::len),
        remaining: frontier.map(|f| index.filter(f).len()),
        pending_failures: pending.len(),
    })
}

fn enter(phase: RunPhase) {
    info!(%phase, "Entering phase");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
