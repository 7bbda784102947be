//! Bounded-concurrency processing of targets.
//!
//! One controller serves both passes. The primary pass and the retry pass
//! differ only in [`PassSettings`]: the retry pass runs with fewer slots
//! and a fixed delay before each item.
//!
//! All mutable run state lives in a [`RunContext`] behind a single lock.
//! Appending a result, appending a failure, and the checkpoint decisions
//! that depend on the counters all happen under that lock, so checkpoint
//! cadence is exact under concurrency. Saves are performed while holding
//! it; they are periodic, so the critical section stays short on average.

use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::models::{ExtractedRecord, MonitoringStamp, Target};
use crate::store::JsonStore;
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// How often the store is saved and backed up during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Save after this many new records.
    pub save_every: usize,
    /// Back up whenever the total record count is a multiple of this.
    pub backup_every: usize,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            save_every: 50,
            backup_every: 1000,
        }
    }
}

/// Per-pass knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSettings {
    /// Maximum fetches in flight.
    pub concurrency: usize,
    /// Upper bound for a single fetch.
    pub timeout: Duration,
    /// Pause taken inside the slot before each fetch.
    pub delay: Duration,
}

/// Accumulators guarded by the run lock.
#[derive(Debug, Default)]
pub struct RunState {
    /// Existing records followed by this run's results.
    pub records: Vec<ExtractedRecord>,
    /// Urls that did not yield a record during this run.
    pub failures: Vec<String>,
    /// Records appended by this run.
    pub new_records: usize,
    since_checkpoint: usize,
    /// `new_records` values at which a checkpoint save was attempted.
    pub checkpoints: Vec<usize>,
    /// Total record counts at which a backup was attempted.
    pub backups: Vec<usize>,
    /// Targets finished (either way), for progress logs.
    pub finished: usize,
}

/// Everything one run shares between its workers.
///
/// Built per run from the loaded store snapshot and dropped at the end.
#[derive(Debug)]
pub struct RunContext<'a> {
    store: &'a JsonStore,
    source: String,
    policy: CheckpointPolicy,
    state: Mutex<RunState>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        store: &'a JsonStore,
        source: impl Into<String>,
        existing: Vec<ExtractedRecord>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            store,
            source: source.into(),
            policy,
            state: Mutex::new(RunState {
                records: existing,
                ..RunState::default()
            }),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn into_state(self) -> RunState {
        self.state.into_inner()
    }

    async fn record_success(&self, record: ExtractedRecord, total_targets: usize) {
        let mut state = self.state.lock().await;
        state.records.push(record);
        state.new_records += 1;
        state.since_checkpoint += 1;
        state.finished += 1;

        if self.policy.save_every > 0 && state.since_checkpoint >= self.policy.save_every {
            state.since_checkpoint = 0;
            let at = state.new_records;
            state.checkpoints.push(at);
            match self.store.save(&state.records) {
                Ok(()) => info!(new = at, total = state.records.len(), "Checkpoint saved"),
                Err(e) => warn!(new = at, error = %e, "Checkpoint save failed; continuing"),
            }
        }

        let total = state.records.len();
        if self.policy.backup_every > 0 && total % self.policy.backup_every == 0 {
            state.backups.push(total);
            if let Err(e) = self.store.save_backup(&state.records) {
                warn!(total, error = %e, "Backup failed; continuing");
            }
        }

        info!(
            done = state.finished,
            of = total_targets,
            in_store = total,
            "Processed"
        );
    }

    async fn record_failure(&self, url: &str, reason: &str, total_targets: usize) {
        let mut state = self.state.lock().await;
        state.failures.push(url.to_string());
        state.finished += 1;
        warn!(
            %url,
            reason = %truncate_for_log(reason, 120),
            done = state.finished,
            of = total_targets,
            "Target failed"
        );
    }
}

/// Fetch and extract one target. `Err` carries the failure reason.
async fn attempt<F, E>(
    fetcher: &F,
    extractor: &E,
    target: &Target,
    source: &str,
    settings: PassSettings,
) -> Result<ExtractedRecord, String>
where
    F: Fetcher,
    E: Extractor,
{
    if !settings.delay.is_zero() {
        sleep(settings.delay).await;
    }

    let page = match timeout(settings.timeout, fetcher.fetch(&target.url)).await {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => return Err(format!("fetch: {e}")),
        Err(_) => return Err(format!("fetch: timed out after {:?}", settings.timeout)),
    };
    debug!(url = %target.url, status = page.status, bytes = page.body.len(), "Fetched");

    let fields = extractor.extract(&page).map_err(|e| {
        if e.is_missing_identity() {
            debug!(url = %target.url, "No product identity on page");
        }
        format!("extract: {e}")
    })?;
    let (named, attributes) = fields.into_values();
    Ok(ExtractedRecord::assemble(
        target,
        named,
        attributes,
        source,
        &MonitoringStamp::now(),
    ))
}

/// Process every target with at most `settings.concurrency` in flight.
///
/// Results and failures are appended to `ctx` as they complete; completion
/// order is not preserved.
pub async fn process<F, E>(
    ctx: &RunContext<'_>,
    fetcher: &F,
    extractor: &E,
    targets: Vec<Target>,
    settings: PassSettings,
) where
    F: Fetcher,
    E: Extractor,
{
    let total = targets.len();
    let slots = settings.concurrency.max(1);
    info!(targets = total, concurrency = slots, delay = ?settings.delay, "Processing targets");

    stream::iter(targets)
        .map(|target| async move {
            let outcome = attempt(fetcher, extractor, &target, ctx.source(), settings).await;
            (target, outcome)
        })
        .buffer_unordered(slots)
        .for_each(|(target, outcome)| async move {
            match outcome {
                Ok(record) => {
                    debug!(url = %target.url, group = %target.group_key, "Extracted record");
                    ctx.record_success(record, total).await;
                }
                Err(reason) => ctx.record_failure(&target.url, &reason, total).await,
            }
        })
        .await;
}
