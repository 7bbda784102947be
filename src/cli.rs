//! Command-line interface definitions for price_harvest.
//!
//! Options that tune the run can also be provided through environment
//! variables, so a scheduler can set them once per host.

use crate::controller::{CheckpointPolicy, PassSettings};
use crate::pipeline::{CorruptStorePolicy, PipelineOptions};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for price_harvest.
///
/// # Examples
///
/// ```sh
/// # Primary pass over this month's frontier, then retry what failed
/// price_harvest run --profile profiles/keramogranit.yaml --data-dir ./data --with-retry
///
/// # Retry pass for one regional sub-group
/// price_harvest retry --profile profiles/keramogranit.yaml --group Moscow
///
/// # What is left to do?
/// price_harvest status --profile profiles/keramogranit.yaml --period 09.2026
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process the frontier (urls not yet in the store)
    Run {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Chain a retry pass over the failure queue afterwards
        #[arg(long)]
        with_retry: bool,
    },
    /// Process only the failure queue left by an earlier run
    Retry {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Report store, frontier and failure-queue sizes without fetching
    Status {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
}

/// Which dataset files to work on.
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Site profile (YAML)
    #[arg(short, long)]
    pub profile: PathBuf,

    /// Directory holding the store, backup, frontier and failure queue
    #[arg(short, long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Dataset name used in file names (defaults to the profile's)
    #[arg(long)]
    pub dataset: Option<String>,

    /// Sub-group prefixed to the dataset name, e.g. a region
    #[arg(short, long)]
    pub group: Option<String>,

    /// Monitoring period tag (defaults to the current month, mm.YYYY)
    #[arg(long)]
    pub period: Option<String>,
}

impl DatasetArgs {
    /// `<group>_<dataset>` when a group is given, else the dataset itself.
    pub fn dataset_name(&self, profile_dataset: &str) -> String {
        let dataset = self.dataset.as_deref().unwrap_or(profile_dataset);
        match self.group.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => format!("{group}_{dataset}"),
            _ => dataset.to_string(),
        }
    }
}

/// Tuning for the primary and retry passes.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Maximum fetches in flight during the primary pass
    #[arg(short, long, env = "PRICE_HARVEST_CONCURRENCY", default_value_t = 6)]
    pub concurrency: usize,

    /// Maximum fetches in flight during the retry pass (default: half of --concurrency)
    #[arg(long)]
    pub retry_concurrency: Option<usize>,

    /// Time budget per target in seconds, shared by its fetch attempts
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Pause before each retry-pass fetch, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Save the store after this many new records
    #[arg(long, default_value_t = 50)]
    pub checkpoint_every: usize,

    /// Refresh the backup whenever the store size is a multiple of this
    #[arg(long, default_value_t = 1000)]
    pub backup_every: usize,

    /// Transport-level retries inside one fetch attempt
    #[arg(long, default_value_t = 0)]
    pub fetch_retries: usize,

    /// Fail instead of recovering when the store file is unreadable
    #[arg(long)]
    pub strict_store: bool,

    /// User-Agent header sent with every request
    #[arg(long, env = "PRICE_HARVEST_USER_AGENT")]
    pub user_agent: Option<String>,
}

impl RunArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Timeout for one HTTP attempt. With `--fetch-retries` the overall
    /// budget is split evenly so a timed-out attempt leaves room to retry.
    /// Backoff sleeps still count against the overall budget.
    pub fn attempt_timeout(&self) -> Duration {
        let attempts = u32::try_from(self.fetch_retries.saturating_add(1)).unwrap_or(u32::MAX);
        (self.timeout() / attempts).max(Duration::from_secs(1))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let timeout = self.timeout();
        PipelineOptions {
            primary: PassSettings {
                concurrency: self.concurrency.max(1),
                timeout,
                delay: Duration::ZERO,
            },
            retry: PassSettings {
                concurrency: self
                    .retry_concurrency
                    .unwrap_or(self.concurrency / 2)
                    .max(1),
                timeout,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            checkpoints: CheckpointPolicy {
                save_every: self.checkpoint_every,
                backup_every: self.backup_every,
            },
            corrupt_store: if self.strict_store {
                CorruptStorePolicy::Abort
            } else {
                CorruptStorePolicy::Recover
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::parse_from(["price_harvest", "run", "--profile", "p.yaml"]);

        let Command::Run { dataset, run, with_retry } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(dataset.profile, PathBuf::from("p.yaml"));
        assert_eq!(dataset.data_dir, PathBuf::from("."));
        assert!(!with_retry);
        assert_eq!(run.timeout_secs, 30);
        assert_eq!(run.checkpoint_every, 50);
        assert_eq!(run.backup_every, 1000);

        let options = run.pipeline_options();
        assert_eq!(options.primary.delay, Duration::ZERO);
        assert_eq!(options.retry.delay, Duration::from_millis(500));
        assert_eq!(options.retry.concurrency, (run.concurrency / 2).max(1));
        assert_eq!(options.corrupt_store, CorruptStorePolicy::Recover);
    }

    #[test]
    fn test_cli_retry_flags() {
        let cli = Cli::parse_from([
            "price_harvest",
            "retry",
            "-p",
            "p.yaml",
            "-d",
            "/tmp/data",
            "-g",
            "Moscow",
            "--concurrency",
            "1",
            "--strict-store",
            "--retry-delay-ms",
            "0",
        ]);

        let Command::Retry { dataset, run } = cli.command else {
            panic!("expected retry");
        };
        assert_eq!(dataset.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(dataset.dataset_name("obi"), "Moscow_obi");

        let options = run.pipeline_options();
        assert_eq!(options.primary.concurrency, 1);
        assert_eq!(options.retry.concurrency, 1);
        assert!(options.retry.delay.is_zero());
        assert_eq!(options.corrupt_store, CorruptStorePolicy::Abort);
    }

    #[test]
    fn test_dataset_name_override() {
        let cli = Cli::parse_from([
            "price_harvest",
            "status",
            "--profile",
            "p.yaml",
            "--dataset",
            "plitka",
            "--period",
            "09.2026",
        ]);
        let Command::Status { dataset } = cli.command else {
            panic!("expected status");
        };
        assert_eq!(dataset.dataset_name("obi"), "plitka");
        assert_eq!(dataset.period.as_deref(), Some("09.2026"));
    }

    #[test]
    fn test_attempt_timeout_splits_budget() {
        let cli = Cli::parse_from(["price_harvest", "run", "-p", "p.yaml", "--timeout-secs", "30"]);
        let Command::Run { run, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.attempt_timeout(), Duration::from_secs(30));

        let cli = Cli::parse_from([
            "price_harvest",
            "run",
            "-p",
            "p.yaml",
            "--timeout-secs",
            "30",
            "--fetch-retries",
            "2",
        ]);
        let Command::Run { run, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(run.pipeline_options().primary.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_profile_is_required() {
        assert!(Cli::try_parse_from(["price_harvest", "run"]).is_err());
    }
}
