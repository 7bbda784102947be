//! # price_harvest
//!
//! Resumable, concurrent price monitoring for e-commerce catalogs.
//!
//! A frontier file lists the product urls of one shop (or one regional
//! sub-group of it) for the current monitoring period. Each run fetches the
//! urls that are not yet in the period's JSON store, extracts product fields
//! with a YAML site profile, and appends one flat record per product.
//! Anything that failed goes to a failure queue for the next retry pass.
//!
//! ## Usage
//!
//! ```sh
//! price_harvest run --profile profiles/keramogranit.yaml --data-dir ./data --with-retry
//! price_harvest status --profile profiles/keramogranit.yaml --data-dir ./data
//! ```
//!
//! ## Architecture
//!
//! 1. **Load**: read the store (recovering from a corrupt file) and index its urls
//! 2. **Filter**: drop frontier urls already in the store
//! 3. **Process**: fetch and extract with bounded concurrency, checkpointing every 50 records
//! 4. **Flush**: final atomic save, backup, and failure queue
//!
//! Re-running is always safe: an interrupted run resumes where the last
//! checkpoint left off.

use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod controller;
mod error;
mod extract;
mod fetch;
mod frontier;
mod index;
mod models;
mod paths;
mod pipeline;
mod store;
mod utils;

#[cfg(test)]
mod test_support;

use cli::{Cli, Command, DatasetArgs, RunArgs};
use extract::profile::SiteProfile;
use extract::selector::SelectorExtractor;
use fetch::{AnyFetcher, HttpFetcher, DEFAULT_USER_AGENT};
use paths::{current_period, DatasetPaths};
use pipeline::{dataset_status, Pipeline, RunMode, RunSummary};
use utils::{ensure_writable_dir, format_elapsed};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "price_harvest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let outcome = match args.command {
        Command::Run {
            dataset,
            run,
            with_retry,
        } => harvest(&dataset, &run, with_retry).await,
        Command::Retry { dataset, run } => retry(&dataset, &run).await,
        Command::Status { dataset } => status(&dataset),
    };

    let elapsed = start_time.elapsed();
    match &outcome {
        Ok(()) => info!(elapsed = %format_elapsed(elapsed), "Execution complete"),
        Err(e) => error!(error = %e, elapsed = %format_elapsed(elapsed), "Execution failed"),
    }
    outcome
}

/// Profile and file layout shared by every subcommand.
fn open_dataset(args: &DatasetArgs) -> Result<(SiteProfile, DatasetPaths), Box<dyn Error>> {
    let profile = SiteProfile::load(&args.profile)?;
    let dataset = args.dataset_name(&profile.dataset);
    let period = args.period.clone().unwrap_or_else(current_period);
    let paths = DatasetPaths::new(&args.data_dir, period, dataset);
    info!(
        dataset = %paths.dataset(),
        period = %paths.period(),
        data_dir = %paths.dir().display(),
        "Dataset selected"
    );
    Ok((profile, paths))
}

fn build_pipeline(
    dataset: &DatasetArgs,
    run: &RunArgs,
) -> Result<Pipeline<AnyFetcher<HttpFetcher>, SelectorExtractor>, Box<dyn Error>> {
    let (profile, paths) = open_dataset(dataset)?;

    if let Err(e) = ensure_writable_dir(paths.dir()) {
        error!(
            path = %paths.dir().display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(Box::new(e));
    }

    let extractor = SelectorExtractor::from_profile(&profile)?;
    let user_agent = run.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    let http = HttpFetcher::new(user_agent, run.attempt_timeout())?;
    let fetcher = AnyFetcher::with_retries(http, run.fetch_retries);

    Ok(Pipeline::new(
        fetcher,
        extractor,
        paths,
        profile.source,
        run.pipeline_options(),
    ))
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Ctrl-C received; flushing and stopping"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C; run cannot be interrupted cleanly");
            std::future::pending::<()>().await;
        }
    }
}

fn log_summary(mode: RunMode, summary: &RunSummary) {
    info!(
        ?mode,
        attempted = summary.attempted,
        new = summary.new_records,
        failed = summary.failed,
        skipped = summary.skipped,
        total_in_store = summary.total_in_store,
        checkpoints = summary.checkpoints.len(),
        backups = summary.backups.len(),
        "Pass summary"
    );
}

async fn harvest(dataset: &DatasetArgs, run: &RunArgs, with_retry: bool) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(dataset, run)?;

    let summary = pipeline.run_until(RunMode::Primary, shutdown_signal()).await?;
    log_summary(RunMode::Primary, &summary);

    if with_retry && summary.failed > 0 {
        info!(pending = summary.failed, "Chaining retry pass");
        let summary = pipeline.run_until(RunMode::Retry, shutdown_signal()).await?;
        log_summary(RunMode::Retry, &summary);
    }
    Ok(())
}

async fn retry(dataset: &DatasetArgs, run: &RunArgs) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(dataset, run)?;
    let summary = pipeline.run_until(RunMode::Retry, shutdown_signal()).await?;
    log_summary(RunMode::Retry, &summary);
    Ok(())
}

fn status(dataset: &DatasetArgs) -> Result<(), Box<dyn Error>> {
    let (_, paths) = open_dataset(dataset)?;
    let report = dataset_status(&paths)?;

    let frontier = report
        .frontier
        .map_or_else(|| "absent".to_string(), |n| n.to_string());
    let remaining = report
        .remaining
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    info!(
        in_store = report.in_store,
        frontier = %frontier,
        remaining = %remaining,
        pending_failures = report.pending_failures,
        "Dataset status"
    );
    println!(
        "{}: {} in store, frontier {}, remaining {}, pending failures {}",
        paths.dataset(),
        report.in_store,
        frontier,
        remaining,
        report.pending_failures
    );
    Ok(())
}
