//! # News Digest
//!
//! A news ingestion and deduplication pipeline that crawls a configurable
//! set of sites, filters out previously-seen articles against durable
//! history, summarizes what is genuinely new through a text-generation
//! provider, and writes a category-grouped Markdown digest.
//!
//! ## Features
//!
//! - Declarative source list: one `category|name|url|language|selector`
//!   line per site, with CSS (`structural-tree`) and regex (`pattern`)
//!   extraction engines
//! - Bounded concurrent crawling with per-source timeouts; one flaky site
//!   never aborts the run
//! - Durable dedup: a uniqueness-enforced reservation per article
//!   fingerprint, so overlapping runs never summarize (and pay for) the
//!   same article twice
//! - Provider-agnostic summarization (OpenAI-compatible or Anthropic) with
//!   exponential-backoff retries on transient failures
//!
//! ## Usage
//!
//! ```sh
//! news_digest -s site-list.txt -c config.yaml -o ./digest
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Registry**: Parse and validate the declarative source list
//! 2. **Crawl**: Fetch every source concurrently and extract candidates
//! 3. **Dedup**: Reserve genuinely-new fingerprints in the history store
//! 4. **Summarize**: Send new items to the provider (bounded pool)
//! 5. **Output**: Write the Markdown digest and log the run report

use clap::Parser;
use chrono::Local;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cli;
mod config;
mod crawl;
mod dedupe;
mod extract;
mod fingerprint;
mod models;
mod outputs;
mod pipeline;
mod registry;
mod store;
mod summarize;
mod utils;

use api::RetrySummarizer;
use cli::Cli;
use config::AppConfig;
use extract::HttpFetcher;
use pipeline::RunOptions;
use store::{HistoryStore, SledHistory};
use utils::ensure_writable_dir;

#[tokio::main]
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

    let start_time = std::time::Instant::now();
    info!("news_digest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.source_list, ?args.digest_output_dir, "Parsed CLI arguments");

    let config = AppConfig::load(args.config.as_deref())?;

    // Early check: ensure the digest output dir is writable
    if let Err(e) = ensure_writable_dir(&args.digest_output_dir).await {
        error!(
            path = %args.digest_output_dir,
            error = %e,
            "Digest output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Source registry ----
    let registry = registry::load_sources(&args.source_list)?;
    for rejection in &registry.rejected {
        warn!(
            line = rejection.line,
            reason = %rejection.reason,
            "Skipping malformed source line"
        );
    }

    // ---- History store ----
    // Without history we cannot tell new from known, and proceeding would
    // risk summarizing (and paying for) duplicates; abort before any
    // network traffic.
    let store_path = args
        .store_path
        .clone()
        .unwrap_or_else(|| config.store.path.clone());
    let store = SledHistory::open(&store_path)?;
    info!(path = %store_path, "History store opened");

    // ---- Inspection mode: list recent history and exit ----
    if let Some(limit) = args.show_recent {
        let recent = store.list_recent(limit)?;
        for record in &recent {
            println!(
                "{}  [{}] {}  {}",
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.category,
                record.title,
                record.link.as_deref().unwrap_or("-"),
            );
        }
        info!(count = recent.len(), "Listed recent history records");
        return Ok(());
    }

    // ---- Fetcher and provider ----
    let fetcher = HttpFetcher::new(&config.crawler.user_agent)?;
    let provider = api::build_provider(&config.provider)?;
    let summarizer = RetrySummarizer::new(
        provider,
        config.provider.max_attempts,
        Duration::from_secs(1),
    );
    info!(
        provider = summarizer.provider_name(),
        model = %config.provider.model,
        "Provider configured"
    );

    // ---- Run the pipeline ----
    let options = RunOptions::from_config(&config, args.run_timeout_secs);
    let output = pipeline::run(
        &registry.sources,
        &fetcher,
        &summarizer,
        &store,
        &options,
    )
    .await;

    // ---- Digest output ----
    if output.records.is_empty() {
        info!("No new records this run; skipping digest output");
    } else {
        let local_date = Local::now().date_naive().to_string();
        let path =
            outputs::markdown::write_digest(&output.records, &args.digest_output_dir, &local_date)
                .await?;
        info!(path = %path, records = output.records.len(), "Digest written");
    }

    let report = &output.report;
    let elapsed = start_time.elapsed();
    info!(
        sources_attempted = report.sources_attempted,
        sources_failed = report.sources_failed,
        candidates_found = report.candidates_found,
        known_skipped = report.known_skipped,
        store_failures = report.store_failures,
        new_items = report.new_items,
        summarized = report.summarized,
        summary_failures = report.summary_failures,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Run complete"
    );

    Ok(())
}
