//! Summarizer: drive newly accepted items through the text-generation
//! provider and fold the results back into durable history.
//!
//! Items are independent, so provider calls run through a bounded pool the
//! same way crawling does. Per item the lifecycle is
//! `Reserved → Summarizing → {Summarized | SummaryFailed}`: on success the
//! store record gains its summary; on a non-retryable provider error the
//! record is flagged failed and keeps its reservation, so the article is
//! never re-fetched as new; it simply reaches the digest with no summary.
//!
//! A run-level deadline stops dispatching new provider calls; items that
//! never got their turn stay reserved-but-unsummarized for the next run.

use crate::api::RetrySummarizer;
use crate::dedupe::NewItem;
use crate::models::{NewsRecord, SummaryResult, SummaryState};
use crate::store::HistoryStore;
use crate::utils::remaining_budget;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Summarization-stage tuning, resolved from
/// [`crate::config::ProviderConfig`].
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub concurrency: usize,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    /// Target summary length fed to the prompt, in characters.
    pub summary_chars: usize,
}

/// What the summarization stage produced for the digest and the run report.
#[derive(Debug, Default)]
pub struct SummarizeOutput {
    /// One record per attempted item, summarized or flagged; items skipped
    /// by the run deadline are counted in `failures` but carry no record.
    pub records: Vec<NewsRecord>,
    pub summarized: usize,
    pub failures: usize,
}

/// Build the provider prompt for one item.
pub fn build_prompt(item: &NewItem, summary_chars: usize) -> String {
    let mut prompt = format!(
        "Summarize this {} news item in at most {} characters.\n\nTitle: {}\n",
        item.item.category, summary_chars, item.item.title
    );
    if let Some(snippet) = &item.item.snippet {
        prompt.push_str(&format!("Teaser: {snippet}\n"));
    }
    if let Some(link) = &item.item.link {
        prompt.push_str(&format!("Link: {link}\n"));
    }
    prompt.push_str(
        "\nKeep key figures and dates, say why it matters, and write plain prose \
         with no preamble.",
    );
    prompt
}

enum ItemResult {
    Summarized(NewsRecord),
    Failed(NewsRecord),
    /// Run deadline expired before this item's provider call started.
    Skipped,
}

fn record_for(new_item: &NewItem, summary: Option<String>, state: SummaryState) -> NewsRecord {
    NewsRecord {
        id: new_item.record_id,
        title: new_item.item.title.clone(),
        link: new_item.item.link.as_ref().map(|link| link.to_string()),
        source: new_item.item.source_name.clone(),
        category: new_item.item.category.clone(),
        fingerprint: new_item.fingerprint.clone(),
        summary,
        summary_state: state,
        created_at: Utc::now(),
    }
}

/// Summarize every new item, bounded by the pool size and the run deadline.
#[instrument(level = "info", skip_all, fields(items = fresh.len()))]
pub async fn summarize_new_items(
    summarizer: &RetrySummarizer,
    store: &dyn HistoryStore,
    fresh: Vec<NewItem>,
    options: &SummarizeOptions,
    deadline: Option<Instant>,
) -> SummarizeOutput {
    let results: Vec<ItemResult> = stream::iter(fresh.iter())
        .map(|new_item| summarize_one(summarizer, store, new_item, options, deadline))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut output = SummarizeOutput::default();
    for result in results {
        match result {
            ItemResult::Summarized(record) => {
                output.summarized += 1;
                output.records.push(record);
            }
            ItemResult::Failed(record) => {
                output.failures += 1;
                output.records.push(record);
            }
            ItemResult::Skipped => output.failures += 1,
        }
    }

    info!(
        summarized = output.summarized,
        failures = output.failures,
        "Summarization completed"
    );
    output
}

async fn summarize_one(
    summarizer: &RetrySummarizer,
    store: &dyn HistoryStore,
    new_item: &NewItem,
    options: &SummarizeOptions,
    deadline: Option<Instant>,
) -> ItemResult {
    let Some(budget) = remaining_budget(options.request_timeout, deadline) else {
        warn!(
            title = %new_item.item.title,
            "Run deadline reached; leaving item reserved and unsummarized"
        );
        return ItemResult::Skipped;
    };

    let prompt = build_prompt(new_item, options.summary_chars);
    match summarizer
        .summarize(&prompt, options.max_tokens, budget)
        .await
    {
        Ok(reply) => {
            let result = SummaryResult {
                fingerprint: new_item.fingerprint.clone(),
                summary_text: reply.text,
                provider_latency_ms: reply.latency_ms,
                attempts: reply.attempts,
            };
            info!(
                title = %new_item.item.title,
                attempts = result.attempts,
                latency_ms = result.provider_latency_ms,
                "Item summarized"
            );
            if let Err(e) = store.update_summary(&new_item.fingerprint, &result.summary_text) {
                warn!(
                    title = %new_item.item.title,
                    error = %e,
                    "Summary produced but could not be persisted; counting item as failed"
                );
                return ItemResult::Failed(record_for(new_item, None, SummaryState::Failed));
            }
            ItemResult::Summarized(record_for(
                new_item,
                Some(result.summary_text),
                SummaryState::Summarized,
            ))
        }
        Err(e) => {
            warn!(
                title = %new_item.item.title,
                error = %e,
                transient = e.is_transient(),
                "Summarization failed for item"
            );
            if let Err(store_err) = store.mark_summary_failed(&new_item.fingerprint) {
                warn!(
                    title = %new_item.item.title,
                    error = %store_err,
                    "Could not flag failed summary in history"
                );
            }
            ItemResult::Failed(record_for(new_item, None, SummaryState::Failed))
        }
    }
}
