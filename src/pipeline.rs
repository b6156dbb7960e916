//! Run orchestration: registry output in, digest-ready records and a run
//! report out.
//!
//! Stage sequence per run: crawl → dedup → summarize. The two network
//! stages share a run-level deadline; when it expires, whatever completed is
//! still returned: fewer items and more flagged records, never a discarded
//! run. Dedup is a synchronous pass between them.

use crate::api::RetrySummarizer;
use crate::config::AppConfig;
use crate::crawl::{crawl, CrawlOptions};
use crate::dedupe::dedupe;
use crate::extract::FetchPage;
use crate::models::{NewsRecord, RunReport};
use crate::store::HistoryStore;
use crate::summarize::{summarize_new_items, SummarizeOptions};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{instrument, warn};

/// Resolved per-run options for both bounded stages.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub crawl: CrawlOptions,
    pub summarize: SummarizeOptions,
    pub run_timeout: Option<Duration>,
}

impl RunOptions {
    /// Resolve options from configuration, with an optional CLI override
    /// for the run timeout.
    pub fn from_config(config: &AppConfig, run_timeout_secs: Option<u64>) -> Self {
        Self {
            crawl: CrawlOptions {
                concurrency: config.crawler.concurrency,
                source_timeout: Duration::from_secs(config.crawler.timeout_secs),
                retry_backoff: Duration::from_millis(config.crawler.retry_backoff_ms),
                max_items_per_source: config.crawler.max_items_per_source,
            },
            summarize: SummarizeOptions {
                concurrency: config.provider.concurrency,
                max_tokens: config.provider.max_tokens,
                request_timeout: Duration::from_secs(config.provider.timeout_secs),
                summary_chars: config.provider.summary_chars,
            },
            run_timeout: run_timeout_secs
                .or(config.run.timeout_secs)
                .map(Duration::from_secs),
        }
    }
}

/// What one run hands back: records for the digest assembler and counts for
/// whoever is watching.
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    pub records: Vec<NewsRecord>,
}

/// Execute one full pipeline run.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn run(
    sources: &[crate::models::SourceDescriptor],
    fetcher: &dyn FetchPage,
    summarizer: &RetrySummarizer,
    store: &dyn HistoryStore,
    options: &RunOptions,
) -> RunOutput {
    let deadline = options.run_timeout.map(|timeout| Instant::now() + timeout);

    let crawl_output = crawl(fetcher, sources, &options.crawl, deadline).await;
    // successes are logged by the coordinator as they complete; surface the
    // failures once, together
    for report in &crawl_output.reports {
        if !report.outcome.is_success() {
            warn!(
                source = %report.source,
                outcome = %report.outcome,
                attempts = report.attempts,
                "Source failed this run"
            );
        }
    }

    let sources_attempted = crawl_output.reports.len();
    let sources_failed = crawl_output
        .reports
        .iter()
        .filter(|report| !report.outcome.is_success())
        .count();
    let candidates_found = crawl_output.candidates.len();

    let dedupe_outcome = dedupe(store, crawl_output.candidates);
    let new_items = dedupe_outcome.fresh.len();

    let summarize_output = summarize_new_items(
        summarizer,
        store,
        dedupe_outcome.fresh,
        &options.summarize,
        deadline,
    )
    .await;

    let report = RunReport {
        sources_attempted,
        sources_failed,
        candidates_found,
        known_skipped: dedupe_outcome.known,
        store_failures: dedupe_outcome.store_failures,
        new_items,
        summarized: summarize_output.summarized,
        summary_failures: summarize_output.failures,
    };

    RunOutput {
        report,
        records: summarize_output.records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ProviderError, SummaryProvider};
    use crate::extract::FetchFailure;
    use crate::models::SummaryState;
    use crate::registry::parse_source_list;
    use crate::store::SledHistory;
    use async_trait::async_trait;
    use std::sync::Arc;
    use url::Url;

    struct OnePage(&'static str);

    #[async_trait]
    impl crate::extract::FetchPage for OnePage {
        async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<String, FetchFailure> {
            Ok(self.0.to_string())
        }
    }

    struct Echo;

    #[async_trait]
    impl SummaryProvider for Echo {
        async fn summarize(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<String, ProviderError> {
            Ok("summary".to_string())
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn test_options() -> RunOptions {
        let mut options = RunOptions::from_config(&AppConfig::default(), None);
        options.crawl.retry_backoff = Duration::from_millis(1);
        options
    }

    fn summarizer() -> RetrySummarizer {
        RetrySummarizer::new(Arc::new(Echo), 2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn tracking_variants_collapse_into_one_summarized_record() {
        // the full path: registry line → extraction → dedup → summarization
        let registry =
            parse_source_list("ROBOTICS|TestSite|https://example.test|structural-tree|article\n");
        let page = r#"
            <article><h2>Same Article</h2><a href="/a?utm=1">go</a></article>
            <article><h2>Same Article</h2><a href="/a?utm=2">go</a></article>
        "#;
        let dir = tempfile::tempdir().unwrap();
        let store = SledHistory::open(dir.path().join("history")).unwrap();

        let output = run(
            &registry.sources,
            &OnePage(page),
            &summarizer(),
            &store,
            &test_options(),
        )
        .await;

        assert_eq!(output.report.candidates_found, 2);
        assert_eq!(output.report.new_items, 1);
        assert_eq!(output.report.known_skipped, 1);
        assert_eq!(output.report.summarized, 1);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].summary_state, SummaryState::Summarized);
    }

    #[tokio::test]
    async fn a_second_unchanged_run_finds_nothing_new() {
        let registry =
            parse_source_list("AI|Wire|https://example.test|structural-tree|a.story\n");
        let page = r#"<a class="story" href="/one">One</a>
                      <a class="story" href="/two">Two</a>"#;
        let dir = tempfile::tempdir().unwrap();
        let store = SledHistory::open(dir.path().join("history")).unwrap();

        let first = run(
            &registry.sources,
            &OnePage(page),
            &summarizer(),
            &store,
            &test_options(),
        )
        .await;
        assert_eq!(first.report.new_items, 2);
        assert_eq!(first.report.summarized, 2);

        let second = run(
            &registry.sources,
            &OnePage(page),
            &summarizer(),
            &store,
            &test_options(),
        )
        .await;
        assert_eq!(second.report.candidates_found, 2);
        assert_eq!(second.report.new_items, 0);
        assert_eq!(second.report.known_skipped, 2);
        assert!(second.records.is_empty());
    }

    #[tokio::test]
    async fn report_counts_cover_every_source() {
        let registry = parse_source_list(
            "AI|Wire|https://example.test|structural-tree|a.story\n\
             AI|Broken|https://example.test/broken|structural-tree|:::nope\n",
        );
        let page = r#"<a class="story" href="/one">One</a>"#;
        let dir = tempfile::tempdir().unwrap();
        let store = SledHistory::open(dir.path().join("history")).unwrap();

        let output = run(
            &registry.sources,
            &OnePage(page),
            &summarizer(),
            &store,
            &test_options(),
        )
        .await;

        assert_eq!(output.report.sources_attempted, 2);
        assert_eq!(output.report.sources_failed, 1);
        assert_eq!(output.report.candidates_found, 1);
        assert_eq!(output.report.summarized, 1);
    }
}
