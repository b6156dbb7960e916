//! Crawl coordinator: concurrent extraction across all registered sources.
//!
//! One extractor invocation per source, run through a bounded worker pool so
//! a run never holds more than a handful of outbound connections. Transient
//! failures (`Timeout`, `NetworkError`) get exactly one retry after a fixed
//! short backoff; structural failures (`SelectorMismatch`, `ParseError`) do
//! not, since retrying will not help. A source's failure never cancels or delays
//! the others; it is collected into the outcome report instead.
//!
//! The aggregated candidate list carries no cross-source order (sources
//! complete in whatever order the pool yields), but within one source the
//! extraction order is preserved.

use crate::extract::{extract, FetchFailure, FetchPage};
use crate::models::{CandidateItem, FetchOutcome, SourceDescriptor, SourceReport};
use crate::utils::remaining_budget;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Crawl-stage tuning, resolved from [`crate::config::CrawlerConfig`].
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub concurrency: usize,
    pub source_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_items_per_source: usize,
}

/// Everything the crawl stage hands downstream: the combined candidate list
/// and exactly one report per source.
#[derive(Debug)]
pub struct CrawlOutput {
    pub candidates: Vec<CandidateItem>,
    pub reports: Vec<SourceReport>,
}

/// Run the extractor over every descriptor concurrently.
///
/// `deadline`, when set, is the run-level cutoff: sources that have not
/// started by then report `Timeout` without a fetch, and in-flight budgets
/// are clipped so nothing runs meaningfully past it.
#[instrument(level = "info", skip_all, fields(sources = descriptors.len()))]
pub async fn crawl(
    fetcher: &dyn FetchPage,
    descriptors: &[SourceDescriptor],
    options: &CrawlOptions,
    deadline: Option<Instant>,
) -> CrawlOutput {
    let results: Vec<(Vec<CandidateItem>, SourceReport)> = stream::iter(descriptors)
        .map(|descriptor| crawl_one(fetcher, descriptor, options, deadline))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut candidates = Vec::new();
    let mut reports = Vec::with_capacity(results.len());
    for (mut items, report) in results {
        candidates.append(&mut items);
        reports.push(report);
    }

    let failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
    info!(
        candidates = candidates.len(),
        sources = reports.len(),
        failed,
        "Crawl completed"
    );

    CrawlOutput { candidates, reports }
}

async fn crawl_one(
    fetcher: &dyn FetchPage,
    descriptor: &SourceDescriptor,
    options: &CrawlOptions,
    deadline: Option<Instant>,
) -> (Vec<CandidateItem>, SourceReport) {
    let mut attempts = 0u32;

    loop {
        let Some(budget) = remaining_budget(options.source_timeout, deadline) else {
            // Run deadline hit before this source got its turn.
            return (
                Vec::new(),
                SourceReport {
                    source: descriptor.name.clone(),
                    outcome: FetchOutcome::Timeout,
                    attempts,
                },
            );
        };

        attempts += 1;
        let attempt = tokio::time::timeout(
            budget,
            extract(fetcher, descriptor, budget, options.max_items_per_source),
        )
        .await;

        let failure = match attempt {
            Ok(Ok(items)) => {
                info!(
                    source = %descriptor.name,
                    items = items.len(),
                    attempts,
                    "Source crawled"
                );
                let report = SourceReport {
                    source: descriptor.name.clone(),
                    outcome: FetchOutcome::Success { items: items.len() },
                    attempts,
                };
                return (items, report);
            }
            Ok(Err(failure)) => failure,
            Err(_elapsed) => FetchFailure::Timeout,
        };

        let retry = failure.is_transient() && attempts == 1;
        warn!(
            source = %descriptor.name,
            error = %failure,
            attempts,
            retry,
            "Source crawl attempt failed"
        );

        if !retry {
            return (
                Vec::new(),
                SourceReport {
                    source: descriptor.name.clone(),
                    outcome: failure.outcome(),
                    attempts,
                },
            );
        }
        tokio::time::sleep(options.retry_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectorLanguage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use url::Url;

    fn descriptor(name: &str, host: &str) -> SourceDescriptor {
        SourceDescriptor {
            category: "AI".to_string(),
            name: name.to_string(),
            url: Url::parse(&format!("https://{host}")).unwrap(),
            selector_language: SelectorLanguage::StructuralTree,
            item_selector: "a.story".to_string(),
        }
    }

    fn options() -> CrawlOptions {
        CrawlOptions {
            concurrency: 4,
            source_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(1),
            max_items_per_source: 10,
        }
    }

    /// Scripted fetcher: responds per host, based on how many times that
    /// host has been asked so far.
    struct Scripted<F>(Mutex<HashMap<String, u32>>, F);

    impl<F> Scripted<F>
    where
        F: Fn(&str, u32) -> Result<String, FetchFailure> + Send + Sync,
    {
        fn new(f: F) -> Self {
            Self(Mutex::new(HashMap::new()), f)
        }
    }

    #[async_trait]
    impl<F> FetchPage for Scripted<F>
    where
        F: Fn(&str, u32) -> Result<String, FetchFailure> + Send + Sync,
    {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<String, FetchFailure> {
            let host = url.host_str().unwrap_or_default().to_string();
            let mut calls = self.0.lock().unwrap();
            let call = calls.entry(host.clone()).or_insert(0);
            *call += 1;
            (self.1)(&host, *call)
        }
    }

    fn page(titles: &[&str]) -> String {
        titles
            .iter()
            .map(|t| format!(r#"<a class="story" href="/{t}">{t}</a>"#))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn a_broken_source_never_hides_a_healthy_one() {
        let fetcher = Scripted::new(|host, _call| {
            if host == "a.test" {
                Err(FetchFailure::Network("connection refused".to_string()))
            } else {
                Ok(page(&["one", "two"]))
            }
        });
        let sources = [descriptor("A", "a.test"), descriptor("B", "b.test")];

        let output = crawl(&fetcher, &sources, &options(), None).await;

        assert_eq!(output.candidates.len(), 2);
        assert!(output.candidates.iter().all(|c| c.source_name == "B"));

        assert_eq!(output.reports.len(), 2);
        let a = output.reports.iter().find(|r| r.source == "A").unwrap();
        assert_eq!(a.outcome, FetchOutcome::NetworkError);
        assert_eq!(a.attempts, 2); // one retry for the transient class
        let b = output.reports.iter().find(|r| r.source == "B").unwrap();
        assert_eq!(b.outcome, FetchOutcome::Success { items: 2 });
        assert_eq!(b.attempts, 1);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_the_single_retry() {
        let fetcher = Scripted::new(|_host, call| {
            if call == 1 {
                Err(FetchFailure::Timeout)
            } else {
                Ok(page(&["late"]))
            }
        });
        let sources = [descriptor("Flaky", "flaky.test")];

        let output = crawl(&fetcher, &sources, &options(), None).await;

        assert_eq!(output.candidates.len(), 1);
        assert_eq!(output.reports[0].outcome, FetchOutcome::Success { items: 1 });
        assert_eq!(output.reports[0].attempts, 2);
    }

    #[tokio::test]
    async fn structural_failures_are_not_retried() {
        let fetcher = Scripted::new(|_host, _call| Ok("not empty but no stories".to_string()));
        let mut source = descriptor("Bad", "bad.test");
        source.item_selector = ":::nope".to_string();

        let output = crawl(&fetcher, &[source], &options(), None).await;

        assert!(matches!(
            output.reports[0].outcome,
            FetchOutcome::SelectorMismatch { .. }
        ));
        assert_eq!(output.reports[0].attempts, 1);
    }

    #[tokio::test]
    async fn empty_page_reports_success_zero() {
        let fetcher = Scripted::new(|_host, _call| Ok("<html><body></body></html>".to_string()));
        let output = crawl(&fetcher, &[descriptor("Quiet", "quiet.test")], &options(), None).await;
        assert_eq!(output.reports[0].outcome, FetchOutcome::Success { items: 0 });
        assert!(output.candidates.is_empty());
    }

    #[tokio::test]
    async fn within_source_order_is_preserved() {
        let fetcher = Scripted::new(|_host, _call| Ok(page(&["first", "second", "third"])));
        let output = crawl(&fetcher, &[descriptor("Ordered", "o.test")], &options(), None).await;
        let titles: Vec<&str> = output.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn expired_deadline_reports_timeouts_without_fetching() {
        let fetcher = Scripted::new(|_host, _call| {
            panic!("no fetch should happen after the deadline");
        });
        let deadline = Some(Instant::now() - Duration::from_millis(10));

        let output = crawl(&fetcher, &[descriptor("Late", "late.test")], &options(), deadline).await;

        assert_eq!(output.reports[0].outcome, FetchOutcome::Timeout);
        assert_eq!(output.reports[0].attempts, 0);
    }

    #[tokio::test]
    async fn every_source_reports_exactly_once() {
        let fetcher = Scripted::new(|host, _call| match host {
            "ok.test" => Ok(page(&["x"])),
            "parse.test" => Err(FetchFailure::Parse("garbage".to_string())),
            _ => Err(FetchFailure::Network("down".to_string())),
        });
        let sources = [
            descriptor("Ok", "ok.test"),
            descriptor("Parse", "parse.test"),
            descriptor("Down", "down.test"),
        ];

        let output = crawl(&fetcher, &sources, &options(), None).await;

        assert_eq!(output.reports.len(), 3);
        let mut names: Vec<&str> = output.reports.iter().map(|r| r.source.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Down", "Ok", "Parse"]);
    }
}
