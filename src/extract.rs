//! Selector-driven extraction of candidate items from one source page.
//!
//! Extraction is one network fetch bounded by a timeout, followed by the
//! selector engine the source declared:
//!
//! - `structural-tree`: a CSS selector names the item containers; within each
//!   container the title is the first heading-or-anchor text, the link the
//!   first `a[href]` resolved against the page URL, and the snippet the
//!   first paragraph, when present.
//! - `pattern`: a regular expression with a required `title` named capture
//!   and optional `link` and `snippet` captures, applied to the raw body.
//!
//! Zero matched items is not an error (the site may legitimately have
//! nothing in its markup), and no retries happen at this layer; retry policy
//! belongs to the crawl coordinator.

use crate::models::{CandidateItem, FetchOutcome, SelectorLanguage, SourceDescriptor};
use crate::utils::squash_ws;
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

/// Why one extraction attempt failed. Folded into a [`FetchOutcome`] by the
/// crawl coordinator.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("selector failed: {0}")]
    SelectorMismatch(String),
    #[error("unparseable document: {0}")]
    Parse(String),
}

impl FetchFailure {
    /// Transient failures are worth exactly one retry; structural ones are
    /// not, since the selector or the document will not fix itself mid-run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }

    pub fn outcome(&self) -> FetchOutcome {
        match self {
            Self::Timeout => FetchOutcome::Timeout,
            Self::Network(_) => FetchOutcome::NetworkError,
            Self::SelectorMismatch(reason) => FetchOutcome::SelectorMismatch {
                reason: reason.clone(),
            },
            Self::Parse(reason) => FetchOutcome::ParseError {
                reason: reason.clone(),
            },
        }
    }
}

/// Page-fetch capability. The production implementation is [`HttpFetcher`];
/// tests drive the crawl coordinator with scripted stand-ins.
#[async_trait]
pub trait FetchPage: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, FetchFailure>;
}

/// Shared reqwest-backed fetcher for the whole run.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

fn classify_transport(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Network(e.to_string())
    }
}

#[async_trait]
impl FetchPage for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, FetchFailure> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;
        let response = response.error_for_status().map_err(classify_transport)?;
        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::Timeout
            } else {
                FetchFailure::Parse(format!("body decode failed: {e}"))
            }
        })
    }
}

/// Fetch one source page and apply its declared selector.
///
/// At most `max_items` candidates are taken per page per run.
#[instrument(level = "debug", skip_all, fields(source = %descriptor.name))]
pub async fn extract(
    fetcher: &dyn FetchPage,
    descriptor: &SourceDescriptor,
    timeout: Duration,
    max_items: usize,
) -> Result<Vec<CandidateItem>, FetchFailure> {
    let body = fetcher.fetch(&descriptor.url, timeout).await?;
    if body.trim().is_empty() {
        return Err(FetchFailure::Parse("empty document".to_string()));
    }
    let items = select_candidates(&body, descriptor, max_items)?;
    debug!(count = items.len(), "Extracted candidates");
    Ok(items)
}

/// Apply the declared selector engine to an already-fetched document.
/// Separated from I/O so tests feed markup directly.
pub fn select_candidates(
    body: &str,
    descriptor: &SourceDescriptor,
    max_items: usize,
) -> Result<Vec<CandidateItem>, FetchFailure> {
    match descriptor.selector_language {
        SelectorLanguage::StructuralTree => select_structural(body, descriptor, max_items),
        SelectorLanguage::Pattern => select_pattern(body, descriptor, max_items),
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    squash_ws(&element.text().collect::<Vec<_>>().join(" "))
}

fn select_structural(
    body: &str,
    descriptor: &SourceDescriptor,
    max_items: usize,
) -> Result<Vec<CandidateItem>, FetchFailure> {
    let item_selector = Selector::parse(&descriptor.item_selector)
        .map_err(|e| FetchFailure::SelectorMismatch(e.to_string()))?;
    let title_selector = Selector::parse("h1, h2, h3, h4, a").unwrap();
    let link_selector = Selector::parse("a[href]").unwrap();
    let snippet_selector = Selector::parse("p").unwrap();

    let document = Html::parse_document(body);
    let mut items = Vec::new();

    for element in document.select(&item_selector).take(max_items) {
        // An item container that is itself an anchor carries its own title
        // text and href; otherwise look at descendants. A match with no
        // title is not an article.
        let own_anchor = element.value().name() == "a";

        let title = if own_anchor {
            Some(element_text(element))
        } else {
            element.select(&title_selector).next().map(element_text)
        };
        let Some(title) = title.filter(|title| !title.is_empty()) else {
            continue;
        };

        let href = if own_anchor {
            element.value().attr("href")
        } else {
            element
                .select(&link_selector)
                .next()
                .and_then(|a| a.value().attr("href"))
        };
        let link = href.and_then(|href| descriptor.url.join(href.trim()).ok());

        let snippet = element
            .select(&snippet_selector)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty());

        items.push(CandidateItem {
            title,
            link,
            source_name: descriptor.name.clone(),
            category: descriptor.category.clone(),
            snippet,
        });
    }

    Ok(items)
}

fn select_pattern(
    body: &str,
    descriptor: &SourceDescriptor,
    max_items: usize,
) -> Result<Vec<CandidateItem>, FetchFailure> {
    let pattern = Regex::new(&descriptor.item_selector)
        .map_err(|e| FetchFailure::SelectorMismatch(e.to_string()))?;
    if !pattern.capture_names().flatten().any(|name| name == "title") {
        return Err(FetchFailure::SelectorMismatch(
            "pattern must define a `title` named capture".to_string(),
        ));
    }

    let mut items = Vec::new();
    for captures in pattern.captures_iter(body).take(max_items) {
        let title = captures
            .name("title")
            .map(|m| squash_ws(m.as_str()))
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let link = captures
            .name("link")
            .and_then(|m| descriptor.url.join(m.as_str().trim()).ok());
        let snippet = captures
            .name("snippet")
            .map(|m| squash_ws(m.as_str()))
            .filter(|s| !s.is_empty());

        items.push(CandidateItem {
            title,
            link,
            source_name: descriptor.name.clone(),
            category: descriptor.category.clone(),
            snippet,
        });
    }

    Ok(items)
}
