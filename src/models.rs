//! Data models for the ingestion and deduplication pipeline.
//!
//! This module defines the core data structures that flow between pipeline
//! stages:
//! - [`SourceDescriptor`]: A validated source declaration from the registry
//! - [`CandidateItem`]: A raw article extracted from a source page
//! - [`FetchOutcome`] / [`SourceReport`]: Per-source crawl results
//! - [`NewsRecord`]: The persisted form of an accepted article
//! - [`SummaryResult`]: Ephemeral output of one successful provider call
//! - [`RunReport`]: End-of-run counts for logging and alerting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The selector engine a source declares for extracting items from its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorLanguage {
    /// CSS selectors applied to the parsed HTML tree.
    StructuralTree,
    /// A regular expression with named captures applied to the raw document.
    Pattern,
}

impl SelectorLanguage {
    /// Parse the registry token (`structural-tree` or `pattern`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "structural-tree" => Some(Self::StructuralTree),
            "pattern" => Some(Self::Pattern),
            _ => None,
        }
    }
}

impl fmt::Display for SelectorLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StructuralTree => write!(f, "structural-tree"),
            Self::Pattern => write!(f, "pattern"),
        }
    }
}

/// A validated, immutable source declaration.
///
/// Created once at registry load and shared read-only across crawl workers
/// for the duration of the run.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// Category label the source's items inherit (e.g. "ROBOTICS").
    pub category: String,
    /// Human-readable source name, also used in per-source reports.
    pub name: String,
    /// Absolute URL of the page to fetch.
    pub url: Url,
    /// Which selector engine interprets `item_selector`.
    pub selector_language: SelectorLanguage,
    /// Selector expression in the declared language.
    pub item_selector: String,
}

/// A raw article candidate extracted from one source page.
///
/// The normalized `link` is the primary identity; when a candidate carries no
/// usable absolute link, the trimmed, case-folded title within the same
/// source stands in for it (see [`crate::fingerprint`]).
#[derive(Debug, Clone)]
pub struct CandidateItem {
    /// Article title, non-empty after whitespace normalization.
    pub title: String,
    /// Absolute article link, when one could be resolved.
    pub link: Option<Url>,
    /// Name of the source that produced this candidate.
    pub source_name: String,
    /// Category inherited from the source descriptor.
    pub category: String,
    /// Optional teaser text found alongside the title.
    pub snippet: Option<String>,
}

/// The result of crawling one source. Produced exactly once per source per
/// run, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was fetched and the selector applied; zero items is still a
    /// success (the site may legitimately have nothing new).
    Success { items: usize },
    /// The fetch exceeded the per-source time budget.
    Timeout,
    /// DNS, connection, TLS, or HTTP-level transport failure.
    NetworkError,
    /// The selector expression could not be applied to the document.
    SelectorMismatch { reason: String },
    /// The fetched body could not be interpreted as a document.
    ParseError { reason: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { items } => write!(f, "ok({items})"),
            Self::Timeout => write!(f, "timeout"),
            Self::NetworkError => write!(f, "network-error"),
            Self::SelectorMismatch { reason } => write!(f, "selector-mismatch: {reason}"),
            Self::ParseError { reason } => write!(f, "parse-error: {reason}"),
        }
    }
}

/// Per-source crawl report: the source's name, its final outcome, and how
/// many fetch attempts it took to get there.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub outcome: FetchOutcome,
    pub attempts: u32,
}

/// Summarization lifecycle of a persisted record.
///
/// `Summarized` and `Failed` are both terminal for a run. A `Failed` record
/// keeps its reservation so the article is never re-fetched as new, but it
/// carries no summary for the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryState {
    /// Reserved in the store, summarization not yet attempted or completed.
    Pending,
    /// A summary was produced and persisted.
    Summarized,
    /// Summarization failed permanently for this run.
    Failed,
}

/// The persisted form of an accepted article.
///
/// `fingerprint` is unique across all records; that uniqueness is the
/// deduplicator's sole consistency guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRecord {
    pub id: u64,
    pub title: String,
    pub link: Option<String>,
    pub source: String,
    pub category: String,
    pub fingerprint: String,
    /// `None` until summarization completes; stays `None` on failure.
    pub summary: Option<String>,
    pub summary_state: SummaryState,
    pub created_at: DateTime<Utc>,
}

/// Ephemeral result of one successful provider call; folded into the
/// matching [`NewsRecord`] before the run ends.
#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub fingerprint: String,
    pub summary_text: String,
    /// Wall-clock latency of the attempt that succeeded.
    pub provider_latency_ms: u64,
    /// Total provider attempts, including the successful one.
    pub attempts: u32,
}

/// End-of-run counters, returned to the caller so observability does not
/// have to re-derive pipeline internals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources_attempted: usize,
    pub sources_failed: usize,
    pub candidates_found: usize,
    /// Candidates whose fingerprint was already in the history store.
    pub known_skipped: usize,
    /// Candidates the store could not answer for this run.
    pub store_failures: usize,
    pub new_items: usize,
    pub summarized: usize,
    pub summary_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_language_tokens_round_trip() {
        assert_eq!(
            SelectorLanguage::from_token("structural-tree"),
            Some(SelectorLanguage::StructuralTree)
        );
        assert_eq!(
            SelectorLanguage::from_token("pattern"),
            Some(SelectorLanguage::Pattern)
        );
        assert_eq!(SelectorLanguage::from_token("xpath"), None);
        assert_eq!(SelectorLanguage::StructuralTree.to_string(), "structural-tree");
    }

    #[test]
    fn fetch_outcome_display() {
        assert_eq!(FetchOutcome::Success { items: 3 }.to_string(), "ok(3)");
        assert_eq!(FetchOutcome::Timeout.to_string(), "timeout");
        assert_eq!(
            FetchOutcome::SelectorMismatch {
                reason: "bad selector".into()
            }
            .to_string(),
            "selector-mismatch: bad selector"
        );
        assert!(FetchOutcome::Success { items: 0 }.is_success());
        assert!(!FetchOutcome::NetworkError.is_success());
    }

    #[test]
    fn news_record_serialization_round_trip() {
        let record = NewsRecord {
            id: 7,
            title: "Robots walk".to_string(),
            link: Some("https://example.test/robots".to_string()),
            source: "TestSite".to_string(),
            category: "ROBOTICS".to_string(),
            fingerprint: "abc123".to_string(),
            summary: None,
            summary_state: SummaryState::Pending,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"pending\""));

        let back: NewsRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.fingerprint, "abc123");
        assert_eq!(back.summary_state, SummaryState::Pending);
        assert!(back.summary.is_none());
    }

    #[test]
    fn summary_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SummaryState::Summarized).unwrap(),
            "\"summarized\""
        );
        assert_eq!(
            serde_json::from_str::<SummaryState>("\"failed\"").unwrap(),
            SummaryState::Failed
        );
    }
}
