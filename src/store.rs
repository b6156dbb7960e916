//! Durable history store: the record of everything the pipeline ever
//! accepted.
//!
//! The pipeline consumes the store only through the [`HistoryStore`] trait
//! (`exists`, `reserve`, `update_summary`, `mark_summary_failed`,
//! `list_recent`), so the engine behind it stays an external collaborator.
//! The shipped implementation is sled, keyed by content fingerprint with
//! JSON-encoded records.
//!
//! Reservation is an insert-if-absent compare-and-swap on the fingerprint
//! key: of any number of concurrent attempts on the same fingerprint
//! (overlapping runs, duplicate matches within one run), exactly one wins
//! and the rest observe a conflict. That conflict is a skip, not an error;
//! it is what keeps an article from being summarized, and paid for, twice.

use crate::models::{CandidateItem, NewsRecord, SummaryState};
use chrono::Utc;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no record for fingerprint {0}")]
    NotFound(String),
}

/// Outcome of a reservation attempt on a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// This caller claimed the fingerprint; the record id is returned.
    Claimed(u64),
    /// Another path already holds the fingerprint.
    Conflict,
}

/// Read/write contract against durable history.
///
/// All writes are per-fingerprint atomic; no broader transactionality is
/// promised or needed.
pub trait HistoryStore: Send + Sync {
    /// Is this fingerprint already known?
    fn exists(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// Insert an unsummarized record for `fingerprint` iff none exists.
    fn reserve(&self, fingerprint: &str, item: &CandidateItem) -> Result<Reservation, StoreError>;

    /// Attach a completed summary to the record for `fingerprint`.
    fn update_summary(&self, fingerprint: &str, summary: &str) -> Result<(), StoreError>;

    /// Flag the record for `fingerprint` as permanently unsummarized for
    /// this run. The reservation stays, so the article is never re-fetched
    /// as new.
    fn mark_summary_failed(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// Most recently created records, newest first.
    fn list_recent(&self, limit: usize) -> Result<Vec<NewsRecord>, StoreError>;
}

/// Sled-backed [`HistoryStore`].
pub struct SledHistory {
    db: sled::Db,
}

impl SledHistory {
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Fetch one record; test and digest convenience, not part of the
    /// pipeline contract.
    pub fn get(&self, fingerprint: &str) -> Result<Option<NewsRecord>, StoreError> {
        match self.db.get(fingerprint.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply `mutate` to the record under `fingerprint` with a
    /// compare-and-swap loop, so concurrent writers to the same key cannot
    /// lose each other's fields.
    fn mutate(
        &self,
        fingerprint: &str,
        apply: impl Fn(&mut NewsRecord),
    ) -> Result<(), StoreError> {
        loop {
            let Some(current) = self.db.get(fingerprint.as_bytes())? else {
                return Err(StoreError::NotFound(fingerprint.to_string()));
            };
            let mut record: NewsRecord = serde_json::from_slice(&current)?;
            apply(&mut record);
            let next = serde_json::to_vec(&record)?;
            match self
                .db
                .compare_and_swap(fingerprint.as_bytes(), Some(&current), Some(next))?
            {
                Ok(()) => {
                    self.db.flush()?;
                    return Ok(());
                }
                // Lost a race on this key; re-read and reapply.
                Err(_) => continue,
            }
        }
    }
}

impl HistoryStore for SledHistory {
    fn exists(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(fingerprint.as_bytes())?)
    }

    fn reserve(&self, fingerprint: &str, item: &CandidateItem) -> Result<Reservation, StoreError> {
        let record = NewsRecord {
            id: self.db.generate_id()?,
            title: item.title.clone(),
            link: item.link.as_ref().map(|link| link.to_string()),
            source: item.source_name.clone(),
            category: item.category.clone(),
            fingerprint: fingerprint.to_string(),
            summary: None,
            summary_state: SummaryState::Pending,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record)?;

        match self
            .db
            .compare_and_swap(fingerprint.as_bytes(), None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.db.flush()?;
                Ok(Reservation::Claimed(record.id))
            }
            Err(_) => Ok(Reservation::Conflict),
        }
    }

    fn update_summary(&self, fingerprint: &str, summary: &str) -> Result<(), StoreError> {
        self.mutate(fingerprint, |record| {
            record.summary = Some(summary.to_string());
            record.summary_state = SummaryState::Summarized;
        })
    }

    fn mark_summary_failed(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.mutate(fingerprint, |record| {
            record.summary = None;
            record.summary_state = SummaryState::Failed;
        })
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<NewsRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.db.iter() {
            let (_key, value) = entry?;
            records.push(serde_json::from_slice::<NewsRecord>(&value)?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
