//! Deduplicator: partition crawl output into genuinely-new and
//! already-known items against durable history.
//!
//! For each candidate: compute the content fingerprint, ask the store
//! whether it exists, and, for unseen fingerprints, insert a provisional,
//! unsummarized record *before* handing the item downstream. The
//! uniqueness-enforced insert is what prevents an article discovered twice
//! (duplicate selector matches in one run, or two near-simultaneous runs)
//! from being summarized twice: losing the insert race means some other path
//! already claimed the fingerprint, and the item is a skip, not an error.
//!
//! This stage is a synchronous, single-threaded pass; candidate order (and
//! so within-source order) is preserved into summarization.

use crate::fingerprint::fingerprint;
use crate::models::CandidateItem;
use crate::store::{HistoryStore, Reservation};
use tracing::{debug, info, instrument, warn};

/// A candidate that won its reservation and is cleared for summarization.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub record_id: u64,
    pub fingerprint: String,
    pub item: CandidateItem,
}

/// What dedup did with the run's candidates.
#[derive(Debug, Default)]
pub struct DedupeOutcome {
    pub fresh: Vec<NewItem>,
    /// Fingerprints already present, plus lost reservation races.
    pub known: usize,
    /// Candidates the store could not answer for; failed for this run only,
    /// re-fetched next run.
    pub store_failures: usize,
}

/// Partition `candidates` into new and known.
#[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
pub fn dedupe(store: &dyn HistoryStore, candidates: Vec<CandidateItem>) -> DedupeOutcome {
    let mut outcome = DedupeOutcome::default();

    for item in candidates {
        let fp = fingerprint(&item);

        match store.exists(&fp) {
            Ok(true) => {
                debug!(title = %item.title, "Already known; skipping");
                outcome.known += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(title = %item.title, error = %e, "History lookup failed; skipping for this run");
                outcome.store_failures += 1;
                continue;
            }
        }

        match store.reserve(&fp, &item) {
            Ok(Reservation::Claimed(record_id)) => {
                debug!(title = %item.title, record_id, "Reserved new item");
                outcome.fresh.push(NewItem {
                    record_id,
                    fingerprint: fp,
                    item,
                });
            }
            Ok(Reservation::Conflict) => {
                debug!(title = %item.title, "Lost reservation race; treating as known");
                outcome.known += 1;
            }
            Err(e) => {
                warn!(title = %item.title, error = %e, "Reservation failed; skipping for this run");
                outcome.store_failures += 1;
            }
        }
    }

    info!(
        new = outcome.fresh.len(),
        known = outcome.known,
        store_failures = outcome.store_failures,
        "Dedup completed"
    );
    outcome
}
