//! Utility functions for text normalization, logging, and file system checks.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{info, instrument};

/// Time left before `deadline`, capped at `budget`. `None` once the deadline
/// has passed; callers treat that as "do not start".
pub fn remaining_budget(budget: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(budget),
        Some(deadline) => {
            let left = deadline.checked_duration_since(Instant::now())?;
            if left.is_zero() {
                None
            } else {
                Some(budget.min(left))
            }
        }
    }
}

/// Collapse runs of whitespace (including newlines) into single spaces and
/// trim the ends.
///
/// Extracted titles and snippets arrive with whatever indentation the source
/// markup carried; identity comparisons and digest output both want the flat
/// form.
pub fn squash_ws(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", &s[..max], s.len() - max)
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable
/// (permission denied, read-only filesystem, etc.).
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
