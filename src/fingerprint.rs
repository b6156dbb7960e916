//! Content fingerprints: stable identity for deduplication.
//!
//! Two candidates are the same real-world article iff their normalized links
//! match: scheme + host + path, with tracking query parameters stripped and
//! the fragment dropped. Real query parameters survive normalization: two
//! links differing in `?id=` are different articles, two differing only in
//! `?utm_source=` are not. When a candidate has no usable absolute link, the
//! trimmed, case-folded title scoped to its source stands in.
//!
//! The fingerprint itself is the SHA-256 hex digest of the identity string,
//! so it is safe as a store key regardless of what the link contains.

use crate::models::CandidateItem;
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that identify a click, not an article.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "yclid", "mc_cid", "mc_eid", "ref_src"];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "utm" || name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a link to its identity form: scheme + host (+ explicit port) +
/// path, keeping only non-tracking query parameters in their original order.
pub fn normalize_link(link: &Url) -> String {
    let mut normalized = format!(
        "{}://{}",
        link.scheme(),
        link.host_str().unwrap_or_default()
    );
    if let Some(port) = link.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(link.path());

    let kept: Vec<String> = link
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| {
            if value.is_empty() {
                name.to_string()
            } else {
                format!("{name}={value}")
            }
        })
        .collect();
    if !kept.is_empty() {
        normalized.push('?');
        normalized.push_str(&kept.join("&"));
    }

    normalized
}

/// Compute the content fingerprint for a candidate.
///
/// Link identity when an absolute link is present; otherwise title identity
/// scoped to the source, so identical headlines on different sites stay
/// distinct.
pub fn fingerprint(item: &CandidateItem) -> String {
    let identity = match &item.link {
        Some(link) => format!("link:{}", normalize_link(link)),
        None => format!(
            "title:{}:{}",
            item.source_name,
            item.title.trim().to_lowercase()
        ),
    };
    format!("{:x}", Sha256::digest(identity.as_bytes()))
}
