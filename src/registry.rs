//! Source registry: parsing and validation of the declarative source list.
//!
//! The source list is UTF-8 text, one source per line:
//!
//! ```text
//! # category|name|url|selector-language|item-selector
//! ROBOTICS|IEEE Spectrum|https://spectrum.ieee.org/robotics|structural-tree|article.card
//! AI|Example Wire|https://example.test/ai|pattern|<h2><a href="(?P<link>[^"]+)">(?P<title>[^<]+)</a>
//! ```
//!
//! `#`-prefixed and blank lines are ignored. A malformed line never prevents
//! loading the remaining lines; it is reported with its line number and
//! reason. The load fails only when zero valid sources remain, a run with
//! nothing to do.

use crate::models::{SelectorLanguage, SourceDescriptor};
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

/// A source list line that failed validation, with why.
#[derive(Debug, Clone)]
pub struct SourceRejection {
    /// 1-based line number in the source list file.
    pub line: usize,
    pub reason: String,
}

/// The loaded registry: valid descriptors in file order, plus every
/// rejection encountered on the way.
#[derive(Debug)]
pub struct SourceRegistry {
    pub sources: Vec<SourceDescriptor>,
    pub rejected: Vec<SourceRejection>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read source list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable sources in {path} ({rejected} line(s) rejected)")]
    Empty { path: String, rejected: usize },
}

/// Load and validate the source list at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<SourceRegistry, RegistryError> {
    let display = path.as_ref().display().to_string();
    let raw = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
        path: display.clone(),
        source,
    })?;

    let registry = parse_source_list(&raw);
    if registry.sources.is_empty() {
        return Err(RegistryError::Empty {
            path: display,
            rejected: registry.rejected.len(),
        });
    }

    info!(
        sources = registry.sources.len(),
        rejected = registry.rejected.len(),
        "Loaded source registry"
    );
    Ok(registry)
}

/// Parse the raw source list text. Separated from I/O so tests feed strings.
pub fn parse_source_list(raw: &str) -> SourceRegistry {
    let mut sources = Vec::new();
    let mut rejected = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(descriptor) => sources.push(descriptor),
            Err(reason) => rejected.push(SourceRejection {
                line: index + 1,
                reason,
            }),
        }
    }

    SourceRegistry { sources, rejected }
}

/// Parse one `category|name|url|selector-language|item-selector` line.
///
/// The selector field is taken verbatim to the end of the line, so pattern
/// selectors may themselves contain `|` (regex alternation).
fn parse_line(line: &str) -> Result<SourceDescriptor, String> {
    let fields: Vec<&str> = line.splitn(5, '|').collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 pipe-delimited fields, got {}", fields.len()));
    }

    let category = fields[0].trim();
    let name = fields[1].trim();
    let url_field = fields[2].trim();
    let language_field = fields[3].trim();
    let item_selector = fields[4].trim();

    if category.is_empty() {
        return Err("empty category".to_string());
    }
    if name.is_empty() {
        return Err("empty source name".to_string());
    }

    let url = Url::parse(url_field).map_err(|e| format!("invalid url `{url_field}`: {e}"))?;
    if url.host_str().is_none() {
        return Err(format!("url `{url_field}` is not absolute"));
    }

    let selector_language = SelectorLanguage::from_token(language_field).ok_or_else(|| {
        format!("unknown selector language `{language_field}` (expected structural-tree or pattern)")
    })?;

    if item_selector.is_empty() {
        return Err("empty item selector".to_string());
    }

    Ok(SourceDescriptor {
        category: category.to_string(),
        name: name.to_string(),
        url,
        selector_language,
        item_selector: item_selector.to_string(),
    })
}
