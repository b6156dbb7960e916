//! Run configuration loaded from a YAML file.
//!
//! Everything has a sensible default so the binary runs with no config file
//! at all; the file only needs to name what differs from the defaults. API
//! credentials are never stored in the file; the config names the
//! environment variable that carries the key.
//!
//! ```yaml
//! crawler:
//!   concurrency: 4
//!   timeout_secs: 30
//! provider:
//!   kind: openai
//!   model: gpt-4o-mini
//!   api_key_env: OPENAI_API_KEY
//! store:
//!   path: data/history
//! ```

use serde::Deserialize;
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub provider: ProviderConfig,
    pub store: StoreConfig,
    pub run: RunConfig,
}

/// Tuning for the crawl stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// User-Agent header sent with every page fetch.
    pub user_agent: String,
    /// Per-source fetch budget, in seconds.
    pub timeout_secs: u64,
    /// Maximum sources fetched in flight at once.
    pub concurrency: usize,
    /// Fixed pause before the single retry of a transient failure.
    pub retry_backoff_ms: u64,
    /// Cap on candidates taken from one source page per run.
    pub max_items_per_source: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; news-digest/0.1)".to_string(),
            timeout_secs: 30,
            concurrency: 4,
            retry_backoff_ms: 500,
            max_items_per_source: 10,
        }
    }
}

/// Which text-generation backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

/// Tuning for the summarization stage and its provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the provider API, without a trailing slash.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Per-request budget, in seconds.
    pub timeout_secs: u64,
    /// Total attempts per item, including the first.
    pub max_attempts: u32,
    /// Maximum provider calls in flight at once.
    pub concurrency: usize,
    /// Target summary length passed to the prompt, in characters.
    pub summary_chars: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 1000,
            timeout_secs: 60,
            max_attempts: 4,
            concurrency: 4,
            summary_chars: 500,
        }
    }
}

/// Where the history store lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/history".to_string(),
        }
    }
}

/// Run-level limits.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Overall wall-clock budget for one run, in seconds. `None` means
    /// unbounded; on expiry the run yields whatever completed.
    pub timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load configuration from `path`, or fall back to defaults when no path
    /// is given or the file does not exist. A file that exists but fails to
    /// parse is an error, not a silent fallback.
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !Path::new(path).exists() {
            info!(%path, "Config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        info!(%path, "Loaded configuration");
        Ok(config)
    }
}
