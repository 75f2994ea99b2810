//! Platform scrapers: identity resolution, ordered source chains, and
//! normalization of raw platform payloads into typed records.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use codetrack_core::Platform;
use codetrack_storage::{FetchError, HttpFetcher, ProxyGateway};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub mod atcoder;
pub mod codeforces;
pub mod github;
pub mod leetcode;
pub mod normalize;

pub use atcoder::AtCoderScraper;
pub use codeforces::CodeforcesScraper;
pub use github::GitHubScraper;
pub use leetcode::LeetCodeScraper;
pub use normalize::normalize;

pub const CRATE_NAME: &str = "codetrack-scrapers";

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("could not resolve a username from {url}")]
    InvalidProfileUrl { url: String },
    #[error("source {name} unavailable: {reason}")]
    SourceUnavailable { name: &'static str, reason: String },
    #[error("rate limited by {url}")]
    RateLimited { url: String },
    #[error("every source failed for {platform}")]
    AllSourcesExhausted { platform: Platform },
}

impl ScrapeError {
    pub(crate) fn from_fetch(name: &'static str, err: FetchError) -> Self {
        match err {
            FetchError::RateLimited { url } => ScrapeError::RateLimited { url },
            other => ScrapeError::SourceUnavailable {
                name,
                reason: other.to_string(),
            },
        }
    }
}

/// Shared handles every scraper needs.
#[derive(Clone)]
pub struct ScrapeContext {
    pub http: Arc<HttpFetcher>,
    pub proxy: Arc<ProxyGateway>,
}

impl ScrapeContext {
    pub fn new(http: HttpFetcher, proxy: ProxyGateway) -> Self {
        Self {
            http: Arc::new(http),
            proxy: Arc::new(proxy),
        }
    }
}

/// Best-effort stats fetch for one platform.
#[async_trait]
pub trait PlatformScraper: Send + Sync {
    fn platform(&self) -> Platform;

    /// Never fails. Total failure yields JSON null, which the
    /// normalizer turns into the platform's empty record.
    async fn scrape(&self, ctx: &ScrapeContext, profile_url: &str) -> JsonValue;
}

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<JsonValue, ScrapeError>> + Send + 'a>>;

/// One named candidate in a platform's ordered source chain.
pub struct Source<'a> {
    pub name: &'static str,
    fetch: SourceFuture<'a>,
}

impl<'a> Source<'a> {
    pub fn new(
        name: &'static str,
        fetch: impl Future<Output = Result<JsonValue, ScrapeError>> + Send + 'a,
    ) -> Self {
        Self {
            name,
            fetch: Box::pin(fetch),
        }
    }
}

/// Evaluates sources in order; the first success wins. Each failure is
/// logged and the chain moves on, so adding or reordering sources is a
/// data change.
pub async fn run_chain(platform: Platform, sources: Vec<Source<'_>>) -> Result<JsonValue, ScrapeError> {
    for source in sources {
        match source.fetch.await {
            Ok(payload) => {
                debug!(platform = platform.as_str(), source = source.name, "source succeeded");
                return Ok(payload);
            }
            Err(err) => {
                warn!(
                    platform = platform.as_str(),
                    source = source.name,
                    error = %err,
                    "source failed, trying next"
                );
            }
        }
    }
    Err(ScrapeError::AllSourcesExhausted { platform })
}

/// Extracts a platform username from a free-form profile URL. Applies a
/// platform-specific marker segment and falls back to the last
/// non-empty path segment. `None` only for blank input or a URL with no
/// usable path.
pub fn resolve_username(profile_url: &str, platform: Platform) -> Option<String> {
    let trimmed = profile_url.trim();
    if trimmed.is_empty() {
        return None;
    }

    let segments: Vec<String> = match Url::parse(trimmed) {
        Ok(url) => url
            .path_segments()
            .map(|parts| {
                parts
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        // Bare handles ("alice") are accepted as-is.
        Err(_) => trimmed
            .split('/')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect(),
    };

    let marker = match platform {
        Platform::LeetCode => Some("u"),
        Platform::Codeforces => Some("profile"),
        Platform::AtCoder => Some("users"),
        Platform::GitHub => None,
    };
    if let Some(marker) = marker {
        if let Some(pos) = segments.iter().position(|s| s == marker) {
            if let Some(user) = segments.get(pos + 1) {
                return Some(user.clone());
            }
        }
    }
    segments.last().cloned()
}

pub fn all_scrapers() -> Vec<Arc<dyn PlatformScraper>> {
    vec![
        Arc::new(LeetCodeScraper),
        Arc::new(CodeforcesScraper),
        Arc::new(AtCoderScraper),
        Arc::new(GitHubScraper),
    ]
}

pub fn scraper_for_platform(platform: Platform) -> Arc<dyn PlatformScraper> {
    match platform {
        Platform::LeetCode => Arc::new(LeetCodeScraper),
        Platform::Codeforces => Arc::new(CodeforcesScraper),
        Platform::AtCoder => Arc::new(AtCoderScraper),
        Platform::GitHub => Arc::new(GitHubScraper),
    }
}
