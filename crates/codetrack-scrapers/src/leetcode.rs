//! LeetCode scraper: ordered chain of CORS-enabled community
//! statistics mirrors, all serving the same payload shape.

use async_trait::async_trait;
use codetrack_core::Platform;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{resolve_username, run_chain, PlatformScraper, ScrapeContext, ScrapeError, Source};

/// Mirrors of the community statistics API, tried in order.
pub const LEETCODE_STATS_MIRRORS: &[&str] = &[
    "https://leetcode-stats-api.herokuapp.com",
    "https://leetcode-stats-api.vercel.app",
    "https://leetcodestats.cyclic.app",
];

/// A payload is usable when it reports success or already carries the
/// solved-count field; mirrors disagree on which they send.
pub fn accepts(payload: &JsonValue) -> bool {
    payload.get("status").and_then(|v| v.as_str()) == Some("success")
        || payload.get("totalSolved").is_some()
}

async fn fetch_mirror(
    ctx: &ScrapeContext,
    base: &'static str,
    username: &str,
) -> Result<JsonValue, ScrapeError> {
    let url = format!("{base}/{username}");
    let payload = ctx
        .http
        .fetch_json("leetcode", &url)
        .await
        .map_err(|err| ScrapeError::from_fetch(base, err))?;
    if accepts(&payload) {
        Ok(payload)
    } else {
        Err(ScrapeError::SourceUnavailable {
            name: base,
            reason: "payload reports no totalSolved".to_string(),
        })
    }
}

pub struct LeetCodeScraper;

#[async_trait]
impl PlatformScraper for LeetCodeScraper {
    fn platform(&self) -> Platform {
        Platform::LeetCode
    }

    async fn scrape(&self, ctx: &ScrapeContext, profile_url: &str) -> JsonValue {
        let Some(username) = resolve_username(profile_url, Platform::LeetCode) else {
            let err = ScrapeError::InvalidProfileUrl {
                url: profile_url.to_string(),
            };
            warn!(error = %err, "skipping leetcode scrape");
            return JsonValue::Null;
        };

        let sources = LEETCODE_STATS_MIRRORS
            .iter()
            .copied()
            .map(|base| Source::new(base, fetch_mirror(ctx, base, &username)))
            .collect();
        match run_chain(Platform::LeetCode, sources).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(username, error = %err, "leetcode scrape failed");
                JsonValue::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_success_status_or_total_solved() {
        assert!(accepts(&json!({"status": "success", "totalSolved": 42})));
        assert!(accepts(&json!({"totalSolved": 0})));
        assert!(!accepts(&json!({"status": "error", "message": "user does not exist"})));
        assert!(!accepts(&json!({})));
    }
}
