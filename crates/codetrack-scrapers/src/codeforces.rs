//! Codeforces scraper: official REST API. Profile fields come from
//! `user.info`; the solved count is derived locally from `user.status`
//! submissions and degrades to 0 when that call fails.

use std::collections::HashSet;

use async_trait::async_trait;
use codetrack_core::Platform;
use serde_json::{json, Map, Value as JsonValue};
use tracing::warn;

use crate::{resolve_username, PlatformScraper, ScrapeContext, ScrapeError};

pub const CODEFORCES_API_BASE: &str = "https://codeforces.com/api";

/// Up to this many recent submissions are scanned for distinct solves.
pub const SUBMISSION_WINDOW: u32 = 1000;

/// Cardinality of the set of {contestId, index} pairs among
/// submissions with verdict OK.
pub fn distinct_solved(submissions: &[JsonValue]) -> u64 {
    let mut seen: HashSet<(i64, String)> = HashSet::new();
    for submission in submissions {
        if submission.get("verdict").and_then(|v| v.as_str()) != Some("OK") {
            continue;
        }
        let Some(problem) = submission.get("problem") else {
            continue;
        };
        let contest_id = problem.get("contestId").and_then(|v| v.as_i64()).unwrap_or(-1);
        let index = problem
            .get("index")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        seen.insert((contest_id, index));
    }
    seen.len() as u64
}

fn unwrap_envelope(payload: JsonValue) -> Option<JsonValue> {
    if payload.get("status").and_then(|v| v.as_str()) != Some("OK") {
        return None;
    }
    payload.get("result").cloned()
}

pub struct CodeforcesScraper;

#[async_trait]
impl PlatformScraper for CodeforcesScraper {
    fn platform(&self) -> Platform {
        Platform::Codeforces
    }

    async fn scrape(&self, ctx: &ScrapeContext, profile_url: &str) -> JsonValue {
        let Some(handle) = resolve_username(profile_url, Platform::Codeforces) else {
            let err = ScrapeError::InvalidProfileUrl {
                url: profile_url.to_string(),
            };
            warn!(error = %err, "skipping codeforces scrape");
            return JsonValue::Null;
        };

        let info_url = format!("{CODEFORCES_API_BASE}/user.info?handles={handle}");
        let info = match ctx.http.fetch_json("codeforces", &info_url).await {
            Ok(payload) => match unwrap_envelope(payload)
                .and_then(|result| result.get(0).cloned())
                .filter(|user| user.is_object())
            {
                Some(user) => user,
                None => {
                    warn!(handle, "codeforces user.info returned no result");
                    return JsonValue::Null;
                }
            },
            Err(err) => {
                warn!(handle, error = %err, "codeforces user.info failed");
                return JsonValue::Null;
            }
        };

        let status_url = format!(
            "{CODEFORCES_API_BASE}/user.status?handle={handle}&from=1&count={SUBMISSION_WINDOW}"
        );
        let problems_solved = match ctx.http.fetch_json("codeforces", &status_url).await {
            Ok(payload) => match unwrap_envelope(payload) {
                Some(JsonValue::Array(submissions)) => distinct_solved(&submissions),
                _ => {
                    warn!(handle, "codeforces user.status returned no submissions");
                    0
                }
            },
            Err(err) => {
                warn!(handle, error = %err, "codeforces user.status failed, solved count at 0");
                0
            }
        };

        let mut raw = Map::new();
        // Unrated users carry no rating fields; leaving them absent
        // lets the normalizer substitute the sentinels.
        if let Some(rating) = info.get("rating").and_then(|v| v.as_i64()) {
            raw.insert("rating".to_string(), json!(rating.max(0)));
        }
        if let Some(max_rating) = info.get("maxRating").and_then(|v| v.as_i64()) {
            raw.insert("maxRating".to_string(), json!(max_rating.max(0)));
        }
        raw.insert(
            "rank".to_string(),
            json!(info.get("rank").and_then(|v| v.as_str()).unwrap_or("Unrated")),
        );
        raw.insert(
            "maxRank".to_string(),
            json!(info.get("maxRank").and_then(|v| v.as_str()).unwrap_or("N/A")),
        );
        raw.insert(
            "contribution".to_string(),
            json!(info.get("contribution").and_then(|v| v.as_i64()).unwrap_or(0)),
        );
        raw.insert("problemsSolved".to_string(), json!(problems_solved));
        JsonValue::Object(raw)
    }
}
