//! AtCoder scraper. Three sources in decreasing order of quality: the
//! kenkoooo aggregate ac_rank endpoint, the aggregate submission list,
//! and finally the official contest-history JSON fetched through the
//! proxy gateway (atcoder.jp does not send CORS headers).

use std::collections::HashSet;

use async_trait::async_trait;
use codetrack_core::{atcoder_rank_band, Platform};
use serde_json::{json, Map, Value as JsonValue};
use tracing::warn;

use crate::{resolve_username, run_chain, PlatformScraper, ScrapeContext, ScrapeError, Source};

pub const ATCODER_AGGREGATE_BASE: &str = "https://kenkoooo.com/atcoder/atcoder-api";
pub const ATCODER_OFFICIAL_BASE: &str = "https://atcoder.jp";

/// What the official contest history tells us: participation count and
/// the current and peak values of `NewRating`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContestHistory {
    pub contests: u64,
    pub rating: Option<u64>,
    pub max_rating: Option<u64>,
}

pub fn derive_history(entries: &[JsonValue]) -> ContestHistory {
    let ratings: Vec<u64> = entries
        .iter()
        .filter_map(|entry| entry.get("NewRating").and_then(|v| v.as_i64()))
        .map(|v| v.max(0) as u64)
        .collect();
    ContestHistory {
        contests: entries.len() as u64,
        rating: ratings.last().copied(),
        max_rating: ratings.iter().max().copied(),
    }
}

/// Distinct accepted problem ids and distinct contest ids in a full
/// submission dump.
pub fn distinct_accepted(submissions: &[JsonValue]) -> (u64, u64) {
    let mut problems: HashSet<&str> = HashSet::new();
    let mut contests: HashSet<&str> = HashSet::new();
    for submission in submissions {
        if let Some(contest) = submission.get("contest_id").and_then(|v| v.as_str()) {
            contests.insert(contest);
        }
        if submission.get("result").and_then(|v| v.as_str()) != Some("AC") {
            continue;
        }
        if let Some(problem) = submission.get("problem_id").and_then(|v| v.as_str()) {
            problems.insert(problem);
        }
    }
    (problems.len() as u64, contests.len() as u64)
}

fn raw_record(
    source: &'static str,
    problems_solved: u64,
    history: &ContestHistory,
) -> JsonValue {
    let mut raw = Map::new();
    raw.insert("source".to_string(), json!(source));
    raw.insert("problemsSolved".to_string(), json!(problems_solved));
    raw.insert("contestsParticipated".to_string(), json!(history.contests));
    if let Some(rating) = history.rating {
        raw.insert("rating".to_string(), json!(rating));
        raw.insert(
            "rank".to_string(),
            json!(atcoder_rank_band(rating.min(u32::MAX as u64) as u32)),
        );
    }
    if let Some(max_rating) = history.max_rating {
        raw.insert("maxRating".to_string(), json!(max_rating));
    }
    JsonValue::Object(raw)
}

/// Official contest history, via the proxy gateway. Best-effort for
/// the first two sources, load-bearing for the last.
async fn fetch_history(ctx: &ScrapeContext, username: &str) -> Result<Vec<JsonValue>, ScrapeError> {
    let url = format!("{ATCODER_OFFICIAL_BASE}/users/{username}/history/json");
    let payload = ctx
        .proxy
        .fetch_json(&ctx.http, &url)
        .await
        .map_err(|err| ScrapeError::from_fetch("contest-history", err))?;
    match payload {
        JsonValue::Array(entries) => Ok(entries),
        _ => Err(ScrapeError::SourceUnavailable {
            name: "contest-history",
            reason: "history payload is not an array".to_string(),
        }),
    }
}

async fn history_or_empty(ctx: &ScrapeContext, username: &str) -> ContestHistory {
    match fetch_history(ctx, username).await {
        Ok(entries) => derive_history(&entries),
        Err(err) => {
            warn!(username, error = %err, "atcoder contest history unavailable");
            ContestHistory::default()
        }
    }
}

async fn fetch_via_ac_rank(ctx: &ScrapeContext, username: &str) -> Result<JsonValue, ScrapeError> {
    let url = format!("{ATCODER_AGGREGATE_BASE}/v3/user/ac_rank?user={username}");
    let payload = ctx
        .http
        .fetch_json("atcoder", &url)
        .await
        .map_err(|err| ScrapeError::from_fetch("ac-rank", err))?;
    let count = match payload.get("count").and_then(|v| v.as_u64()) {
        Some(count) => count,
        None => {
            return Err(ScrapeError::SourceUnavailable {
                name: "ac-rank",
                reason: "no count in ac_rank payload".to_string(),
            })
        }
    };
    let history = history_or_empty(ctx, username).await;
    Ok(raw_record("ac-rank", count, &history))
}

async fn fetch_via_submissions(ctx: &ScrapeContext, username: &str) -> Result<JsonValue, ScrapeError> {
    let url = format!("{ATCODER_AGGREGATE_BASE}/results?user={username}");
    let payload = ctx
        .http
        .fetch_json("atcoder", &url)
        .await
        .map_err(|err| ScrapeError::from_fetch("submissions", err))?;
    let JsonValue::Array(submissions) = payload else {
        return Err(ScrapeError::SourceUnavailable {
            name: "submissions",
            reason: "submission payload is not an array".to_string(),
        });
    };
    let (problems_solved, _) = distinct_accepted(&submissions);
    let history = history_or_empty(ctx, username).await;
    Ok(raw_record("submissions", problems_solved, &history))
}

async fn fetch_via_history(ctx: &ScrapeContext, username: &str) -> Result<JsonValue, ScrapeError> {
    let entries = fetch_history(ctx, username).await?;
    let history = derive_history(&entries);
    // Last resort: with only the contest history to go on, one solved
    // problem per contest is the best available estimate.
    Ok(raw_record("contest-history", history.contests, &history))
}

pub struct AtCoderScraper;

#[async_trait]
impl PlatformScraper for AtCoderScraper {
    fn platform(&self) -> Platform {
        Platform::AtCoder
    }

    async fn scrape(&self, ctx: &ScrapeContext, profile_url: &str) -> JsonValue {
        let Some(username) = resolve_username(profile_url, Platform::AtCoder) else {
            let err = ScrapeError::InvalidProfileUrl {
                url: profile_url.to_string(),
            };
            warn!(error = %err, "skipping atcoder scrape");
            return JsonValue::Null;
        };

        let sources = vec![
            Source::new("ac-rank", fetch_via_ac_rank(ctx, &username)),
            Source::new("submissions", fetch_via_submissions(ctx, &username)),
            Source::new("contest-history", fetch_via_history(ctx, &username)),
        ];
        match run_chain(Platform::AtCoder, sources).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(username, error = %err, "atcoder scrape failed");
                JsonValue::Null
            }
        }
    }
}
