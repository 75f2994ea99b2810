//! GitHub scraper: public REST API, no authentication. The
//! unauthenticated rate limit is a known constraint and is surfaced
//! as a distinct error kind before degrading to the empty record.

use async_trait::async_trait;
use codetrack_core::Platform;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::normalize::json_u64;
use crate::{resolve_username, PlatformScraper, ScrapeContext, ScrapeError};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Default, Deserialize)]
struct GitHubUser {
    #[serde(default)]
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    public_repos: u64,
    #[serde(default)]
    followers: u64,
    #[serde(default)]
    following: u64,
}

fn sum_stars_forks(repos: &[JsonValue]) -> (u64, u64) {
    repos.iter().fold((0, 0), |(stars, forks), repo| {
        (
            stars + json_u64(repo, "stargazers_count"),
            forks + json_u64(repo, "forks_count"),
        )
    })
}

pub struct GitHubScraper;

#[async_trait]
impl PlatformScraper for GitHubScraper {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn scrape(&self, ctx: &ScrapeContext, profile_url: &str) -> JsonValue {
        let Some(username) = resolve_username(profile_url, Platform::GitHub) else {
            let err = ScrapeError::InvalidProfileUrl {
                url: profile_url.to_string(),
            };
            warn!(error = %err, "skipping github scrape");
            return JsonValue::Null;
        };

        let user_url = format!("{GITHUB_API_BASE}/users/{username}");
        let payload = match ctx.http.fetch_json("github", &user_url).await {
            Ok(payload) => payload,
            Err(err) if err.is_rate_limited() => {
                warn!(username, "github unauthenticated rate limit hit");
                return JsonValue::Null;
            }
            Err(err) if err.is_not_found() => {
                warn!(username, "github user not found");
                return JsonValue::Null;
            }
            Err(err) => {
                warn!(username, error = %err, "github scrape failed");
                return JsonValue::Null;
            }
        };
        let user: GitHubUser = serde_json::from_value(payload).unwrap_or_default();

        // First page of repos, newest first. Best-effort: a failure
        // here leaves stars/forks at 0 instead of failing the scrape.
        let repos_url = format!("{GITHUB_API_BASE}/users/{username}/repos?per_page=30&sort=updated");
        let (total_stars, total_forks) = match ctx.http.fetch_json("github", &repos_url).await {
            Ok(JsonValue::Array(repos)) => sum_stars_forks(&repos),
            Ok(_) => (0, 0),
            Err(err) => {
                warn!(username, error = %err, "github repo listing failed, stars/forks at 0");
                (0, 0)
            }
        };

        let login = if user.login.is_empty() {
            username.clone()
        } else {
            user.login.clone()
        };
        json!({
            "username": login,
            "name": user.name.unwrap_or_else(|| login.clone()),
            "repositories": user.public_repos,
            "followers": user.followers,
            "following": user.following,
            "totalStars": total_stars,
            "totalForks": total_forks,
            // No GraphQL contributions access without a token; this
            // approximation is a documented trade-off.
            "totalContributions": user.public_repos + user.followers,
        })
    }
}
