//! Core domain model for the codetrack statistics aggregation engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "codetrack-core";

/// Supported external coding platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LeetCode,
    Codeforces,
    AtCoder,
    GitHub,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::LeetCode,
        Platform::Codeforces,
        Platform::AtCoder,
        Platform::GitHub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LeetCode => "leetcode",
            Platform::Codeforces => "codeforces",
            Platform::AtCoder => "atcoder",
            Platform::GitHub => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::LeetCode => "LeetCode",
            Platform::Codeforces => "Codeforces",
            Platform::AtCoder => "AtCoder",
            Platform::GitHub => "GitHub",
        }
    }

    pub fn parse(input: &str) -> Option<Platform> {
        match input.trim().to_ascii_lowercase().as_str() {
            "leetcode" => Some(Platform::LeetCode),
            "codeforces" => Some(Platform::Codeforces),
            "atcoder" => Some(Platform::AtCoder),
            "github" => Some(Platform::GitHub),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contest rating that is either a non-negative value or a textual
/// sentinel ("Unrated" / "N/A") for users without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rating {
    Value(u32),
    Sentinel(String),
}

impl Rating {
    pub fn unrated() -> Self {
        Rating::Sentinel("Unrated".to_string())
    }

    pub fn not_available() -> Self {
        Rating::Sentinel("N/A".to_string())
    }

    pub fn value(&self) -> Option<u32> {
        match self {
            Rating::Value(v) => Some(*v),
            Rating::Sentinel(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeetCodeStats {
    pub total_solved: u64,
    pub easy_solved: u64,
    pub medium_solved: u64,
    pub hard_solved: u64,
    pub ranking: u64,
    pub acceptance_rate: f64,
    pub reputation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeforcesStats {
    pub rating: Rating,
    pub max_rating: Rating,
    pub problems_solved: u64,
    pub rank: String,
    pub max_rank: String,
    pub contribution: i64,
}

impl Default for CodeforcesStats {
    fn default() -> Self {
        Self {
            rating: Rating::unrated(),
            max_rating: Rating::not_available(),
            problems_solved: 0,
            rank: "Unrated".to_string(),
            max_rank: "N/A".to_string(),
            contribution: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtCoderStats {
    pub rating: Rating,
    pub max_rating: Rating,
    pub problems_solved: u64,
    pub contests_participated: u64,
    pub rank: String,
}

impl Default for AtCoderStats {
    fn default() -> Self {
        Self {
            rating: Rating::unrated(),
            max_rating: Rating::not_available(),
            problems_solved: 0,
            contests_participated: 0,
            rank: atcoder_rank_band(0).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubStats {
    pub username: String,
    pub name: String,
    pub repositories: u64,
    pub followers: u64,
    pub following: u64,
    pub total_stars: u64,
    pub total_forks: u64,
    pub total_contributions: u64,
}

/// Normalized per-platform statistics. One closed variant per platform;
/// every variant is total, so consumers never see partial records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformRecord {
    LeetCode(LeetCodeStats),
    Codeforces(CodeforcesStats),
    AtCoder(AtCoderStats),
    GitHub(GitHubStats),
}

impl PlatformRecord {
    /// The canonical all-zero / sentinel record for a platform.
    pub fn empty(platform: Platform) -> Self {
        match platform {
            Platform::LeetCode => PlatformRecord::LeetCode(LeetCodeStats::default()),
            Platform::Codeforces => PlatformRecord::Codeforces(CodeforcesStats::default()),
            Platform::AtCoder => PlatformRecord::AtCoder(AtCoderStats::default()),
            Platform::GitHub => PlatformRecord::GitHub(GitHubStats::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformRecord::LeetCode(_) => Platform::LeetCode,
            PlatformRecord::Codeforces(_) => Platform::Codeforces,
            PlatformRecord::AtCoder(_) => Platform::AtCoder,
            PlatformRecord::GitHub(_) => Platform::GitHub,
        }
    }
}

/// AtCoder color band for a rating.
pub fn atcoder_rank_band(rating: u32) -> &'static str {
    match rating {
        r if r >= 2800 => "Red",
        r if r >= 2400 => "Orange",
        r if r >= 2000 => "Yellow",
        r if r >= 1600 => "Blue",
        r if r >= 1200 => "Cyan",
        r if r >= 800 => "Green",
        r if r >= 400 => "Brown",
        _ => "Gray",
    }
}

/// Per (student, platform) scrape lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    NotStarted,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::NotStarted => "not_started",
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::InProgress => "in_progress",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }

    /// Transition table: not_started -> pending -> in_progress ->
    /// {completed, failed}; completed/failed -> pending on manual retry.
    pub fn can_transition_to(&self, next: ScrapeStatus) -> bool {
        matches!(
            (self, next),
            (ScrapeStatus::NotStarted, ScrapeStatus::Pending)
                | (ScrapeStatus::Pending, ScrapeStatus::InProgress)
                | (ScrapeStatus::InProgress, ScrapeStatus::Completed)
                | (ScrapeStatus::InProgress, ScrapeStatus::Failed)
                | (ScrapeStatus::Completed, ScrapeStatus::Pending)
                | (ScrapeStatus::Failed, ScrapeStatus::Pending)
        )
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student record as persisted in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department: String,
    pub year: u32,
    #[serde(default)]
    pub platform_urls: BTreeMap<Platform, String>,
    #[serde(default)]
    pub platform_data: BTreeMap<Platform, PlatformRecord>,
    #[serde(default)]
    pub scraping_status: BTreeMap<Platform, ScrapeStatus>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StudentProfile {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            department: String::new(),
            year: 0,
            platform_urls: BTreeMap::new(),
            platform_data: BTreeMap::new(),
            scraping_status: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Linking a profile URL implicitly creates that platform's status.
    pub fn set_platform_url(&mut self, platform: Platform, url: impl Into<String>) {
        let url = url.into();
        if url.trim().is_empty() {
            return;
        }
        self.platform_urls.insert(platform, url);
        self.scraping_status
            .entry(platform)
            .or_insert(ScrapeStatus::NotStarted);
    }

    pub fn with_platform_url(mut self, platform: Platform, url: impl Into<String>) -> Self {
        self.set_platform_url(platform, url);
        self
    }

    pub fn status_for(&self, platform: Platform) -> ScrapeStatus {
        self.scraping_status
            .get(&platform)
            .copied()
            .unwrap_or(ScrapeStatus::NotStarted)
    }
}

/// Append-only activity log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub student_id: Uuid,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The headline progress metric for a single platform record.
pub fn platform_metric(record: &PlatformRecord) -> u64 {
    match record {
        PlatformRecord::LeetCode(s) => s.total_solved,
        PlatformRecord::Codeforces(s) => s.problems_solved,
        PlatformRecord::AtCoder(s) => s.problems_solved,
        PlatformRecord::GitHub(s) => s.total_contributions,
    }
}

/// Cross-platform problems-solved total. GitHub activity is not a
/// problems-solved metric and never contributes.
pub fn total_problems(data: &BTreeMap<Platform, PlatformRecord>) -> u64 {
    data.iter()
        .filter(|(platform, _)| **platform != Platform::GitHub)
        .map(|(_, record)| platform_metric(record))
        .sum()
}

/// Number of platforms with a non-zero headline metric.
pub fn active_platforms(data: &BTreeMap<Platform, PlatformRecord>) -> usize {
    data.values()
        .filter(|record| platform_metric(record) > 0)
        .count()
}

/// Compares old and new records on the platform's headline metric and
/// returns a human-readable note only when it increased. Failed scrapes
/// must never reach this function.
pub fn detect_change(
    platform: Platform,
    old: Option<&PlatformRecord>,
    new: &PlatformRecord,
) -> Option<String> {
    let before = old.map(platform_metric).unwrap_or(0);
    let after = platform_metric(new);
    if after <= before {
        return None;
    }
    let delta = after - before;
    let message = match platform {
        Platform::GitHub => format!("made {delta} more contributions on GitHub"),
        _ => format!("solved {delta} more problems on {}", platform.display_name()),
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leetcode_record(total: u64) -> PlatformRecord {
        PlatformRecord::LeetCode(LeetCodeStats {
            total_solved: total,
            ..LeetCodeStats::default()
        })
    }

    #[test]
    fn total_problems_excludes_github() {
        let mut data = BTreeMap::new();
        data.insert(Platform::LeetCode, leetcode_record(42));
        data.insert(
            Platform::Codeforces,
            PlatformRecord::Codeforces(CodeforcesStats {
                problems_solved: 10,
                ..CodeforcesStats::default()
            }),
        );
        data.insert(
            Platform::AtCoder,
            PlatformRecord::AtCoder(AtCoderStats {
                problems_solved: 5,
                ..AtCoderStats::default()
            }),
        );
        data.insert(
            Platform::GitHub,
            PlatformRecord::GitHub(GitHubStats {
                total_contributions: 1000,
                ..GitHubStats::default()
            }),
        );
        assert_eq!(total_problems(&data), 57);
        assert_eq!(active_platforms(&data), 4);
    }

    #[test]
    fn total_problems_of_empty_map_is_zero() {
        assert_eq!(total_problems(&BTreeMap::new()), 0);
        assert_eq!(active_platforms(&BTreeMap::new()), 0);
    }

    #[test]
    fn atcoder_bands_match_thresholds() {
        assert_eq!(atcoder_rank_band(2800), "Red");
        assert_eq!(atcoder_rank_band(2400), "Orange");
        assert_eq!(atcoder_rank_band(2000), "Yellow");
        // Band boundaries are inclusive lower bounds; 1999 is still Blue.
        assert_eq!(atcoder_rank_band(1999), "Blue");
        assert_eq!(atcoder_rank_band(1600), "Blue");
        assert_eq!(atcoder_rank_band(1200), "Cyan");
        assert_eq!(atcoder_rank_band(800), "Green");
        assert_eq!(atcoder_rank_band(400), "Brown");
        assert_eq!(atcoder_rank_band(399), "Gray");
        assert_eq!(atcoder_rank_band(0), "Gray");
    }

    #[test]
    fn status_transitions_follow_the_table() {
        assert!(ScrapeStatus::NotStarted.can_transition_to(ScrapeStatus::Pending));
        assert!(ScrapeStatus::Pending.can_transition_to(ScrapeStatus::InProgress));
        assert!(ScrapeStatus::InProgress.can_transition_to(ScrapeStatus::Completed));
        assert!(ScrapeStatus::InProgress.can_transition_to(ScrapeStatus::Failed));
        assert!(ScrapeStatus::Completed.can_transition_to(ScrapeStatus::Pending));
        assert!(ScrapeStatus::Failed.can_transition_to(ScrapeStatus::Pending));

        assert!(!ScrapeStatus::NotStarted.can_transition_to(ScrapeStatus::Completed));
        assert!(!ScrapeStatus::Completed.can_transition_to(ScrapeStatus::InProgress));
        assert!(!ScrapeStatus::Pending.can_transition_to(ScrapeStatus::Failed));
    }

    #[test]
    fn no_change_yields_no_message() {
        let old = leetcode_record(10);
        let new = leetcode_record(10);
        assert_eq!(detect_change(Platform::LeetCode, Some(&old), &new), None);
    }

    #[test]
    fn metric_increase_yields_delta_message() {
        let old = leetcode_record(10);
        let new = leetcode_record(13);
        let message = detect_change(Platform::LeetCode, Some(&old), &new).unwrap();
        assert!(message.contains('3'), "message should reference the delta: {message}");
        assert!(message.contains("LeetCode"));
    }

    #[test]
    fn metric_decrease_yields_no_message() {
        let old = leetcode_record(10);
        let new = leetcode_record(7);
        assert_eq!(detect_change(Platform::LeetCode, Some(&old), &new), None);
    }

    #[test]
    fn record_serialization_is_tagged_and_camel_cased() {
        let record = PlatformRecord::empty(Platform::Codeforces);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["platform"], "codeforces");
        assert_eq!(value["rating"], "Unrated");
        assert_eq!(value["maxRating"], "N/A");
        assert_eq!(value["problemsSolved"], 0);
    }

    #[test]
    fn linking_a_url_creates_status() {
        let mut student = StudentProfile::new("Alice", "alice@example.edu");
        student.set_platform_url(Platform::LeetCode, "https://leetcode.com/u/alice123/");
        assert_eq!(student.status_for(Platform::LeetCode), ScrapeStatus::NotStarted);
        assert_eq!(student.status_for(Platform::GitHub), ScrapeStatus::NotStarted);
        assert!(student.platform_urls.contains_key(&Platform::LeetCode));

        student.set_platform_url(Platform::Codeforces, "   ");
        assert!(!student.platform_urls.contains_key(&Platform::Codeforces));
    }
}
