//! Conversion of raw, platform-shaped payloads into the fixed typed
//! schema. Pure and total: any input, including null or garbage,
//! produces a complete record.

use codetrack_core::{
    atcoder_rank_band, AtCoderStats, CodeforcesStats, GitHubStats, LeetCodeStats, Platform,
    PlatformRecord, Rating,
};
use serde_json::Value as JsonValue;

pub(crate) fn json_u64(raw: &JsonValue, key: &str) -> u64 {
    match raw.get(key) {
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .map(|v| v.max(0) as u64)
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.max(0.0) as u64))
            .unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().map(|v| v.max(0) as u64).unwrap_or(0),
        _ => 0,
    }
}

fn json_i64_clamped(raw: &JsonValue, key: &str) -> i64 {
    match raw.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0).max(0),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().unwrap_or(0).max(0),
        _ => 0,
    }
}

fn json_rate(raw: &JsonValue, key: &str) -> f64 {
    let parsed = match raw.get(key) {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn json_string(raw: &JsonValue, key: &str, default: &str) -> String {
    match raw.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

/// Numbers become clamped rating values; strings are kept as sentinels
/// ("Unrated" / "N/A") unless they are themselves numeric.
fn json_rating(raw: &JsonValue, key: &str, missing: Rating) -> Rating {
    match raw.get(key) {
        Some(JsonValue::Number(n)) => Rating::Value(
            n.as_i64()
                .map(|v| v.max(0) as u32)
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.max(0.0) as u32))
                .unwrap_or(0),
        ),
        Some(JsonValue::String(s)) => match s.trim().parse::<i64>() {
            Ok(v) => Rating::Value(v.max(0) as u32),
            Err(_) => Rating::Sentinel(s.clone()),
        },
        _ => missing,
    }
}

/// Normalizes a raw payload for `platform` into a complete record.
pub fn normalize(platform: Platform, raw: &JsonValue) -> PlatformRecord {
    if !raw.is_object() {
        return PlatformRecord::empty(platform);
    }
    match platform {
        Platform::LeetCode => PlatformRecord::LeetCode(LeetCodeStats {
            total_solved: json_u64(raw, "totalSolved"),
            easy_solved: json_u64(raw, "easySolved"),
            medium_solved: json_u64(raw, "mediumSolved"),
            hard_solved: json_u64(raw, "hardSolved"),
            ranking: json_u64(raw, "ranking"),
            acceptance_rate: json_rate(raw, "acceptanceRate"),
            reputation: json_u64(raw, "reputation"),
        }),
        Platform::Codeforces => PlatformRecord::Codeforces(CodeforcesStats {
            rating: json_rating(raw, "rating", Rating::unrated()),
            max_rating: json_rating(raw, "maxRating", Rating::not_available()),
            problems_solved: json_u64(raw, "problemsSolved"),
            rank: json_string(raw, "rank", "Unrated"),
            max_rank: json_string(raw, "maxRank", "N/A"),
            contribution: json_i64_clamped(raw, "contribution"),
        }),
        Platform::AtCoder => {
            let rating = json_rating(raw, "rating", Rating::unrated());
            let default_rank = atcoder_rank_band(rating.value().unwrap_or(0));
            PlatformRecord::AtCoder(AtCoderStats {
                rank: json_string(raw, "rank", default_rank),
                max_rating: json_rating(raw, "maxRating", Rating::not_available()),
                problems_solved: json_u64(raw, "problemsSolved"),
                contests_participated: json_u64(raw, "contestsParticipated"),
                rating,
            })
        }
        Platform::GitHub => PlatformRecord::GitHub(GitHubStats {
            username: json_string(raw, "username", ""),
            name: json_string(raw, "name", ""),
            repositories: json_u64(raw, "repositories"),
            followers: json_u64(raw, "followers"),
            following: json_u64(raw, "following"),
            total_stars: json_u64(raw, "totalStars"),
            total_forks: json_u64(raw, "totalForks"),
            total_contributions: json_u64(raw, "totalContributions"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_garbage_yield_the_empty_record() {
        for platform in Platform::ALL {
            assert_eq!(
                normalize(platform, &JsonValue::Null),
                PlatformRecord::empty(platform)
            );
            assert_eq!(
                normalize(platform, &json!("nonsense")),
                PlatformRecord::empty(platform)
            );
            assert_eq!(
                normalize(platform, &json!([1, 2, 3])),
                PlatformRecord::empty(platform)
            );
            assert_eq!(normalize(platform, &json!({})), PlatformRecord::empty(platform));
        }
    }

    #[test]
    fn negative_and_malformed_numbers_clamp_to_zero() {
        let raw = json!({
            "totalSolved": -5,
            "easySolved": "12",
            "mediumSolved": "garbage",
            "hardSolved": null,
            "ranking": 3.7,
            "acceptanceRate": 250.0,
            "reputation": -1
        });
        let PlatformRecord::LeetCode(stats) = normalize(Platform::LeetCode, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.total_solved, 0);
        assert_eq!(stats.easy_solved, 12);
        assert_eq!(stats.medium_solved, 0);
        assert_eq!(stats.hard_solved, 0);
        assert_eq!(stats.ranking, 3);
        assert_eq!(stats.acceptance_rate, 100.0);
        assert_eq!(stats.reputation, 0);
    }

    #[test]
    fn acceptance_rate_clamps_low_end_and_nan() {
        let raw = json!({"acceptanceRate": -3.5});
        let PlatformRecord::LeetCode(stats) = normalize(Platform::LeetCode, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.acceptance_rate, 0.0);

        let raw = json!({"acceptanceRate": "54.3%"});
        let PlatformRecord::LeetCode(stats) = normalize(Platform::LeetCode, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.acceptance_rate, 54.3);
    }

    #[test]
    fn rating_sentinels_are_preserved_not_zeroed() {
        let raw = json!({"rating": "Unrated", "maxRating": "N/A", "problemsSolved": 3});
        let PlatformRecord::Codeforces(stats) = normalize(Platform::Codeforces, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.rating, Rating::unrated());
        assert_eq!(stats.max_rating, Rating::not_available());
        assert_eq!(stats.problems_solved, 3);

        let raw = json!({"rating": 1543, "maxRating": 1602});
        let PlatformRecord::Codeforces(stats) = normalize(Platform::Codeforces, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.rating, Rating::Value(1543));
        assert_eq!(stats.max_rating, Rating::Value(1602));
    }

    #[test]
    fn missing_ratings_default_to_sentinels() {
        let PlatformRecord::Codeforces(stats) = normalize(Platform::Codeforces, &json!({})) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.rating, Rating::unrated());
        assert_eq!(stats.max_rating, Rating::not_available());
        assert_eq!(stats.rank, "Unrated");
        assert_eq!(stats.max_rank, "N/A");
    }

    #[test]
    fn atcoder_rank_defaults_to_the_rating_band() {
        let raw = json!({"rating": 2100, "problemsSolved": 10});
        let PlatformRecord::AtCoder(stats) = normalize(Platform::AtCoder, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.rank, "Yellow");

        let PlatformRecord::AtCoder(stats) = normalize(Platform::AtCoder, &json!({})) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.rank, "Gray");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raws = vec![
            (Platform::LeetCode, json!({"totalSolved": 42, "acceptanceRate": 51.2})),
            (
                Platform::Codeforces,
                json!({"rating": 1543, "rank": "specialist", "problemsSolved": 120, "contribution": -4}),
            ),
            (Platform::AtCoder, json!({"rating": 801, "problemsSolved": 33})),
            (Platform::GitHub, json!({"username": "dave", "totalStars": 9})),
            (Platform::LeetCode, JsonValue::Null),
        ];
        for (platform, raw) in raws {
            let once = normalize(platform, &raw);
            let reserialized = serde_json::to_value(&once).unwrap();
            let twice = normalize(platform, &reserialized);
            assert_eq!(once, twice, "normalize must be idempotent for {platform}");
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = json!({"totalSolved": 5, "source": "mirror-a", "status": "success"});
        let PlatformRecord::LeetCode(stats) = normalize(Platform::LeetCode, &raw) else {
            panic!("wrong variant");
        };
        assert_eq!(stats.total_solved, 5);
    }
}
