//! JSON API over the student store and refresh engine: roster CRUD,
//! per-student refresh and retry triggers, activity feed, leaderboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use codetrack_core::{
    active_platforms, platform_metric, total_problems, Platform, PlatformRecord, ScrapeStatus,
    StudentProfile,
};
use codetrack_storage::StoreError;
use codetrack_sync::{RefreshEngine, RefreshOutcome, SyncError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CRATE_NAME: &str = "codetrack-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RefreshEngine>,
}

impl AppState {
    pub fn new(engine: Arc<RefreshEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStudent {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub year: u32,
    #[serde(default)]
    pub platform_urls: BTreeMap<Platform, String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub run_id: Uuid,
    pub student_id: Uuid,
    pub statuses: BTreeMap<Platform, ScrapeStatus>,
    pub data: BTreeMap<Platform, PlatformRecord>,
    pub last_updated: DateTime<Utc>,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            student_id: outcome.student_id,
            statuses: outcome.statuses,
            data: outcome.data,
            last_updated: outcome.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaderboardRow {
    pub student_id: Uuid,
    pub name: String,
    pub total_problems: u64,
    pub active_platforms: usize,
    pub platform_metrics: BTreeMap<Platform, u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LeaderboardQuery {
    pub platform: Option<String>,
}

fn store_error_response(err: StoreError) -> Response {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Io(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

fn sync_error_response(err: SyncError) -> Response {
    match err {
        SyncError::Store(inner) => store_error_response(inner),
        SyncError::NoProfileUrl { .. } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

fn bad_platform(raw: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": format!("unknown platform {raw}")})),
    )
        .into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/students", get(list_students_handler).post(create_student_handler))
        .route("/students/{id}", get(get_student_handler))
        .route("/students/{id}/refresh", post(refresh_student_handler))
        .route(
            "/students/{id}/platforms/{platform}/retry",
            post(retry_platform_handler),
        )
        .route("/students/{id}/activity", get(activity_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn list_students_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.store().list().await {
        Ok(students) => Json(students).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn create_student_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateStudent>,
) -> Response {
    let mut profile = StudentProfile::new(body.name, body.email);
    profile.department = body.department;
    profile.year = body.year;
    for (platform, url) in body.platform_urls {
        profile.set_platform_url(platform, url);
    }
    match state.engine.store().insert(profile.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(profile)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn get_student_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.engine.store().get(id).await {
        Ok(profile) => Json(profile).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn refresh_student_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.engine.refresh_student(id).await {
        Ok(outcome) => Json(RefreshResponse::from(outcome)).into_response(),
        Err(err) => sync_error_response(err),
    }
}

async fn retry_platform_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((id, platform)): AxumPath<(Uuid, String)>,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return bad_platform(&platform);
    };
    match state.engine.retry_platform(id, platform).await {
        Ok(outcome) => Json(RefreshResponse::from(outcome)).into_response(),
        Err(err) => sync_error_response(err),
    }
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    // A student with no entries yields an empty feed, so an unknown id
    // is checked against the store first.
    if let Err(err) = state.engine.store().get(id).await {
        return store_error_response(err);
    }
    match state.engine.activity().entries_for(id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let sort_platform = match query.platform.as_deref() {
        Some(raw) => match Platform::parse(raw) {
            Some(platform) => Some(platform),
            None => return bad_platform(raw),
        },
        None => None,
    };
    let students = match state.engine.store().list().await {
        Ok(students) => students,
        Err(err) => return store_error_response(err),
    };

    let mut rows: Vec<LeaderboardRow> = students
        .into_iter()
        .map(|student| LeaderboardRow {
            student_id: student.id,
            name: student.name,
            total_problems: total_problems(&student.platform_data),
            active_platforms: active_platforms(&student.platform_data),
            platform_metrics: student
                .platform_data
                .iter()
                .map(|(platform, record)| (*platform, platform_metric(record)))
                .collect(),
            last_updated: student.last_updated,
        })
        .collect();
    match sort_platform {
        Some(platform) => rows.sort_by(|a, b| {
            let a_metric = a.platform_metrics.get(&platform).copied().unwrap_or(0);
            let b_metric = b.platform_metrics.get(&platform).copied().unwrap_or(0);
            b_metric.cmp(&a_metric).then_with(|| a.name.cmp(&b.name))
        }),
        None => rows.sort_by(|a, b| {
            b.total_problems
                .cmp(&a.total_problems)
                .then_with(|| a.name.cmp(&b.name))
        }),
    }
    Json(rows).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use codetrack_scrapers::{PlatformScraper, ScrapeContext};
    use codetrack_storage::{InMemoryActivityLog, InMemoryStudentStore, StudentStore};
    use codetrack_sync::SyncConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    struct StubScraper {
        platform: Platform,
        payload: JsonValue,
    }

    #[async_trait]
    impl PlatformScraper for StubScraper {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn scrape(&self, _ctx: &ScrapeContext, _profile_url: &str) -> JsonValue {
            self.payload.clone()
        }
    }

    fn test_state(
        store: Arc<InMemoryStudentStore>,
        scrapers: Vec<Arc<dyn PlatformScraper>>,
    ) -> AppState {
        let ctx = SyncConfig::default().build_context().unwrap();
        let engine =
            RefreshEngine::new(store, Arc::new(InMemoryActivityLog::new()), ctx).with_scrapers(scrapers);
        AppState::new(Arc::new(engine))
    }

    async fn body_json(resp: Response) -> JsonValue {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_fetch_student() {
        let app = app(test_state(Arc::new(InMemoryStudentStore::new()), Vec::new()));
        let created = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/students")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "name": "Alice",
                            "email": "alice@example.edu",
                            "platform_urls": {"leetcode": "https://leetcode.com/u/alice/"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let profile = body_json(created).await;
        let id = profile["id"].as_str().unwrap().to_string();
        assert_eq!(profile["scraping_status"]["leetcode"], "not_started");

        let fetched = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/students/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        assert_eq!(body_json(fetched).await["name"], "Alice");
    }

    #[tokio::test]
    async fn unknown_student_is_404() {
        let app = app(test_state(Arc::new(InMemoryStudentStore::new()), Vec::new()));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/students/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_endpoint_reports_statuses() {
        let store = Arc::new(InMemoryStudentStore::new());
        let profile = StudentProfile::new("Bob", "bob@example.edu")
            .with_platform_url(Platform::LeetCode, "https://leetcode.com/u/bob/");
        let id = profile.id;
        store.insert(profile).await.unwrap();

        let app = app(test_state(
            store,
            vec![Arc::new(StubScraper {
                platform: Platform::LeetCode,
                payload: json!({"totalSolved": 17}),
            })],
        ));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/students/{id}/refresh"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let outcome = body_json(resp).await;
        assert_eq!(outcome["statuses"]["leetcode"], "completed");
        assert_eq!(outcome["data"]["leetcode"]["totalSolved"], 17);
    }

    #[tokio::test]
    async fn retry_with_unknown_platform_is_400() {
        let store = Arc::new(InMemoryStudentStore::new());
        let profile = StudentProfile::new("Carol", "carol@example.edu");
        let id = profile.id;
        store.insert(profile).await.unwrap();

        let app = app(test_state(store, Vec::new()));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/students/{id}/platforms/hackerrank/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retry_without_linked_url_is_400() {
        let store = Arc::new(InMemoryStudentStore::new());
        let profile = StudentProfile::new("Dana", "dana@example.edu");
        let id = profile.id;
        store.insert(profile).await.unwrap();

        let app = app(test_state(store, Vec::new()));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/students/{id}/platforms/github/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn leaderboard_sorts_by_total_then_platform() {
        let store = Arc::new(InMemoryStudentStore::new());
        let mut first = StudentProfile::new("First", "first@example.edu");
        first.platform_data.insert(
            Platform::LeetCode,
            codetrack_scrapers::normalize(Platform::LeetCode, &json!({"totalSolved": 100})),
        );
        let mut second = StudentProfile::new("Second", "second@example.edu");
        second.platform_data.insert(
            Platform::Codeforces,
            codetrack_scrapers::normalize(Platform::Codeforces, &json!({"problemsSolved": 250})),
        );
        store.insert(first).await.unwrap();
        store.insert(second).await.unwrap();

        let app = app(test_state(store, Vec::new()));
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/leaderboard")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        assert_eq!(rows[0]["name"], "Second");
        assert_eq!(rows[0]["total_problems"], 250);

        let by_leetcode = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/leaderboard?platform=leetcode")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let rows = body_json(by_leetcode).await;
        assert_eq!(rows[0]["name"], "First");
    }
}
