//! HTTP fetch utilities, the proxy gateway, and persistence seams for
//! the codetrack engine.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codetrack_core::{ActivityEntry, Platform, PlatformRecord, ScrapeStatus, StudentProfile};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "codetrack-storage";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("rate limited by {url}")]
    RateLimited { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("invalid json from {url}")]
    Decode { url: String },
    #[error("all proxy attempts failed for {url}")]
    AllProxiesFailed { url: String },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

/// Maps a non-success status onto the error taxonomy. 403 and 429 are
/// surfaced distinctly so callers can report rate limiting.
pub fn error_for_status(status: StatusCode, url: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let url = url.to_string();
    Some(match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { url },
        StatusCode::NOT_FOUND => FetchError::NotFound { url },
        other => FetchError::HttpStatus {
            status: other.as_u16(),
            url,
        },
    })
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout; the fallback chain bounds total time as
    /// timeout x number of sources.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    pub async fn fetch_text(&self, source: &str, url: &str) -> Result<String, FetchError> {
        let _permit = self.global_limit.acquire().await.expect("semaphore not closed");
        let span = info_span!("http_fetch", source, url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if let Some(err) = error_for_status(status, &final_url) {
            return Err(err);
        }
        Ok(resp.text().await?)
    }

    pub async fn fetch_json(&self, source: &str, url: &str) -> Result<JsonValue, FetchError> {
        let body = self.fetch_text(source, url).await?;
        decode_json(&body, url)
    }
}

fn decode_json(body: &str, url: &str) -> Result<JsonValue, FetchError> {
    serde_json::from_str(body).map_err(|_| FetchError::Decode {
        url: url.to_string(),
    })
}

/// Public CORS relay templates, tried in order. Chain membership is a
/// data edit, not a control-flow change.
pub const DEFAULT_PROXY_TEMPLATES: &[&str] = &[
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

/// Wraps a target URL with rotating public CORS proxies. Used only by
/// sources whose origin cannot be called directly.
#[derive(Debug, Clone)]
pub struct ProxyGateway {
    templates: Vec<String>,
}

impl Default for ProxyGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyGateway {
    pub fn new() -> Self {
        Self::with_templates(
            DEFAULT_PROXY_TEMPLATES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        )
    }

    pub fn with_templates(templates: Vec<String>) -> Self {
        Self { templates }
    }

    pub fn proxied_url(template: &str, target: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        format!("{template}{encoded}")
    }

    /// First proxy returning a 2xx wins; every failure moves to the
    /// next template. Exhaustion surfaces as `AllProxiesFailed`.
    pub async fn fetch_text(&self, http: &HttpFetcher, target: &str) -> Result<String, FetchError> {
        for template in &self.templates {
            let proxied = Self::proxied_url(template, target);
            match http.fetch_text("proxy", &proxied).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    warn!(target, proxy = template.as_str(), error = %err, "proxy attempt failed");
                }
            }
        }
        Err(FetchError::AllProxiesFailed {
            url: target.to_string(),
        })
    }

    pub async fn fetch_json(&self, http: &HttpFetcher, target: &str) -> Result<JsonValue, FetchError> {
        let body = self.fetch_text(http, target).await?;
        decode_json(&body, target)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student {0} not found")]
    NotFound(Uuid),
    #[error("student {0} already exists")]
    AlreadyExists(Uuid),
    #[error("persistence failure: {0}")]
    Io(String),
}

/// Merge-style partial update of a student record. Only the platforms
/// present in the maps are touched, the dotted-path analog of a
/// document-store update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentUpdate {
    #[serde(default)]
    pub platform_data: BTreeMap<Platform, PlatformRecord>,
    #[serde(default)]
    pub scraping_status: BTreeMap<Platform, ScrapeStatus>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        self.platform_data.is_empty()
            && self.scraping_status.is_empty()
            && self.last_updated.is_none()
    }
}

pub fn apply_update(profile: &mut StudentProfile, update: StudentUpdate) {
    for (platform, record) in update.platform_data {
        profile.platform_data.insert(platform, record);
    }
    for (platform, status) in update.scraping_status {
        profile.scraping_status.insert(platform, status);
    }
    if let Some(ts) = update.last_updated {
        profile.last_updated = Some(ts);
    }
}

/// Document-store seam for student records. Writes are last-writer-wins
/// single-document updates keyed by student id.
#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<StudentProfile, StoreError>;
    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError>;
    async fn insert(&self, profile: StudentProfile) -> Result<(), StoreError>;
    async fn apply(&self, id: Uuid, update: StudentUpdate) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStudentStore {
    students: RwLock<HashMap<Uuid, StudentProfile>>,
}

impl InMemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StudentStore for InMemoryStudentStore {
    async fn get(&self, id: Uuid) -> Result<StudentProfile, StoreError> {
        self.students
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError> {
        let mut students: Vec<_> = self.students.read().await.values().cloned().collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn insert(&self, profile: StudentProfile) -> Result<(), StoreError> {
        let mut students = self.students.write().await;
        if students.contains_key(&profile.id) {
            return Err(StoreError::AlreadyExists(profile.id));
        }
        students.insert(profile.id, profile);
        Ok(())
    }

    async fn apply(&self, id: Uuid, update: StudentUpdate) -> Result<(), StoreError> {
        let mut students = self.students.write().await;
        let profile = students.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_update(profile, update);
        Ok(())
    }
}

/// File-backed document store for the CLI and small deployments. The
/// whole roster is rewritten through a temp-file rename on every
/// mutation, so a crash never leaves a half-written file.
#[derive(Debug)]
pub struct JsonFileStudentStore {
    path: PathBuf,
    students: RwLock<HashMap<Uuid, StudentProfile>>,
}

impl JsonFileStudentStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let students = match fs::read_to_string(&path).await {
            Ok(text) => {
                let roster: Vec<StudentProfile> = serde_json::from_str(&text)
                    .map_err(|e| StoreError::Io(format!("parsing {}: {e}", path.display())))?;
                roster.into_iter().map(|s| (s.id, s)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(StoreError::Io(format!("reading {}: {err}", path.display()))),
        };
        Ok(Self {
            path,
            students: RwLock::new(students),
        })
    }

    async fn persist(&self, students: &HashMap<Uuid, StudentProfile>) -> Result<(), StoreError> {
        let mut roster: Vec<_> = students.values().cloned().collect();
        roster.sort_by_key(|s| s.id);
        let bytes = serde_json::to_vec_pretty(&roster)
            .map_err(|e| StoreError::Io(format!("serializing roster: {e}")))?;

        let temp_path = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| StoreError::Io(format!("writing {}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            StoreError::Io(format!(
                "renaming {} -> {}: {e}",
                temp_path.display(),
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl StudentStore for JsonFileStudentStore {
    async fn get(&self, id: Uuid) -> Result<StudentProfile, StoreError> {
        self.students
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError> {
        let mut students: Vec<_> = self.students.read().await.values().cloned().collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn insert(&self, profile: StudentProfile) -> Result<(), StoreError> {
        let mut students = self.students.write().await;
        if students.contains_key(&profile.id) {
            return Err(StoreError::AlreadyExists(profile.id));
        }
        students.insert(profile.id, profile);
        self.persist(&students).await
    }

    async fn apply(&self, id: Uuid, update: StudentUpdate) -> Result<(), StoreError> {
        let mut students = self.students.write().await;
        let profile = students.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_update(profile, update);
        self.persist(&students).await
    }
}

/// Append-only activity sink. Entries are written only for genuine
/// metric changes, never for failed scrapes.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn log(&self, student_id: Uuid, kind: &str, message: &str) -> Result<(), StoreError>;
    async fn entries_for(&self, student_id: Uuid) -> Result<Vec<ActivityEntry>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    entries: RwLock<Vec<ActivityEntry>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn log(&self, student_id: Uuid, kind: &str, message: &str) -> Result<(), StoreError> {
        self.entries.write().await.push(ActivityEntry {
            student_id,
            kind: kind.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn entries_for(&self, student_id: Uuid) -> Result<Vec<ActivityEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect())
    }
}
