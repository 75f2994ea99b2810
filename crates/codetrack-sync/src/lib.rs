//! Refresh orchestration: fans scrapes out across platforms, keeps the
//! per-platform status machine honest, persists one merged update per
//! run, and records activity notes when a headline metric moves.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use codetrack_core::{detect_change, Platform, PlatformRecord, ScrapeStatus, StudentProfile};
use codetrack_scrapers::{all_scrapers, normalize, PlatformScraper, ScrapeContext};
use codetrack_storage::{
    ActivityLog, HttpClientConfig, HttpFetcher, ProxyGateway, StoreError, StudentStore,
    StudentUpdate,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "codetrack-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("student {student_id} has no {platform} profile url")]
    NoProfileUrl { student_id: Uuid, platform: Platform },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub refresh_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_agent: "codetrack-bot/0.1".to_string(),
            http_timeout_secs: 15,
            scheduler_enabled: false,
            refresh_cron: "0 0 6 * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: std::env::var("CODETRACK_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("CODETRACK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            scheduler_enabled: std::env::var("CODETRACK_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            refresh_cron: std::env::var("CODETRACK_REFRESH_CRON").unwrap_or(defaults.refresh_cron),
        }
    }

    pub fn build_context(&self) -> anyhow::Result<ScrapeContext> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        })
        .context("building http fetcher")?;
        Ok(ScrapeContext::new(http, ProxyGateway::new()))
    }
}

/// Result of one refresh run for one student.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub run_id: Uuid,
    pub student_id: Uuid,
    pub statuses: BTreeMap<Platform, ScrapeStatus>,
    pub data: BTreeMap<Platform, PlatformRecord>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub students: usize,
    pub platforms_completed: usize,
    pub platforms_failed: usize,
}

pub struct RefreshEngine {
    store: Arc<dyn StudentStore>,
    activity: Arc<dyn ActivityLog>,
    ctx: ScrapeContext,
    scrapers: Vec<Arc<dyn PlatformScraper>>,
}

impl RefreshEngine {
    pub fn new(
        store: Arc<dyn StudentStore>,
        activity: Arc<dyn ActivityLog>,
        ctx: ScrapeContext,
    ) -> Self {
        Self {
            store,
            activity,
            ctx,
            scrapers: all_scrapers(),
        }
    }

    /// Replaces the scraper set, keeping everything else. Used by tests
    /// to run the pipeline against stub scrapers.
    pub fn with_scrapers(mut self, scrapers: Vec<Arc<dyn PlatformScraper>>) -> Self {
        self.scrapers = scrapers;
        self
    }

    pub fn store(&self) -> Arc<dyn StudentStore> {
        self.store.clone()
    }

    pub fn activity(&self) -> Arc<dyn ActivityLog> {
        self.activity.clone()
    }

    fn scraper_for(&self, platform: Platform) -> Option<Arc<dyn PlatformScraper>> {
        self.scrapers.iter().find(|s| s.platform() == platform).cloned()
    }

    /// Scrapes every linked platform concurrently and persists a single
    /// merged update. A platform failure marks that platform `failed`
    /// and leaves its previous data untouched; only a store failure
    /// propagates.
    pub async fn refresh_student(&self, student_id: Uuid) -> Result<RefreshOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        let profile = self.store.get(student_id).await?;

        let targets: Vec<(Platform, String)> = profile
            .platform_urls
            .iter()
            .filter_map(|(platform, url)| {
                self.scraper_for(*platform).map(|_| (*platform, url.clone()))
            })
            .collect();
        if targets.is_empty() {
            let outcome = RefreshOutcome {
                run_id,
                student_id,
                statuses: BTreeMap::new(),
                data: BTreeMap::new(),
                last_updated: Utc::now(),
            };
            return Ok(outcome);
        }

        // The whole batch walks pending -> in_progress so every write
        // respects the status transition table.
        for status in [ScrapeStatus::Pending, ScrapeStatus::InProgress] {
            self.store
                .apply(
                    student_id,
                    StudentUpdate {
                        scraping_status: targets
                            .iter()
                            .map(|(platform, _)| (*platform, status))
                            .collect(),
                        ..StudentUpdate::default()
                    },
                )
                .await?;
        }

        let mut tasks = JoinSet::new();
        for (platform, url) in &targets {
            let Some(scraper) = self.scraper_for(*platform) else {
                continue;
            };
            let ctx = self.ctx.clone();
            let platform = *platform;
            let url = url.clone();
            let span = info_span!("platform_scrape", %run_id, %student_id, platform = platform.as_str());
            tasks.spawn(
                async move {
                    let raw = scraper.scrape(&ctx, &url).await;
                    (platform, normalize(platform, &raw))
                }
                .instrument(span),
            );
        }

        let mut records: BTreeMap<Platform, PlatformRecord> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((platform, record)) => {
                    records.insert(platform, record);
                }
                Err(err) => {
                    warn!(%run_id, error = %err, "scrape task panicked");
                }
            }
        }

        let outcome = self.assemble_outcome(run_id, &profile, &targets, records);
        self.persist_outcome(&profile, &outcome).await?;
        Ok(outcome)
    }

    /// Re-scrapes one platform only. The platform goes through
    /// `pending` first so a watching client sees the retry begin.
    pub async fn retry_platform(
        &self,
        student_id: Uuid,
        platform: Platform,
    ) -> Result<RefreshOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        let profile = self.store.get(student_id).await?;
        let url = profile
            .platform_urls
            .get(&platform)
            .cloned()
            .ok_or(SyncError::NoProfileUrl { student_id, platform })?;

        self.store
            .apply(
                student_id,
                StudentUpdate {
                    scraping_status: [(platform, ScrapeStatus::Pending)].into(),
                    ..StudentUpdate::default()
                },
            )
            .await?;
        self.store
            .apply(
                student_id,
                StudentUpdate {
                    scraping_status: [(platform, ScrapeStatus::InProgress)].into(),
                    ..StudentUpdate::default()
                },
            )
            .await?;

        let record = match self.scraper_for(platform) {
            Some(scraper) => {
                let raw = scraper
                    .scrape(&self.ctx, &url)
                    .instrument(info_span!("platform_scrape", %run_id, %student_id, platform = platform.as_str()))
                    .await;
                normalize(platform, &raw)
            }
            None => PlatformRecord::empty(platform),
        };

        let targets = vec![(platform, url)];
        let records = [(platform, record)].into();
        let outcome = self.assemble_outcome(run_id, &profile, &targets, records);
        self.persist_outcome(&profile, &outcome).await?;
        Ok(outcome)
    }

    pub async fn refresh_all_students(&self) -> Result<BatchSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let mut summary = BatchSummary {
            run_id,
            ..BatchSummary::default()
        };
        for profile in self.store.list().await? {
            match self.refresh_student(profile.id).await {
                Ok(outcome) => {
                    summary.students += 1;
                    for status in outcome.statuses.values() {
                        match status {
                            ScrapeStatus::Completed => summary.platforms_completed += 1,
                            ScrapeStatus::Failed => summary.platforms_failed += 1,
                            _ => {}
                        }
                    }
                }
                Err(err) => {
                    warn!(%run_id, student_id = %profile.id, error = %err, "student refresh failed");
                }
            }
        }
        Ok(summary)
    }

    /// A scrape whose normalized record equals the platform's empty
    /// record carried no information and counts as failed; previous
    /// data for that platform is kept.
    fn assemble_outcome(
        &self,
        run_id: Uuid,
        profile: &StudentProfile,
        targets: &[(Platform, String)],
        mut records: BTreeMap<Platform, PlatformRecord>,
    ) -> RefreshOutcome {
        let mut statuses = BTreeMap::new();
        let mut data = BTreeMap::new();
        for (platform, _) in targets {
            match records.remove(platform) {
                Some(record) if record != PlatformRecord::empty(*platform) => {
                    statuses.insert(*platform, ScrapeStatus::Completed);
                    data.insert(*platform, record);
                }
                _ => {
                    statuses.insert(*platform, ScrapeStatus::Failed);
                }
            }
        }
        RefreshOutcome {
            run_id,
            student_id: profile.id,
            statuses,
            data,
            last_updated: Utc::now(),
        }
    }

    async fn persist_outcome(
        &self,
        before: &StudentProfile,
        outcome: &RefreshOutcome,
    ) -> Result<(), StoreError> {
        self.store
            .apply(
                outcome.student_id,
                StudentUpdate {
                    platform_data: outcome.data.clone(),
                    scraping_status: outcome.statuses.clone(),
                    last_updated: Some(outcome.last_updated),
                },
            )
            .await?;

        // Activity notes only for completed platforms whose headline
        // metric increased. Log failures never fail the refresh.
        for (platform, record) in &outcome.data {
            if let Some(message) =
                detect_change(*platform, before.platform_data.get(platform), record)
            {
                if let Err(err) = self
                    .activity
                    .log(outcome.student_id, "platform_progress", &message)
                    .await
                {
                    warn!(student_id = %outcome.student_id, error = %err, "activity log write failed");
                }
            }
        }
        Ok(())
    }
}

/// Builds and starts the cron scheduler when enabled; `None` otherwise.
pub async fn maybe_build_scheduler(
    engine: Arc<RefreshEngine>,
    config: &SyncConfig,
) -> anyhow::Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.refresh_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let engine = engine.clone();
        Box::pin(async move {
            match engine.refresh_all_students().await {
                Ok(summary) => {
                    tracing::info!(
                        run_id = %summary.run_id,
                        students = summary.students,
                        completed = summary.platforms_completed,
                        failed = summary.platforms_failed,
                        "scheduled refresh finished"
                    );
                }
                Err(err) => warn!(error = %err, "scheduled refresh failed"),
            }
        })
    })
    .with_context(|| format!("creating refresh job for cron {cron}"))?;
    sched.add(job).await.context("adding refresh job")?;
    sched.start().await.context("starting scheduler")?;
    Ok(Some(sched))
}
