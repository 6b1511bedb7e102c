//! Schedules and executes the terminal action for a torrent's free-leech window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use seedkeeper_data::{ArchiveReason, SettingsStore, TorrentRecord, TorrentRepository};
use seedkeeper_downloader_api::DownloaderError;
use seedkeeper_events::{Event, EventBus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::registry::DownloaderRegistry;

const EXPIRED_FREE_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MONITORED_PROGRESS_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const ALL_PUSHED_PROGRESS_SCAN_INTERVAL: Duration = Duration::from_secs(2 * 60);
const ARCHIVE_SCAN_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const ARCHIVE_AGE: ChronoDuration = ChronoDuration::days(14);
const PROGRESS_SCAN_BATCH: usize = 50;
const GET_TORRENT_TIMEOUT: Duration = Duration::from_secs(10);

const BASE_RETRY_DELAY_SECS: i64 = 30;
const MAX_RETRY_DELAY_SECS: i64 = 10 * 60;
const MAX_RETRY_COUNT: i32 = 3;

const REASON_REMOVED_FROM_DOWNLOADER: &str = "种子已从下载器中删除";
const REASON_AUTO_DELETED: &str = "免费期结束，自动删除（未完成）";
const REASON_PAUSED: &str = "免费期结束，下载未完成";

/// The three terminal actions `handle_free_ended_torrent` can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeEndAction {
    /// Stop seeding and downloading, keep the torrent registered.
    Pause,
    /// Remove from the downloader, keeping the record as a paused history row.
    Delete,
    /// Stop seeding but keep the torrent marked complete.
    Complete,
}

/// `delay = min(baseDelay * 2^retryCount * 2, maxDelay)`, applied when a
/// free-end decision fails and must be retried.
fn retry_delay_secs(retry_count: i32) -> i64 {
    let exponent = retry_count.max(0);
    let scaled = BASE_RETRY_DELAY_SECS.saturating_mul(2_i64.saturating_pow(u32::try_from(exponent).unwrap_or(u32::MAX)) * 2);
    scaled.min(MAX_RETRY_DELAY_SECS)
}

/// Watches scheduled free-leech expirations and runs the claim/decide/act
/// pipeline for each, backed by four independent periodic scans.
pub struct FreeEndMonitor {
    repository: Arc<dyn TorrentRepository>,
    settings: Arc<dyn SettingsStore>,
    registry: Arc<DownloaderRegistry>,
    events: EventBus,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl FreeEndMonitor {
    /// Build a monitor over the given dependencies. Call [`Self::start`] to
    /// begin scheduling.
    #[must_use]
    pub fn new(
        repository: Arc<dyn TorrentRepository>,
        settings: Arc<dyn SettingsStore>,
        registry: Arc<DownloaderRegistry>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            settings,
            registry,
            events,
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Load active torrents with a future free-leech expiry and schedule a
    /// timer for each, then start the four independent periodic scans.
    pub async fn start(self: &Arc<Self>) {
        match self.repository.load_active().await {
            Ok(records) => {
                for record in records {
                    if let Some(fire_at) = record.free_leech_until {
                        self.schedule_torrent(record.id, fire_at).await;
                    }
                }
                info!("free-end monitor loaded active torrents");
            }
            Err(err) => {
                error!(error = %err, "failed to load active torrents for free-end scheduling");
            }
        }

        self.spawn_expired_free_scan();
        self.spawn_monitored_progress_scan();
        self.spawn_all_pushed_progress_scan();
        self.spawn_archive_scan();
        self.spawn_config_change_watch();
    }

    /// Log settings revisions as they land; every decision re-reads settings
    /// fresh at expiry time, so there is nothing to invalidate here.
    fn spawn_config_change_watch(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut subscription = monitor.events.subscribe();
            while let Some(envelope) = subscription.next().await {
                if let Event::ConfigChanged { revision } = envelope.event {
                    info!(revision, "free-end monitor observed settings change");
                }
            }
        });
    }

    /// Spawn (or replace) a timer that fires `handle_free_ended_torrent` at `fire_at`.
    pub async fn schedule_torrent(self: &Arc<Self>, torrent_id: Uuid, fire_at: chrono::DateTime<Utc>) {
        self.cancel_torrent(torrent_id).await;

        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + delay;
        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            monitor.handle_free_ended_torrent(torrent_id).await;
        });

        self.timers.lock().await.insert(torrent_id, task);
    }

    /// Abort and remove the scheduled timer for `torrent_id`, if any.
    pub async fn cancel_torrent(&self, torrent_id: Uuid) {
        if let Some(task) = self.timers.lock().await.remove(&torrent_id) {
            if !task.is_finished() {
                task.abort();
            }
        }
    }

    fn spawn_expired_free_scan(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRED_FREE_SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                monitor.scan_expired_free().await;
            }
        });
    }

    fn spawn_monitored_progress_scan(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITORED_PROGRESS_SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                monitor
                    .scan_progress(|record| {
                        record.pause_on_free_end && !record.paused && !record.completed && record.is_pushed
                    })
                    .await;
            }
        });
    }

    fn spawn_all_pushed_progress_scan(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ALL_PUSHED_PROGRESS_SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                monitor
                    .scan_progress(|record| record.is_pushed && !record.completed && !record.paused)
                    .await;
            }
        });
    }

    fn spawn_archive_scan(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ARCHIVE_SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                monitor.scan_archive().await;
            }
        });
    }

    /// Re-handle every active torrent whose window has already elapsed.
    /// Safe to call redundantly: `claim_for_free_end` makes this idempotent
    /// against a timer that is also about to (or already did) fire.
    async fn scan_expired_free(self: &Arc<Self>) {
        let Ok(records) = self.repository.load_active().await else {
            return;
        };
        let now = Utc::now();
        for record in records {
            if record.free_leech_until.is_some_and(|expiry| expiry <= now) {
                self.handle_free_ended_torrent(record.id).await;
            }
        }
    }

    /// Refresh observed progress for up to [`PROGRESS_SCAN_BATCH`] torrents
    /// matching `scope`, querying each torrent's downloader directly.
    async fn scan_progress(&self, scope: impl Fn(&TorrentRecord) -> bool) {
        let Ok(records) = self.repository.load_active().await else {
            return;
        };
        let Ok(sites) = self.settings.load_sites().await else {
            return;
        };

        for record in records.into_iter().filter(|record| scope(record)).take(PROGRESS_SCAN_BATCH) {
            let Ok(downloader) = self.registry.route(&sites, &record.site).await else {
                continue;
            };
            if let Ok(snapshot) = downloader.status(record.id).await {
                if let Err(err) = self.repository.update_progress(record.id, snapshot.progress).await {
                    warn!(torrent_id = %record.id, error = %err, "failed to persist refreshed progress");
                }
            }
        }
    }

    /// Archive paused or completed torrents that have sat in a terminal
    /// state for longer than [`ARCHIVE_AGE`].
    async fn scan_archive(&self) {
        let Ok(records) = self.repository.load_all().await else {
            return;
        };
        let now = Utc::now();
        for record in records {
            let terminal_at = record.completed_at.or(record.paused_at);
            let Some(terminal_at) = terminal_at else {
                continue;
            };
            if (record.paused || record.completed) && now - terminal_at > ARCHIVE_AGE {
                if let Err(err) = self.repository.archive_and_remove(record.id, ArchiveReason::Manual).await {
                    error!(torrent_id = %record.id, error = %err, "failed to archive aged torrent record");
                }
            }
        }
    }

    /// The claim/decide/act critical section, shared by timer fires and
    /// every periodic scan.
    async fn handle_free_ended_torrent(&self, torrent_id: Uuid) {
        self.timers.lock().await.remove(&torrent_id);

        let claimed = match self.repository.claim_for_free_end(torrent_id).await {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(torrent_id = %torrent_id, error = %err, "failed to claim torrent for free-end handling");
                return;
            }
        };
        if !claimed {
            return;
        }

        let Ok(Some(record)) = self.repository.load(torrent_id).await else {
            info!(torrent_id = %torrent_id, "claimed torrent no longer exists, nothing to act on");
            return;
        };

        let Ok(sites) = self.settings.load_sites().await else {
            error!(torrent_id = %torrent_id, "failed to load site settings for free-end decision");
            self.retry_later(torrent_id, record.retry_count, "failed to load site settings").await;
            return;
        };

        let Ok(downloader) = self.registry.route(&sites, &record.site).await else {
            warn!(torrent_id = %torrent_id, "no downloader available for free-end decision");
            self.retry_later(torrent_id, record.retry_count, "no downloader available").await;
            return;
        };

        let status = timeout(GET_TORRENT_TIMEOUT, downloader.status(torrent_id)).await;

        let snapshot = match status {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(DownloaderError::NotFound { .. })) => {
                self.mark_removed_from_downloader(torrent_id).await;
                return;
            }
            Ok(Err(err)) => {
                self.retry_later(torrent_id, record.retry_count, &err.to_string()).await;
                return;
            }
            Err(_) => {
                self.retry_later(torrent_id, record.retry_count, "getTorrent timed out").await;
                return;
            }
        };

        if snapshot.progress >= 1.0 {
            self.finish(torrent_id, FreeEndAction::Complete, snapshot.progress).await;
            return;
        }

        let Ok(global) = self.settings.load_global().await else {
            error!(torrent_id = %torrent_id, "failed to load global settings for free-end decision");
            self.retry_later(torrent_id, record.retry_count, "failed to load global settings").await;
            return;
        };

        if global.auto_delete_on_free_end {
            match downloader.remove_torrent(torrent_id, true).await {
                Ok(()) | Err(DownloaderError::NotFound { .. }) => {
                    self.mark_auto_deleted(torrent_id, snapshot.progress).await;
                }
                Err(err) => {
                    self.retry_later(torrent_id, record.retry_count, &err.to_string()).await;
                }
            }
        } else {
            match downloader.pause_torrent(torrent_id).await {
                Ok(()) => self.mark_paused_for_free_end(torrent_id, snapshot.progress).await,
                Err(err) => {
                    self.retry_later(torrent_id, record.retry_count, &err.to_string()).await;
                }
            }
        }
    }

    async fn mark_removed_from_downloader(&self, torrent_id: Uuid) {
        self.cancel_torrent(torrent_id).await;
        if let Err(err) = self.repository.mark_removed_from_downloader(torrent_id).await {
            error!(torrent_id = %torrent_id, error = %err, "failed to persist removed-from-downloader outcome");
        }
        info!(torrent_id = %torrent_id, reason = REASON_REMOVED_FROM_DOWNLOADER, "torrent removed from downloader, marked complete");
    }

    async fn finish(&self, torrent_id: Uuid, action: FreeEndAction, progress: f64) {
        self.cancel_torrent(torrent_id).await;
        let result = match action {
            FreeEndAction::Complete => self.repository.mark_completed(torrent_id, progress).await,
            FreeEndAction::Pause => self.repository.mark_paused(torrent_id, progress, REASON_PAUSED).await,
            FreeEndAction::Delete => self.repository.mark_paused(torrent_id, progress, REASON_AUTO_DELETED).await,
        };
        if let Err(err) = result {
            error!(torrent_id = %torrent_id, ?action, error = %err, "failed to persist free-end action outcome");
        }
    }

    async fn mark_auto_deleted(&self, torrent_id: Uuid, progress: f64) {
        self.finish(torrent_id, FreeEndAction::Delete, progress).await;
    }

    async fn mark_paused_for_free_end(&self, torrent_id: Uuid, progress: f64) {
        self.finish(torrent_id, FreeEndAction::Pause, progress).await;
    }

    async fn retry_later(&self, torrent_id: Uuid, retry_count: i32, last_error: &str) {
        if retry_count + 1 > MAX_RETRY_COUNT {
            warn!(torrent_id = %torrent_id, retry_count, "free-end handling exhausted retries, pausing as a safe fallback");
            self.finish(torrent_id, FreeEndAction::Pause, 0.0).await;
            return;
        }

        let delay = retry_delay_secs(retry_count);
        let next_attempt_at = Utc::now() + ChronoDuration::seconds(delay);
        if let Err(err) = self.repository.mark_retry(torrent_id, last_error, next_attempt_at).await {
            error!(torrent_id = %torrent_id, error = %err, "failed to persist free-end retry");
            return;
        }
        warn!(torrent_id = %torrent_id, retry_count = retry_count + 1, delay_secs = delay, last_error, "free-end handling failed, retrying");

        // `mark_retry` already released the claim and pushed `free_leech_until`
        // out to `next_attempt_at`; the next `scan_expired_free` pass (or a
        // fresh `schedule_torrent` call once the owning monitor is back in
        // scope) picks it up from there.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDurationAlias;
    use seedkeeper_data::{CleanupScope, ConditionMode, DownloaderConfig, GlobalSettings, SiteSettings};
    use seedkeeper_downloader_api::{TorrentLifecycle, TorrentSnapshot};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryRepository {
        records: StdMutex<StdHashMap<Uuid, TorrentRecord>>,
    }

    impl InMemoryRepository {
        fn seed(&self, records: impl IntoIterator<Item = TorrentRecord>) {
            let mut guard = self.records.lock().unwrap();
            for record in records {
                guard.insert(record.id, record);
            }
        }
    }

    #[async_trait::async_trait]
    impl TorrentRepository for InMemoryRepository {
        async fn upsert(&self, record: &TorrentRecord) -> seedkeeper_data::DataResult<()> {
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(())
        }
        async fn load_all(&self) -> seedkeeper_data::DataResult<Vec<TorrentRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }
        async fn load_active(&self) -> seedkeeper_data::DataResult<Vec<TorrentRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|record| !record.paused && !record.completed)
                .cloned()
                .collect())
        }
        async fn load(&self, id: Uuid) -> seedkeeper_data::DataResult<Option<TorrentRecord>> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }
        async fn claim_for_free_end(&self, id: Uuid) -> seedkeeper_data::DataResult<bool> {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.get_mut(&id) {
                if !record.paused && !record.completed && record.claimed_at.is_none() {
                    record.claimed_at = Some(Utc::now());
                    return Ok(true);
                }
            }
            Ok(false)
        }
        async fn release_claim(&self, id: Uuid) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.claimed_at = None;
            }
            Ok(())
        }
        async fn update_progress(&self, id: Uuid, progress: f64) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.progress = progress;
            }
            Ok(())
        }
        async fn mark_retry(&self, id: Uuid, last_error: &str, next_attempt_at: chrono::DateTime<Utc>) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.claimed_at = None;
                record.retry_count += 1;
                record.last_error = Some(last_error.to_string());
                record.free_leech_until = Some(next_attempt_at);
            }
            Ok(())
        }
        async fn mark_paused(&self, id: Uuid, progress: f64, reason: &str) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.paused = true;
                record.progress = progress;
                record.pause_reason = Some(reason.to_string());
                record.paused_at = Some(Utc::now());
                record.claimed_at = None;
            }
            Ok(())
        }
        async fn mark_completed(&self, id: Uuid, progress: f64) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.completed = true;
                record.progress = progress;
                record.completed_at = Some(Utc::now());
                record.claimed_at = None;
            }
            Ok(())
        }
        async fn mark_removed_from_downloader(&self, id: Uuid) -> seedkeeper_data::DataResult<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.completed = true;
                record.completed_at = Some(Utc::now());
                record.last_error = Some(REASON_REMOVED_FROM_DOWNLOADER.to_string());
                record.claimed_at = None;
            }
            Ok(())
        }
        async fn archive_and_remove(
            &self,
            id: Uuid,
            _reason: ArchiveReason,
        ) -> seedkeeper_data::DataResult<()> {
            self.records.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    struct FixedSettings {
        global: GlobalSettings,
        sites: Vec<SiteSettings>,
    }

    #[async_trait::async_trait]
    impl SettingsStore for FixedSettings {
        async fn load_global(&self) -> seedkeeper_data::DataResult<GlobalSettings> {
            Ok(self.global.clone())
        }
        async fn load_downloaders(&self) -> seedkeeper_data::DataResult<Vec<DownloaderConfig>> {
            Ok(Vec::new())
        }
        async fn load_sites(&self) -> seedkeeper_data::DataResult<Vec<SiteSettings>> {
            Ok(self.sites.clone())
        }
    }

    fn sample_record(site: &str) -> TorrentRecord {
        let now = Utc::now();
        TorrentRecord {
            id: Uuid::new_v4(),
            info_hash: "hash".to_string(),
            name: "demo".to_string(),
            downloader: "primary".to_string(),
            site: site.to_string(),
            added_at: now - ChronoDurationAlias::hours(1),
            free_leech_until: Some(now - ChronoDurationAlias::seconds(1)),
            paused: false,
            completed: false,
            last_activity_at: now,
            bytes_downloaded: 1_000,
            bytes_uploaded: 500,
            size_bytes: 1_000,
            progress: 0.5,
            claimed_at: None,
            retry_count: 0,
            last_error: None,
            pause_reason: None,
            paused_at: None,
            completed_at: None,
            is_pushed: true,
            pause_on_free_end: true,
            has_hr: false,
            hr_seed_time_hours: None,
            tags: Vec::new(),
        }
    }

    fn snapshot(id: Uuid, progress: f64) -> TorrentSnapshot {
        TorrentSnapshot {
            id,
            name: "demo".to_string(),
            state: TorrentLifecycle::Seeding,
            bytes_downloaded: 1_000,
            bytes_uploaded: 500,
            size_bytes: 1_000,
            ratio: 0.5,
            progress,
            eta_seconds: None,
            files: None,
            observed_at: Utc::now(),
        }
    }

    fn monitor_with(
        repo: Arc<InMemoryRepository>,
        settings: Arc<FixedSettings>,
        downloader: Arc<crate::testing::FakeDownloader>,
    ) -> Arc<FreeEndMonitor> {
        let configs = vec![DownloaderConfig {
            name: "primary".to_string(),
            kind: "fake".to_string(),
            endpoint: "inline".to_string(),
            enabled: true,
        }];
        let registry = Arc::new(DownloaderRegistry::new(&configs, {
            let downloader = Arc::clone(&downloader);
            move |_| downloader.clone() as Arc<dyn seedkeeper_downloader_api::Downloader>
        }));
        let events = EventBus::default();
        FreeEndMonitor::new(repo, settings, registry, events)
    }

    fn default_global() -> GlobalSettings {
        GlobalSettings {
            cleanup_scope: CleanupScope::Database,
            condition_mode: ConditionMode::Or,
            ..GlobalSettings::default()
        }
    }

    #[tokio::test]
    async fn torrent_already_finished_is_completed_and_not_paused() {
        let record = sample_record("open-site");
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);

        let settings = Arc::new(FixedSettings {
            global: default_global(),
            sites: vec![SiteSettings {
                site: "open-site".to_string(),
                downloader: "primary".to_string(),
                hr_enforced: false,
                hr_seed_time_hours: 48,
            }],
        });

        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        downloader.set_status(id, snapshot(id, 1.0));
        let monitor = monitor_with(Arc::clone(&repo), settings, downloader);

        monitor.handle_free_ended_torrent(id).await;

        let record = repo.load(id).await.unwrap().unwrap();
        assert!(record.completed);
        assert!(!record.paused, "a completed torrent must never also be marked paused");
    }

    #[tokio::test]
    async fn unfinished_torrent_is_deleted_when_auto_delete_is_enabled() {
        let record = sample_record("open-site");
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);

        let settings = Arc::new(FixedSettings {
            global: GlobalSettings { auto_delete_on_free_end: true, ..default_global() },
            sites: vec![SiteSettings {
                site: "open-site".to_string(),
                downloader: "primary".to_string(),
                hr_enforced: false,
                hr_seed_time_hours: 48,
            }],
        });

        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        downloader.set_status(id, snapshot(id, 0.4));
        let monitor = monitor_with(Arc::clone(&repo), settings, downloader.clone());

        monitor.handle_free_ended_torrent(id).await;

        let record = repo.load(id).await.unwrap().unwrap();
        assert!(record.paused);
        assert_eq!(record.pause_reason.as_deref(), Some(REASON_AUTO_DELETED));
        assert_eq!(downloader.removed_calls(), vec![(id, true)]);
    }

    #[tokio::test]
    async fn unfinished_torrent_is_paused_when_auto_delete_is_disabled() {
        let record = sample_record("open-site");
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);

        let settings = Arc::new(FixedSettings {
            global: GlobalSettings { auto_delete_on_free_end: false, ..default_global() },
            sites: vec![SiteSettings {
                site: "open-site".to_string(),
                downloader: "primary".to_string(),
                hr_enforced: false,
                hr_seed_time_hours: 48,
            }],
        });

        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        downloader.set_status(id, snapshot(id, 0.4));
        let monitor = monitor_with(Arc::clone(&repo), settings, downloader.clone());

        monitor.handle_free_ended_torrent(id).await;

        let record = repo.load(id).await.unwrap().unwrap();
        assert!(record.paused);
        assert_eq!(record.pause_reason.as_deref(), Some(REASON_PAUSED));
        assert_eq!(downloader.paused_calls(), vec![id]);
    }

    #[tokio::test]
    async fn torrent_missing_from_downloader_is_marked_completed() {
        let record = sample_record("open-site");
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);

        let settings = Arc::new(FixedSettings {
            global: default_global(),
            sites: vec![SiteSettings {
                site: "open-site".to_string(),
                downloader: "primary".to_string(),
                hr_enforced: false,
                hr_seed_time_hours: 48,
            }],
        });

        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        downloader.set_not_found(id);
        let monitor = monitor_with(Arc::clone(&repo), settings, downloader);

        monitor.handle_free_ended_torrent(id).await;

        let record = repo.load(id).await.unwrap().unwrap();
        assert!(record.completed);
        assert!(!record.paused);
        assert_eq!(record.last_error.as_deref(), Some(REASON_REMOVED_FROM_DOWNLOADER));
    }

    #[tokio::test]
    async fn second_concurrent_claim_is_a_no_op() {
        let record = sample_record("open-site");
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);

        assert!(repo.claim_for_free_end(id).await.unwrap());
        assert!(!repo.claim_for_free_end(id).await.unwrap());
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        assert_eq!(retry_delay_secs(0), 60);
        assert_eq!(retry_delay_secs(1), 120);
        assert_eq!(retry_delay_secs(2), 240);
        assert_eq!(retry_delay_secs(10), MAX_RETRY_DELAY_SECS);
    }
}
