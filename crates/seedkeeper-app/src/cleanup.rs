//! Periodic and emergency torrent removal driven by retention, ratio, and
//! disk-space pressure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use seedkeeper_data::{ArchiveReason, CleanupScope, ConditionMode, GlobalSettings, SettingsStore, SiteSettings, TorrentRecord, TorrentRepository};
use seedkeeper_events::{Event, EventBus};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::registry::DownloaderRegistry;

const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;
const MIN_EMERGENCY_BUFFER_BYTES: i64 = 10 * BYTES_PER_GB;
const DEFAULT_SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Whether a pass is the normal periodic sweep or an emergency, disk-pressure
/// driven one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyMode {
    /// Normal periodic sweep: only `shouldDelete`-qualifying, unprotected candidates.
    Off,
    /// Disk space is critically low: rank every non-hard-protected torrent by
    /// salvage value and delete until the target free-space buffer is met.
    On {
        /// Bytes currently free on the monitored volume.
        available_bytes: u64,
        /// Configured low-disk-space threshold that triggered this pass.
        threshold_bytes: u64,
    },
}

/// Outcome of a single [`CleanupMonitor::run_manual`] pass.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Number of candidates considered before protection/ranking.
    pub evaluated: usize,
    /// Torrents actually removed, paired with the rule that qualified them.
    pub removed: Vec<(Uuid, ArchiveReason)>,
    /// Total bytes reclaimed by this pass.
    pub freed_bytes: i64,
}

/// Applies the scope/protect/`shouldDelete`/rank/delete pipeline on a
/// schedule or on disk-space pressure.
pub struct CleanupMonitor {
    repository: Arc<dyn TorrentRepository>,
    settings: Arc<dyn SettingsStore>,
    registry: Arc<DownloaderRegistry>,
    events: EventBus,
}

impl CleanupMonitor {
    /// Build a monitor over the given dependencies. Call [`Self::start`] to
    /// begin scanning.
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
        })
    }

    /// Start the periodic sweep (interval taken from `GlobalSettings`,
    /// re-read every cycle) plus the `DiskSpaceLow` emergency trigger.
    pub fn start(self: &Arc<Self>) {
        let periodic = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(DEFAULT_SCAN_INTERVAL).await;
                let Ok(global) = periodic.settings.load_global().await else {
                    continue;
                };
                if !global.cleanup_enabled {
                    continue;
                }
                let report = periodic.run_manual(EmergencyMode::Off).await;
                info!(
                    evaluated = report.evaluated,
                    removed = report.removed.len(),
                    freed_bytes = report.freed_bytes,
                    "periodic cleanup sweep completed"
                );
            }
        });

        let emergency = Arc::clone(self);
        tokio::spawn(async move {
            let mut subscription = emergency.events.subscribe();
            while let Some(envelope) = subscription.next().await {
                if let Event::DiskSpaceLow { available_bytes, threshold_bytes } = envelope.event {
                    warn!(available_bytes, threshold_bytes, "disk space low, triggering emergency cleanup");
                    let report = emergency
                        .run_manual(EmergencyMode::On { available_bytes, threshold_bytes })
                        .await;
                    info!(
                        evaluated = report.evaluated,
                        removed = report.removed.len(),
                        freed_bytes = report.freed_bytes,
                        "emergency cleanup sweep completed"
                    );
                }
            }
        });
    }

    /// Run the scope/protect/`shouldDelete`/rank/delete pipeline once and
    /// return a report.
    pub async fn run_manual(&self, mode: EmergencyMode) -> CleanupReport {
        let Ok(records) = self.repository.load_active().await else {
            error!("failed to load active torrents for cleanup scan");
            return CleanupReport::default();
        };
        let Ok(global) = self.settings.load_global().await else {
            error!("failed to load global settings for cleanup scan");
            return CleanupReport::default();
        };
        let Ok(sites) = self.settings.load_sites().await else {
            error!("failed to load site settings for cleanup scan");
            return CleanupReport::default();
        };

        let now = Utc::now();
        let scoped: Vec<TorrentRecord> = records.into_iter().filter(|record| in_scope(record, &global)).collect();

        let (protected, candidates): (Vec<TorrentRecord>, Vec<TorrentRecord>) = scoped
            .into_iter()
            .partition(|record| is_protected(record, &sites, &global, now, matches!(mode, EmergencyMode::On { .. })));

        match mode {
            EmergencyMode::Off => {
                let mut qualifying: Vec<(TorrentRecord, ArchiveReason)> = candidates
                    .into_iter()
                    .filter_map(|record| should_delete(&record, &global, now).map(|reason| (record, reason)))
                    .collect();
                qualifying.sort_by_key(|(record, _)| record.added_at);

                let evaluated = qualifying.len();
                let mut report = CleanupReport { evaluated, removed: Vec::new(), freed_bytes: 0 };
                for (record, reason) in qualifying {
                    self.remove_one(&sites, record, reason, &mut report).await;
                }
                report
            }
            EmergencyMode::On { available_bytes, threshold_bytes } => {
                let mut all: Vec<TorrentRecord> = candidates;
                all.extend(protected);
                self.run_emergency(all, &sites, available_bytes, threshold_bytes).await
            }
        }
    }

    async fn run_emergency(
        &self,
        mut pool: Vec<TorrentRecord>,
        sites: &[SiteSettings],
        available_bytes: u64,
        threshold_bytes: u64,
    ) -> CleanupReport {
        let buffer = (threshold_bytes as i64 / 5).max(MIN_EMERGENCY_BUFFER_BYTES);
        let target_bytes = threshold_bytes as i64 + buffer;
        let needed_bytes = (target_bytes - available_bytes as i64).max(0);

        let now = Utc::now();
        pool.sort_by(|a, b| {
            emergency_score(b, now)
                .partial_cmp(&emergency_score(a, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let evaluated = pool.len();
        let mut report = CleanupReport { evaluated, removed: Vec::new(), freed_bytes: 0 };
        for record in pool {
            if report.freed_bytes >= needed_bytes {
                break;
            }
            self.remove_one(sites, record, ArchiveReason::DiskSpaceLow, &mut report).await;
        }
        report
    }

    async fn remove_one(&self, sites: &[SiteSettings], record: TorrentRecord, reason: ArchiveReason, report: &mut CleanupReport) {
        if let Ok(downloader) = self.registry.route(sites, &record.site).await {
            if let Err(err) = downloader.remove_torrent(record.id, true).await {
                warn!(torrent_id = %record.id, error = %err, "failed to remove torrent from downloader during cleanup");
            }
        }

        match self.repository.archive_and_remove(record.id, reason).await {
            Ok(()) => {
                report.freed_bytes += record.size_bytes;
                report.removed.push((record.id, reason));
            }
            Err(err) => {
                error!(torrent_id = %record.id, error = %err, "failed to archive torrent during cleanup");
            }
        }
    }
}

fn in_scope(record: &TorrentRecord, global: &GlobalSettings) -> bool {
    match global.cleanup_scope {
        CleanupScope::All | CleanupScope::Database => true,
        CleanupScope::Tag => record.tags.iter().any(|tag| global.cleanup_scope_tags.contains(tag)),
    }
}

/// `shouldDelete`'s four predicates, combined via `condition_mode`, with
/// `del_free_expired` acting as an unconditional override.
fn should_delete(record: &TorrentRecord, global: &GlobalSettings, now: DateTime<Utc>) -> Option<ArchiveReason> {
    if global.del_free_expired {
        if let Some(expiry) = record.free_leech_until {
            if expiry <= now {
                return Some(ArchiveReason::FreeLeechExpired);
            }
        }
    }

    let seed_time_match = record.seed_hours(now) >= global.max_seed_time_hours as f64;
    let ratio_match = record.ratio() >= global.min_ratio;
    let inactive_match = record.idle_hours(now) >= global.max_idle_hours as f64;
    let slow_seed_match =
        record.seed_hours(now) > global.slow_seed_time_hours as f64 && record.ratio() <= global.slow_max_ratio;

    let matched = match global.condition_mode {
        ConditionMode::Or => seed_time_match || ratio_match || inactive_match || slow_seed_match,
        ConditionMode::And => seed_time_match && ratio_match && inactive_match && slow_seed_match,
    };

    if !matched {
        return None;
    }

    if seed_time_match {
        Some(ArchiveReason::SeedTimeExceeded)
    } else if ratio_match {
        Some(ArchiveReason::RatioMet)
    } else if slow_seed_match {
        Some(ArchiveReason::SlowSeed)
    } else {
        Some(ArchiveReason::Idle)
    }
}

/// `protectDL`, `minRetainHours`, hit-and-run, and `protectTags` precedence,
/// in that order. `disk_protect` lifts hit-and-run and retention protection
/// (never `protectDL`/`protectTags`) for an emergency pass.
fn is_protected(
    record: &TorrentRecord,
    sites: &[SiteSettings],
    global: &GlobalSettings,
    now: DateTime<Utc>,
    emergency: bool,
) -> bool {
    if global.protect_dl && record.progress < 1.0 {
        return true;
    }
    if record.tags.iter().any(|tag| global.protect_tags.contains(tag)) {
        return true;
    }

    let disk_override = emergency && global.disk_protect;
    if disk_override {
        return false;
    }

    if record.seed_hours(now) < global.min_retain_hours as f64 {
        return true;
    }

    if record.has_hr {
        let site_default = sites
            .iter()
            .find(|site| site.site == record.site)
            .map_or(global.min_seed_hours, |site| site.hr_seed_time_hours);
        let required_hours = record.hr_seed_time_hours(site_default);
        if record.seed_hours(now) < required_hours as f64 {
            return true;
        }
    }

    false
}

fn emergency_score(record: &TorrentRecord, now: DateTime<Utc>) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "byte counters are far below f64's exact-integer range in practice"
    )]
    let size_gb = record.size_bytes as f64 / 1_000_000_000.0;
    let paused_term = if record.paused { 50.0 } else { 0.0 };
    let upload_idle_term = if record.idle_hours(now) > 0.0 { 20.0 } else { 0.0 };
    paused_term + 0.5 * record.seed_hours(now) + 10.0 * record.ratio() + upload_idle_term + 2.0 * size_gb
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use seedkeeper_data::DownloaderConfig;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryRepository {
        records: StdMutex<HashMap<Uuid, TorrentRecord>>,
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
        async fn mark_retry(&self, id: Uuid, last_error: &str, next_attempt_at: DateTime<Utc>) -> seedkeeper_data::DataResult<()> {
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
                record.claimed_at = None;
            }
            Ok(())
        }
        async fn archive_and_remove(&self, id: Uuid, _reason: ArchiveReason) -> seedkeeper_data::DataResult<()> {
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

    fn monitor(
        repo: Arc<InMemoryRepository>,
        settings: Arc<FixedSettings>,
        downloader: Arc<crate::testing::FakeDownloader>,
    ) -> Arc<CleanupMonitor> {
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
        CleanupMonitor::new(repo, settings, registry, EventBus::default())
    }

    fn aged_record(site: &str, seed_days: i64, ratio: f64, idle_hours: i64) -> TorrentRecord {
        let now = Utc::now();
        TorrentRecord {
            id: Uuid::new_v4(),
            info_hash: "hash".to_string(),
            name: "demo".to_string(),
            downloader: "primary".to_string(),
            site: site.to_string(),
            added_at: now - ChronoDuration::days(seed_days),
            free_leech_until: None,
            paused: false,
            completed: false,
            last_activity_at: now - ChronoDuration::hours(idle_hours),
            bytes_downloaded: 1_000,
            bytes_uploaded: (ratio * 1_000.0) as i64,
            size_bytes: 1_000_000_000,
            progress: 1.0,
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

    #[tokio::test]
    async fn no_candidates_returns_empty_report_without_error() {
        let repo = Arc::new(InMemoryRepository::default());
        let settings = Arc::new(FixedSettings {
            global: GlobalSettings::default(),
            sites: Vec::new(),
        });
        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        let monitor = monitor(repo, settings, downloader);

        let report = monitor.run_manual(EmergencyMode::Off).await;
        assert_eq!(report.evaluated, 0);
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn seed_time_exceeded_qualifies_under_or_mode() {
        let record = aged_record("open-site", 20, 0.1, 1);
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);
        let settings = Arc::new(FixedSettings {
            global: GlobalSettings { max_seed_time_hours: 240, min_ratio: 999.0, max_idle_hours: 9999, ..GlobalSettings::default() },
            sites: vec![SiteSettings { site: "open-site".to_string(), downloader: "primary".to_string(), hr_enforced: false, hr_seed_time_hours: 48 }],
        });
        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        let monitor = monitor(repo, settings, downloader);

        let report = monitor.run_manual(EmergencyMode::Off).await;
        assert_eq!(report.removed, vec![(id, ArchiveReason::SeedTimeExceeded)]);
    }

    #[tokio::test]
    async fn hit_and_run_candidate_survives_normal_sweep_but_not_emergency() {
        let mut record = aged_record("private-site", 20, 0.1, 1);
        record.has_hr = true;
        let id = record.id;
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);
        let settings = Arc::new(FixedSettings {
            global: GlobalSettings { max_seed_time_hours: 240, min_seed_hours: 720, disk_protect: true, ..GlobalSettings::default() },
            sites: vec![SiteSettings { site: "private-site".to_string(), downloader: "primary".to_string(), hr_enforced: true, hr_seed_time_hours: 720 }],
        });
        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        let monitor = monitor(Arc::clone(&repo), settings, downloader);

        let normal = monitor.run_manual(EmergencyMode::Off).await;
        assert!(normal.removed.is_empty());

        let emergency = monitor
            .run_manual(EmergencyMode::On { available_bytes: 0, threshold_bytes: 50 * BYTES_PER_GB as u64 })
            .await;
        assert_eq!(emergency.removed.len(), 1);
        assert_eq!(emergency.removed[0].0, id);
    }

    #[tokio::test]
    async fn protect_tags_survive_even_an_emergency_pass() {
        let mut record = aged_record("open-site", 400, 5.0, 400);
        record.tags = vec!["keep".to_string()];
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed([record]);
        let settings = Arc::new(FixedSettings {
            global: GlobalSettings { protect_tags: vec!["keep".to_string()], disk_protect: true, ..GlobalSettings::default() },
            sites: vec![SiteSettings { site: "open-site".to_string(), downloader: "primary".to_string(), hr_enforced: false, hr_seed_time_hours: 48 }],
        });
        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        let monitor = monitor(repo, settings, downloader);

        let emergency = monitor
            .run_manual(EmergencyMode::On { available_bytes: 0, threshold_bytes: 50 * BYTES_PER_GB as u64 })
            .await;
        assert!(emergency.removed.is_empty());
    }

    #[tokio::test]
    async fn emergency_mode_stops_once_target_buffer_is_met() {
        let records: Vec<TorrentRecord> = (0..20).map(|i| aged_record("open-site", 400, 0.1, i)).collect();
        let repo = Arc::new(InMemoryRepository::default());
        repo.seed(records);
        let settings = Arc::new(FixedSettings {
            global: GlobalSettings::default(),
            sites: vec![SiteSettings { site: "open-site".to_string(), downloader: "primary".to_string(), hr_enforced: false, hr_seed_time_hours: 48 }],
        });
        let downloader = Arc::new(crate::testing::FakeDownloader::default());
        downloader.set_healthy(true);
        let monitor = monitor(repo, settings, downloader);

        let threshold_bytes = 20 * BYTES_PER_GB as u64;
        let available_bytes = 5 * BYTES_PER_GB as u64;
        let report = monitor.run_manual(EmergencyMode::On { available_bytes, threshold_bytes }).await;

        let needed = threshold_bytes as i64 + MIN_EMERGENCY_BUFFER_BYTES - available_bytes as i64;
        assert!(report.freed_bytes >= needed);
        assert!(report.removed.len() < 20);
    }

    #[test]
    fn scope_tag_filters_out_untagged_records() {
        let mut global = GlobalSettings { cleanup_scope: CleanupScope::Tag, ..GlobalSettings::default() };
        global.cleanup_scope_tags = vec!["drop".to_string()];
        let tagged = TorrentRecord { tags: vec!["drop".to_string()], ..aged_record("site", 1, 0.0, 1) };
        let untagged = aged_record("site", 1, 0.0, 1);
        assert!(in_scope(&tagged, &global));
        assert!(!in_scope(&untagged, &global));
    }
}
