//! Domain model shared by the persistence layer and orchestration crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A torrent currently tracked by the scheduling core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TorrentRecord {
    /// Primary key.
    pub id: Uuid,
    /// Torrent info hash, used to correlate with the downloader client.
    pub info_hash: String,
    /// Display name.
    pub name: String,
    /// Name of the downloader this torrent was added through.
    pub downloader: String,
    /// Name of the tracker site this torrent came from.
    pub site: String,
    /// When this torrent was first registered.
    pub added_at: DateTime<Utc>,
    /// When the torrent's free-leech grant expires, if any.
    pub free_leech_until: Option<DateTime<Utc>>,
    /// Whether lifecycle control has paused this torrent.
    pub paused: bool,
    /// Whether lifecycle control has marked this torrent completed.
    pub completed: bool,
    /// Timestamp of the last observed transfer activity.
    pub last_activity_at: DateTime<Utc>,
    /// Bytes downloaded as of the last observation.
    pub bytes_downloaded: i64,
    /// Bytes uploaded as of the last observation.
    pub bytes_uploaded: i64,
    /// Total payload size in bytes.
    pub size_bytes: i64,
    /// Fractional completion in `[0.0, 1.0]`, independent of `ratio`.
    pub progress: f64,
    /// Set by `claim_for_free_end` while a decision is in flight; distinct
    /// from `paused` so a claim can resolve to `Complete` without leaving the
    /// record permanently paused.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Number of consecutive free-end handling failures for this torrent.
    pub retry_count: i32,
    /// Most recent error encountered while handling this torrent, if any.
    pub last_error: Option<String>,
    /// Human-readable reason the torrent was paused, if it is paused.
    pub pause_reason: Option<String>,
    /// When this torrent was paused, if it is paused.
    pub paused_at: Option<DateTime<Utc>>,
    /// When this torrent was marked completed, if it is completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether this torrent has been pushed to its downloader.
    pub is_pushed: bool,
    /// Whether this torrent should be paused (rather than left running) once
    /// its free-leech window ends.
    pub pause_on_free_end: bool,
    /// Per-torrent hit-and-run override; when `true`, `hr_seed_time_hours`
    /// (falling back to the site's) governs cleanup protection.
    pub has_hr: bool,
    /// Per-torrent hit-and-run seed-time requirement override, in hours.
    pub hr_seed_time_hours: Option<i64>,
    /// Freeform labels used by cleanup scoping and protection rules.
    pub tags: Vec<String>,
}

impl TorrentRecord {
    /// Share ratio (uploaded/downloaded), `0.0` when nothing has downloaded yet.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.bytes_downloaded <= 0 {
            0.0
        } else {
            #[expect(
                clippy::cast_precision_loss,
                reason = "byte counters are far below f64's exact-integer range in practice"
            )]
            {
                self.bytes_uploaded as f64 / self.bytes_downloaded as f64
            }
        }
    }

    /// Hours elapsed since the last observed transfer activity.
    #[must_use]
    pub fn idle_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_activity_at).num_minutes().max(0) as f64 / 60.0
    }

    /// Hours elapsed since this torrent was added, used as a proxy for seed time.
    #[must_use]
    pub fn seed_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.added_at).num_minutes().max(0) as f64 / 60.0
    }

    /// Hours a torrent must seed before hit-and-run protection lifts: the
    /// per-torrent override if set, otherwise `site_default_hours`.
    #[must_use]
    pub fn hr_seed_time_hours(&self, site_default_hours: i64) -> i64 {
        self.hr_seed_time_hours.unwrap_or(site_default_hours)
    }
}

/// Reason a torrent was removed and archived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ArchiveReason {
    /// Removed because its free-leech window expired without meeting the
    /// progress or hit-and-run requirements to stay registered.
    FreeLeechExpired,
    /// Removed because it exceeded the configured maximum seed time.
    SeedTimeExceeded,
    /// Removed because it met the configured minimum ratio.
    RatioMet,
    /// Removed because it had been idle past the configured threshold.
    Idle,
    /// Removed because it stayed below the slow-seed ratio past the
    /// configured slow-seed time.
    SlowSeed,
    /// Removed as part of emergency cleanup triggered by low disk space.
    DiskSpaceLow,
    /// Removed by explicit operator action.
    Manual,
}

/// Append-only record of a torrent that was archived and removed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TorrentArchive {
    /// Primary key.
    pub id: Uuid,
    /// Identifier of the torrent that was archived.
    pub torrent_id: Uuid,
    /// Reason the torrent was removed.
    pub reason: ArchiveReason,
    /// When the torrent was archived.
    pub archived_at: DateTime<Utc>,
    /// Share ratio at the time of archival.
    pub final_ratio: f64,
}

/// Which torrents a cleanup pass considers before protection rules apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CleanupScope {
    /// Every torrent known to a healthy downloader.
    All,
    /// Only torrents carrying one of `cleanup_scope_tags`.
    Tag,
    /// Only torrents this database already tracks (the managed set).
    Database,
}

/// How `shouldDelete`'s four predicates combine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ConditionMode {
    /// A torrent is a candidate once any predicate matches.
    Or,
    /// A torrent is a candidate only once every predicate matches.
    And,
}

/// Process-wide settings governing lifecycle control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    /// Monotonic revision number, incremented on every update.
    pub revision: i64,
    /// Minimum ratio a torrent must reach to be considered satisfied.
    pub min_ratio: f64,
    /// Torrents idle longer than this many hours are cleanup candidates.
    pub max_idle_hours: i64,
    /// Minimum hours a torrent must seed before hit-and-run protection no
    /// longer applies, used as the site-level fallback for `hr_seed_time_hours`.
    pub min_seed_hours: i64,
    /// Torrents seeding longer than this many hours are cleanup candidates.
    pub max_seed_time_hours: i64,
    /// Hours a torrent may stay at or below `slow_max_ratio` before becoming
    /// a slow-seed cleanup candidate.
    pub slow_seed_time_hours: i64,
    /// Ratio ceiling below which a long-seeding torrent counts as a slow seed.
    pub slow_max_ratio: f64,
    /// Minutes before free-leech expiry that torrents are eligible for
    /// early free-end handling.
    pub free_end_grace_minutes: i64,
    /// When `true`, a torrent whose free-leech window ends before it
    /// finishes downloading is deleted; when `false`, it is paused instead.
    pub auto_delete_on_free_end: bool,
    /// Whether the periodic cleanup pass runs at all.
    pub cleanup_enabled: bool,
    /// Which torrents a cleanup pass considers.
    pub cleanup_scope: CleanupScope,
    /// Tags selecting candidates when `cleanup_scope` is `Tag`.
    pub cleanup_scope_tags: Vec<String>,
    /// Whether still-downloading torrents are protected from cleanup.
    pub protect_dl: bool,
    /// Torrents younger than this many hours are protected from cleanup.
    pub min_retain_hours: i64,
    /// Tags that protect a torrent from cleanup regardless of its age or ratio.
    pub protect_tags: Vec<String>,
    /// When `true`, a torrent past its free-leech window is deleted
    /// regardless of the other `shouldDelete` predicates.
    pub del_free_expired: bool,
    /// How the four `shouldDelete` predicates combine.
    pub condition_mode: ConditionMode,
    /// Free disk space, in gigabytes, below which emergency cleanup triggers.
    pub min_disk_space_gb: i64,
    /// Whether disk-space pressure can override hit-and-run protection.
    pub disk_protect: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            revision: 0,
            min_ratio: 1.0,
            max_idle_hours: 72,
            min_seed_hours: 48,
            max_seed_time_hours: 240,
            slow_seed_time_hours: 24,
            slow_max_ratio: 0.1,
            free_end_grace_minutes: 15,
            auto_delete_on_free_end: false,
            cleanup_enabled: true,
            cleanup_scope: CleanupScope::Database,
            cleanup_scope_tags: Vec::new(),
            protect_dl: true,
            min_retain_hours: 24,
            protect_tags: Vec::new(),
            del_free_expired: false,
            condition_mode: ConditionMode::Or,
            min_disk_space_gb: 20,
            disk_protect: true,
        }
    }
}

/// Configuration for a named downloader client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DownloaderConfig {
    /// Unique name used to key the downloader registry.
    pub name: String,
    /// Downloader client kind (e.g. `"qbittorrent"`, `"transmission"`).
    pub kind: String,
    /// Endpoint the client connects to.
    pub endpoint: String,
    /// Whether this downloader is currently enabled.
    pub enabled: bool,
}

/// Per-site settings governing routing and hit-and-run protection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SiteSettings {
    /// Tracker site name.
    pub site: String,
    /// Downloader name torrents from this site are routed to.
    pub downloader: String,
    /// Whether this site enforces hit-and-run protection.
    pub hr_enforced: bool,
    /// Site-level hit-and-run seed-time requirement, in hours; used when a
    /// torrent carries no per-torrent override.
    pub hr_seed_time_hours: i64,
}

/// Key identifying a running per-feed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Name of the feed this job services.
    pub feed: String,
}

impl JobKey {
    /// Construct a key for `feed`.
    #[must_use]
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }
}

/// Kind of work a pending task represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingTaskKind {
    /// A torrent's free-leech window is due to expire.
    FreeEndExpiry,
}

/// A scheduled but not-yet-fired unit of work.
///
/// This is a purely in-memory concept derived from `TorrentRecord.free_leech_until`
/// on load; it is not a persisted row (see the design note on store-then-arm
/// ordering).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingTask {
    /// Torrent this task applies to.
    pub torrent_id: Uuid,
    /// When this task should fire.
    pub fires_at: DateTime<Utc>,
    /// What kind of task this is.
    pub kind: PendingTaskKind,
}
