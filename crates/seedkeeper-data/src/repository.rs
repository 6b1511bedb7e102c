//! Data-access trait seams implemented concretely by `seedkeeper-runtime`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ArchiveReason, DownloaderConfig, GlobalSettings, SiteSettings, TorrentRecord};

/// Operations against the `torrent_records`/`torrent_archive` tables.
#[async_trait]
pub trait TorrentRepository: Send + Sync {
    /// Insert or update a torrent record.
    async fn upsert(&self, record: &TorrentRecord) -> Result<()>;

    /// Load every torrent record, regardless of state.
    async fn load_all(&self) -> Result<Vec<TorrentRecord>>;

    /// Load torrent records that are neither paused nor completed.
    async fn load_active(&self) -> Result<Vec<TorrentRecord>>;

    /// Load a single torrent record by id.
    async fn load(&self, id: Uuid) -> Result<Option<TorrentRecord>>;

    /// Atomically claim the right to act on a torrent's free-leech expiry.
    ///
    /// Only touches `claimed_at`, never `paused` or `completed`: the claim is
    /// a mutex over who gets to decide the outcome, not a guess at what that
    /// outcome will be. Returns `true` if this call won the claim (the
    /// torrent was not already paused, completed, or claimed), `false` if
    /// another caller already holds it.
    async fn claim_for_free_end(&self, id: Uuid) -> Result<bool>;

    /// Release a claim without resolving it, typically before retrying.
    async fn release_claim(&self, id: Uuid) -> Result<()>;

    /// Refresh a torrent's observed progress without otherwise touching its
    /// lifecycle state, used by the periodic progress-refresh scans.
    async fn update_progress(&self, id: Uuid, progress: f64) -> Result<()>;

    /// Record a failed free-end handling attempt and reschedule it for
    /// `next_attempt_at`, releasing the claim so the rescheduled attempt can
    /// win it again.
    async fn mark_retry(&self, id: Uuid, last_error: &str, next_attempt_at: DateTime<Utc>) -> Result<()>;

    /// Pause a torrent with a reason, recording its progress at the time of
    /// the decision. Leaves `completed` untouched.
    async fn mark_paused(&self, id: Uuid, progress: f64, reason: &str) -> Result<()>;

    /// Mark a torrent completed, recording its final progress. Never touches
    /// `paused`: a torrent that finished downloading before its free-leech
    /// window closed is complete, not paused.
    async fn mark_completed(&self, id: Uuid, progress: f64) -> Result<()>;

    /// Mark a torrent completed because it was no longer found in its
    /// downloader (treated as already finished and cleaned up externally).
    async fn mark_removed_from_downloader(&self, id: Uuid) -> Result<()>;

    /// Move a torrent into the archive and remove it from `torrent_records`.
    async fn archive_and_remove(&self, id: Uuid, reason: ArchiveReason) -> Result<()>;
}

/// Operations against `global_settings`/`downloader_settings`/`site_settings`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the single global settings row.
    async fn load_global(&self) -> Result<GlobalSettings>;

    /// Load every configured downloader.
    async fn load_downloaders(&self) -> Result<Vec<DownloaderConfig>>;

    /// Load every configured site.
    async fn load_sites(&self) -> Result<Vec<SiteSettings>>;
}
