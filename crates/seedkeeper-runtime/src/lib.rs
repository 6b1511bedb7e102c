#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Postgres-backed implementation of `seedkeeper-data`'s repository traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seedkeeper_data::{
    ArchiveReason, DataError, DataResult, DownloaderConfig, GlobalSettings, SettingsStore,
    SiteSettings, TorrentRecord, TorrentRepository,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `NOTIFY` channel used to announce a new `global_settings` revision.
pub const SETTINGS_CHANGED_CHANNEL: &str = "seedkeeper_settings_changed";

const GLOBAL_SETTINGS_ID: Uuid = Uuid::from_u128(1);

const UPSERT_TORRENT_SQL: &str = r"
    INSERT INTO torrent_records (
        id, info_hash, name, downloader, site, added_at, free_leech_until,
        paused, completed, last_activity_at, bytes_downloaded, bytes_uploaded, size_bytes,
        progress, claimed_at, retry_count, last_error, pause_reason, paused_at, completed_at,
        is_pushed, pause_on_free_end, has_hr, hr_seed_time_hours, tags
    )
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
        $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
    )
    ON CONFLICT (id) DO UPDATE SET
        info_hash = EXCLUDED.info_hash,
        name = EXCLUDED.name,
        downloader = EXCLUDED.downloader,
        site = EXCLUDED.site,
        free_leech_until = EXCLUDED.free_leech_until,
        paused = EXCLUDED.paused,
        completed = EXCLUDED.completed,
        last_activity_at = EXCLUDED.last_activity_at,
        bytes_downloaded = EXCLUDED.bytes_downloaded,
        bytes_uploaded = EXCLUDED.bytes_uploaded,
        size_bytes = EXCLUDED.size_bytes,
        progress = EXCLUDED.progress,
        claimed_at = EXCLUDED.claimed_at,
        retry_count = EXCLUDED.retry_count,
        last_error = EXCLUDED.last_error,
        pause_reason = EXCLUDED.pause_reason,
        paused_at = EXCLUDED.paused_at,
        completed_at = EXCLUDED.completed_at,
        is_pushed = EXCLUDED.is_pushed,
        pause_on_free_end = EXCLUDED.pause_on_free_end,
        has_hr = EXCLUDED.has_hr,
        hr_seed_time_hours = EXCLUDED.hr_seed_time_hours,
        tags = EXCLUDED.tags
";

const SELECT_ALL_SQL: &str = "SELECT * FROM torrent_records";
const SELECT_ACTIVE_SQL: &str =
    "SELECT * FROM torrent_records WHERE paused = FALSE AND completed = FALSE";
const SELECT_ONE_SQL: &str = "SELECT * FROM torrent_records WHERE id = $1";

/// The single source of truth for "did I win the race to act on this
/// torrent's expiry". Only touches `claimed_at`, never `paused`/`completed`,
/// so the eventual `Complete` outcome never gets saddled with `paused = TRUE`
/// as a side effect of merely having been claimed.
const CLAIM_FOR_FREE_END_SQL: &str = r"
    UPDATE torrent_records
    SET claimed_at = NOW()
    WHERE id = $1 AND paused = FALSE AND completed = FALSE AND claimed_at IS NULL
";

const RELEASE_CLAIM_SQL: &str = "UPDATE torrent_records SET claimed_at = NULL WHERE id = $1";

const UPDATE_PROGRESS_SQL: &str = "UPDATE torrent_records SET progress = $2 WHERE id = $1";

const MARK_RETRY_SQL: &str = r"
    UPDATE torrent_records
    SET claimed_at = NULL, retry_count = retry_count + 1, last_error = $2, free_leech_until = $3
    WHERE id = $1
";

const MARK_PAUSED_SQL: &str = r"
    UPDATE torrent_records
    SET paused = TRUE, pause_reason = $2, paused_at = NOW(), progress = $3,
        claimed_at = NULL, last_activity_at = NOW()
    WHERE id = $1
";

const MARK_COMPLETED_SQL: &str = r"
    UPDATE torrent_records
    SET completed = TRUE, completed_at = NOW(), progress = $2,
        claimed_at = NULL, last_activity_at = NOW()
    WHERE id = $1
";

const MARK_REMOVED_FROM_DOWNLOADER_SQL: &str = r"
    UPDATE torrent_records
    SET completed = TRUE, completed_at = NOW(), last_error = $2,
        claimed_at = NULL, last_activity_at = NOW()
    WHERE id = $1
";

const INSERT_ARCHIVE_SQL: &str = r"
    INSERT INTO torrent_archive (id, torrent_id, reason, archived_at, final_ratio)
    VALUES ($1, $2, $3, NOW(), $4)
";
const DELETE_TORRENT_SQL: &str = "DELETE FROM torrent_records WHERE id = $1";

const SELECT_GLOBAL_SETTINGS_SQL: &str = "SELECT * FROM global_settings WHERE id = $1";
const SELECT_DOWNLOADERS_SQL: &str = "SELECT * FROM downloader_settings ORDER BY name";
const SELECT_SITES_SQL: &str = "SELECT * FROM site_settings ORDER BY site";

/// Postgres-backed persistence for torrent records, archive, and settings.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Initialize the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> DataResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensure the single `global_settings` row exists, seeding it with
    /// defaults if this is a fresh database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn ensure_global_settings_seeded(&self) -> DataResult<()> {
        let defaults = GlobalSettings::default();
        sqlx::query(
            r"
            INSERT INTO global_settings (
                id, revision, min_ratio, max_idle_hours, min_seed_hours, max_seed_time_hours,
                slow_seed_time_hours, slow_max_ratio, free_end_grace_minutes,
                auto_delete_on_free_end, cleanup_enabled, cleanup_scope, cleanup_scope_tags,
                protect_dl, min_retain_hours, protect_tags, del_free_expired, condition_mode,
                min_disk_space_gb, disk_protect
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(GLOBAL_SETTINGS_ID)
        .bind(defaults.revision)
        .bind(defaults.min_ratio)
        .bind(defaults.max_idle_hours)
        .bind(defaults.min_seed_hours)
        .bind(defaults.max_seed_time_hours)
        .bind(defaults.slow_seed_time_hours)
        .bind(defaults.slow_max_ratio)
        .bind(defaults.free_end_grace_minutes)
        .bind(defaults.auto_delete_on_free_end)
        .bind(defaults.cleanup_enabled)
        .bind(defaults.cleanup_scope)
        .bind(&defaults.cleanup_scope_tags)
        .bind(defaults.protect_dl)
        .bind(defaults.min_retain_hours)
        .bind(&defaults.protect_tags)
        .bind(defaults.del_free_expired)
        .bind(defaults.condition_mode)
        .bind(defaults.min_disk_space_gb)
        .bind(defaults.disk_protect)
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::QueryFailed {
            operation: "seed global settings",
            source,
        })?;
        Ok(())
    }

    /// Bump the global settings revision and notify listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn bump_settings_revision(&self) -> DataResult<i64> {
        let row = sqlx::query(
            "UPDATE global_settings SET revision = revision + 1 WHERE id = $1 RETURNING revision",
        )
        .bind(GLOBAL_SETTINGS_ID)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| DataError::QueryFailed {
            operation: "bump settings revision",
            source,
        })?;
        let revision: i64 = row.try_get("revision").map_err(|source| DataError::QueryFailed {
            operation: "read bumped revision",
            source,
        })?;

        sqlx::query(sqlx::AssertSqlSafe(format!(
            "NOTIFY {SETTINGS_CHANGED_CHANNEL}, '{revision}'"
        )))
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "notify settings change",
                source,
            })?;

        Ok(revision)
    }
}

#[async_trait]
impl TorrentRepository for PgStore {
    async fn upsert(&self, record: &TorrentRecord) -> DataResult<()> {
        sqlx::query(UPSERT_TORRENT_SQL)
            .bind(record.id)
            .bind(&record.info_hash)
            .bind(&record.name)
            .bind(&record.downloader)
            .bind(&record.site)
            .bind(record.added_at)
            .bind(record.free_leech_until)
            .bind(record.paused)
            .bind(record.completed)
            .bind(record.last_activity_at)
            .bind(record.bytes_downloaded)
            .bind(record.bytes_uploaded)
            .bind(record.size_bytes)
            .bind(record.progress)
            .bind(record.claimed_at)
            .bind(record.retry_count)
            .bind(&record.last_error)
            .bind(&record.pause_reason)
            .bind(record.paused_at)
            .bind(record.completed_at)
            .bind(record.is_pushed)
            .bind(record.pause_on_free_end)
            .bind(record.has_hr)
            .bind(record.hr_seed_time_hours)
            .bind(&record.tags)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "upsert torrent record",
                source,
            })?;
        Ok(())
    }

    async fn load_all(&self) -> DataResult<Vec<TorrentRecord>> {
        sqlx::query_as::<_, TorrentRecord>(SELECT_ALL_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load all torrent records",
                source,
            })
    }

    async fn load_active(&self) -> DataResult<Vec<TorrentRecord>> {
        sqlx::query_as::<_, TorrentRecord>(SELECT_ACTIVE_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load active torrent records",
                source,
            })
    }

    async fn load(&self, id: Uuid) -> DataResult<Option<TorrentRecord>> {
        sqlx::query_as::<_, TorrentRecord>(SELECT_ONE_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load torrent record",
                source,
            })
    }

    async fn claim_for_free_end(&self, id: Uuid) -> DataResult<bool> {
        let result = sqlx::query(CLAIM_FOR_FREE_END_SQL)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "claim torrent for free-end handling",
                source,
            })?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, id: Uuid) -> DataResult<()> {
        sqlx::query(RELEASE_CLAIM_SQL)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "release free-end claim",
                source,
            })?;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: f64) -> DataResult<()> {
        sqlx::query(UPDATE_PROGRESS_SQL)
            .bind(id)
            .bind(progress)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "update torrent progress",
                source,
            })?;
        Ok(())
    }

    async fn mark_retry(&self, id: Uuid, last_error: &str, next_attempt_at: DateTime<Utc>) -> DataResult<()> {
        sqlx::query(MARK_RETRY_SQL)
            .bind(id)
            .bind(last_error)
            .bind(next_attempt_at)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "mark free-end retry",
                source,
            })?;
        Ok(())
    }

    async fn mark_paused(&self, id: Uuid, progress: f64, reason: &str) -> DataResult<()> {
        sqlx::query(MARK_PAUSED_SQL)
            .bind(id)
            .bind(reason)
            .bind(progress)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "mark torrent paused",
                source,
            })?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, progress: f64) -> DataResult<()> {
        sqlx::query(MARK_COMPLETED_SQL)
            .bind(id)
            .bind(progress)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "mark torrent completed",
                source,
            })?;
        Ok(())
    }

    async fn mark_removed_from_downloader(&self, id: Uuid) -> DataResult<()> {
        sqlx::query(MARK_REMOVED_FROM_DOWNLOADER_SQL)
            .bind(id)
            .bind("种子已从下载器中删除")
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "mark torrent removed from downloader",
                source,
            })?;
        Ok(())
    }

    async fn archive_and_remove(&self, id: Uuid, reason: ArchiveReason) -> DataResult<()> {
        let record = self.load(id).await?;
        let ratio = record.as_ref().map(TorrentRecord::ratio).unwrap_or(0.0);

        let mut tx = self.pool.begin().await.map_err(|source| DataError::QueryFailed {
            operation: "begin archive transaction",
            source,
        })?;

        sqlx::query(INSERT_ARCHIVE_SQL)
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(reason)
            .bind(ratio)
            .execute(&mut *tx)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "insert torrent archive row",
                source,
            })?;

        sqlx::query(DELETE_TORRENT_SQL)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "delete archived torrent record",
                source,
            })?;

        tx.commit().await.map_err(|source| DataError::QueryFailed {
            operation: "commit archive transaction",
            source,
        })?;

        Ok(())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_global(&self) -> DataResult<GlobalSettings> {
        let row = sqlx::query(SELECT_GLOBAL_SETTINGS_SQL)
            .bind(GLOBAL_SETTINGS_ID)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load global settings",
                source,
            })?;

        Ok(GlobalSettings {
            revision: row.try_get("revision").map_err(query_err("read revision"))?,
            min_ratio: row.try_get("min_ratio").map_err(query_err("read min_ratio"))?,
            max_idle_hours: row
                .try_get("max_idle_hours")
                .map_err(query_err("read max_idle_hours"))?,
            min_seed_hours: row
                .try_get("min_seed_hours")
                .map_err(query_err("read min_seed_hours"))?,
            max_seed_time_hours: row
                .try_get("max_seed_time_hours")
                .map_err(query_err("read max_seed_time_hours"))?,
            slow_seed_time_hours: row
                .try_get("slow_seed_time_hours")
                .map_err(query_err("read slow_seed_time_hours"))?,
            slow_max_ratio: row
                .try_get("slow_max_ratio")
                .map_err(query_err("read slow_max_ratio"))?,
            free_end_grace_minutes: row
                .try_get("free_end_grace_minutes")
                .map_err(query_err("read free_end_grace_minutes"))?,
            auto_delete_on_free_end: row
                .try_get("auto_delete_on_free_end")
                .map_err(query_err("read auto_delete_on_free_end"))?,
            cleanup_enabled: row
                .try_get("cleanup_enabled")
                .map_err(query_err("read cleanup_enabled"))?,
            cleanup_scope: row
                .try_get("cleanup_scope")
                .map_err(query_err("read cleanup_scope"))?,
            cleanup_scope_tags: row
                .try_get("cleanup_scope_tags")
                .map_err(query_err("read cleanup_scope_tags"))?,
            protect_dl: row.try_get("protect_dl").map_err(query_err("read protect_dl"))?,
            min_retain_hours: row
                .try_get("min_retain_hours")
                .map_err(query_err("read min_retain_hours"))?,
            protect_tags: row
                .try_get("protect_tags")
                .map_err(query_err("read protect_tags"))?,
            del_free_expired: row
                .try_get("del_free_expired")
                .map_err(query_err("read del_free_expired"))?,
            condition_mode: row
                .try_get("condition_mode")
                .map_err(query_err("read condition_mode"))?,
            min_disk_space_gb: row
                .try_get("min_disk_space_gb")
                .map_err(query_err("read min_disk_space_gb"))?,
            disk_protect: row
                .try_get("disk_protect")
                .map_err(query_err("read disk_protect"))?,
        })
    }

    async fn load_downloaders(&self) -> DataResult<Vec<DownloaderConfig>> {
        sqlx::query_as::<_, DownloaderConfig>(SELECT_DOWNLOADERS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load downloader settings",
                source,
            })
    }

    async fn load_sites(&self) -> DataResult<Vec<SiteSettings>> {
        sqlx::query_as::<_, SiteSettings>(SELECT_SITES_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load site settings",
                source,
            })
    }
}

fn query_err(operation: &'static str) -> impl Fn(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}
