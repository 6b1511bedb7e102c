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

//! Downloader-agnostic capability trait and DTOs.
//!
//! This crate never speaks the wire protocol of a concrete downloader client;
//! `Downloader` is the seam concrete adapters (qBittorrent, Transmission, ...)
//! implement, and the rest of the workspace codes against it.

mod error;

pub use error::{DownloaderError, DownloaderResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source describing how a torrent should be handed to the downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    /// A magnet URI that should be resolved by the downloader.
    MagnetUri {
        /// Magnet URI to add.
        uri: String,
    },
    /// Raw bencoded `.torrent` metainfo bytes.
    TorrentFile {
        /// Metainfo payload.
        bytes: Vec<u8>,
    },
}

/// Request payload for admitting a torrent into a downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrent {
    /// Identifier assigned by the caller; the downloader is expected to honor it
    /// where its own API allows choosing an id, otherwise map it internally.
    pub id: Uuid,
    /// How the torrent payload should be retrieved.
    pub source: TorrentSource,
    /// Directory the downloader should save the torrent's contents under.
    pub save_path: String,
    /// Rate limit to apply immediately after admission.
    #[serde(default)]
    pub rate_limit: RateLimit,
    /// Whether the torrent should be added in a paused state.
    #[serde(default)]
    pub start_paused: bool,
    /// Arbitrary labels propagated to the downloader, when supported.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Per-torrent (or global, when `id` is `None` at the call site) rate limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct RateLimit {
    /// Maximum download rate in bytes per second.
    pub download_bps: Option<u64>,
    /// Maximum upload rate in bytes per second.
    pub upload_bps: Option<u64>,
}

/// Lifecycle state of a torrent as seen through a downloader client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentLifecycle {
    /// Actively downloading payload data.
    Downloading,
    /// Finished downloading and actively seeding.
    Seeding,
    /// Paused by the user or by lifecycle control.
    Paused,
    /// Finished downloading and no longer seeding.
    Completed,
    /// In an error state reported by the downloader.
    Error,
}

/// Individual file exposed by a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    /// Index of the file within the torrent's metainfo.
    pub index: u32,
    /// Relative path of the file within the torrent payload.
    pub path: String,
    /// Total size of the file in bytes.
    pub size_bytes: u64,
    /// Bytes downloaded so far for this file.
    pub bytes_completed: u64,
}

/// Point-in-time snapshot of a torrent as reported by a downloader client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Identifier for the torrent.
    pub id: Uuid,
    /// Display name reported by the downloader.
    pub name: String,
    /// Current lifecycle state.
    pub state: TorrentLifecycle,
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Bytes uploaded so far.
    pub bytes_uploaded: u64,
    /// Total payload size in bytes.
    pub size_bytes: u64,
    /// Share ratio (uploaded/downloaded) as reported by the downloader.
    pub ratio: f64,
    /// Fractional completion in `[0.0, 1.0]`, independent of `ratio`.
    pub progress: f64,
    /// Estimated time remaining for completion, in seconds.
    pub eta_seconds: Option<u64>,
    /// File listing, when the downloader exposes per-file detail.
    pub files: Option<Vec<TorrentFile>>,
    /// Timestamp this snapshot was produced.
    pub observed_at: DateTime<Utc>,
}

/// Result of a downloader health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The downloader responded successfully.
    Healthy,
    /// The downloader did not respond, or responded with an error.
    Unreachable {
        /// Human-readable detail describing why the check failed.
        reason: String,
    },
}

/// Capability trait implemented by concrete downloader client adapters.
///
/// Every method defaults to `Unsupported`; an adapter only needs to override
/// the operations its downloader actually exposes.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Admit a new torrent.
    async fn add_torrent(&self, request: AddTorrent) -> DownloaderResult<()> {
        let _ = request;
        Err(DownloaderError::unsupported("add_torrent"))
    }

    /// Remove a torrent, optionally deleting its on-disk data.
    async fn remove_torrent(&self, id: Uuid, with_data: bool) -> DownloaderResult<()> {
        let _ = (id, with_data);
        Err(DownloaderError::unsupported("remove_torrent"))
    }

    /// Pause a torrent.
    async fn pause_torrent(&self, id: Uuid) -> DownloaderResult<()> {
        let _ = id;
        Err(DownloaderError::unsupported("pause_torrent"))
    }

    /// Resume a paused torrent.
    async fn resume_torrent(&self, id: Uuid) -> DownloaderResult<()> {
        let _ = id;
        Err(DownloaderError::unsupported("resume_torrent"))
    }

    /// Apply a rate limit to a single torrent.
    async fn set_rate_limit(&self, id: Uuid, limit: RateLimit) -> DownloaderResult<()> {
        let _ = (id, limit);
        Err(DownloaderError::unsupported("set_rate_limit"))
    }

    /// Fetch the current snapshot for a single torrent.
    async fn status(&self, id: Uuid) -> DownloaderResult<TorrentSnapshot> {
        let _ = id;
        Err(DownloaderError::unsupported("status"))
    }

    /// List every torrent currently known to the downloader.
    async fn list(&self) -> DownloaderResult<Vec<TorrentSnapshot>> {
        Err(DownloaderError::unsupported("list"))
    }

    /// Check whether the downloader is reachable and responding.
    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Unreachable {
            reason: "health_check not implemented".to_string(),
        }
    }

    /// Query free disk space at the downloader's save path, in bytes.
    async fn disk_free_bytes(&self) -> DownloaderResult<u64> {
        Err(DownloaderError::unsupported("disk_free_bytes"))
    }
}
