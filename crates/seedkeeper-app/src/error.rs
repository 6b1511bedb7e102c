//! # Design
//!
//! - Centralize application-level errors for orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;
use uuid::Uuid;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: seedkeeper_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: anyhow::Error,
    },
    /// Persistence operations failed.
    #[error("persistence operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: seedkeeper_data::DataError,
    },
    /// A named downloader is not present in the registry.
    #[error("unknown downloader")]
    UnknownDownloader {
        /// Downloader name that was requested.
        name: String,
    },
    /// A named downloader is currently backing off after repeated failures.
    #[error("downloader is reconnecting")]
    DownloaderReconnecting {
        /// Downloader name that is unavailable.
        name: String,
        /// Reconnect attempt currently in progress.
        attempt: u32,
    },
    /// A site routed to a downloader with no matching registry entry.
    #[error("site routed to an unconfigured downloader")]
    UnroutableSite {
        /// Site name that failed to route.
        site: String,
        /// Downloader name the site names that does not exist.
        downloader: String,
    },
    /// A downloader-facing operation against a specific torrent failed.
    #[error("downloader operation failed")]
    Downloader {
        /// Operation identifier.
        operation: &'static str,
        /// Torrent the operation targeted.
        torrent_id: Uuid,
        /// Source downloader error.
        source: seedkeeper_downloader_api::DownloaderError,
    },
    /// Required runtime state was missing.
    #[error("missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
    },
}
