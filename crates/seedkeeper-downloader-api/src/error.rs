//! Error types for downloader client operations.

use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

/// Primary error type for downloader operations.
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// Operation is not supported by this downloader adapter.
    #[error("downloader operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Torrent was not found on the downloader.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        torrent_id: Uuid,
    },
    /// The downloader client call failed.
    #[error("downloader client call failed")]
    ClientFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The downloader did not respond or responded with an error to a health check.
    #[error("downloader unhealthy")]
    Unhealthy {
        /// Human-readable detail describing the failure.
        reason: String,
    },
}

impl DownloaderError {
    /// Build an `Unsupported` error for `operation`.
    #[must_use]
    pub const fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}

/// Convenience alias for downloader operation results.
pub type DownloaderResult<T> = Result<T, DownloaderError>;
