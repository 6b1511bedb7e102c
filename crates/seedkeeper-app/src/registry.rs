//! Lazily-connected registry of downloader clients with per-entry reconnect backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use seedkeeper_data::{DownloaderConfig, SiteSettings};
use seedkeeper_downloader_api::Downloader;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

const MAX_BACKOFF_SECS: i64 = 300;

/// Connectivity state of a single registered downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The downloader answered its last health check successfully.
    Connected,
    /// The downloader is being retried after a failed health check.
    Reconnecting {
        /// Number of consecutive failed health checks, starting at 1.
        attempt: u32,
        /// Earliest time another attempt should be made.
        next_retry_at: DateTime<Utc>,
    },
    /// The downloader has no entry yet and has never been health-checked.
    Unknown,
}

/// Error returned when a downloader cannot be retrieved or routed to.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No downloader is registered under the requested name.
    #[error("unknown downloader {name}")]
    UnknownDownloader {
        /// Name that was requested.
        name: String,
    },
    /// The downloader exists but is currently backing off after failures.
    #[error("downloader {name} is reconnecting (attempt {attempt})")]
    Reconnecting {
        /// Name of the downloader that is unavailable.
        name: String,
        /// Current reconnect attempt.
        attempt: u32,
    },
}

struct RegistryEntry {
    client: Arc<dyn Downloader>,
    state: ConnectionState,
    attempts: AtomicU32,
}

/// A lazily-connected table of named downloader clients, with independent
/// reconnect backoff per entry.
pub struct DownloaderRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl DownloaderRegistry {
    /// Build a registry from configuration, instantiating a client for each
    /// enabled entry via `factory`.
    #[must_use]
    pub fn new(
        configs: &[DownloaderConfig],
        factory: impl Fn(&DownloaderConfig) -> Arc<dyn Downloader>,
    ) -> Self {
        let mut entries = HashMap::with_capacity(configs.len());
        for config in configs.iter().filter(|config| config.enabled) {
            entries.insert(
                config.name.clone(),
                RegistryEntry {
                    client: factory(config),
                    state: ConnectionState::Unknown,
                    attempts: AtomicU32::new(0),
                },
            );
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Return the client registered under `name` if it is connected or
    /// unknown (not yet health-checked); fails fast without I/O if the entry
    /// is currently backing off.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDownloader`] if no entry exists, or
    /// [`RegistryError::Reconnecting`] if the entry is backing off.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Downloader>, RegistryError> {
        let entries = self.entries.lock().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDownloader {
                name: name.to_string(),
            })?;

        match &entry.state {
            ConnectionState::Reconnecting { attempt, next_retry_at } if *next_retry_at > Utc::now() => {
                Err(RegistryError::Reconnecting {
                    name: name.to_string(),
                    attempt: *attempt,
                })
            }
            _ => Ok(Arc::clone(&entry.client)),
        }
    }

    /// Resolve `site` to its configured downloader and return the client.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDownloader`] if the site names a
    /// downloader with no registry entry, or if the site itself is unknown.
    pub async fn route(
        &self,
        sites: &[SiteSettings],
        site: &str,
    ) -> Result<Arc<dyn Downloader>, RegistryError> {
        let downloader_name =
            sites
                .iter()
                .find(|candidate| candidate.site == site)
                .map(|settings| settings.downloader.as_str())
                .ok_or_else(|| RegistryError::UnknownDownloader {
                    name: site.to_string(),
                })?;
        self.get(downloader_name).await
    }

    /// Health-check every registered entry, transitioning state based on the result.
    pub async fn health_check_all(&self) {
        let names: Vec<String> = {
            let entries = self.entries.lock().await;
            entries.keys().cloned().collect()
        };

        for name in names {
            self.health_check_one(&name).await;
        }
    }

    async fn health_check_one(&self, name: &str) {
        let client = {
            let entries = self.entries.lock().await;
            entries.get(name).map(|entry| Arc::clone(&entry.client))
        };
        let Some(client) = client else {
            return;
        };

        let healthy = matches!(
            client.health_check().await,
            seedkeeper_downloader_api::HealthStatus::Healthy
        );

        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(name) else {
            return;
        };

        if healthy {
            if !matches!(entry.state, ConnectionState::Connected) {
                info!(downloader = name, "downloader connected");
            }
            entry.attempts.store(0, Ordering::SeqCst);
            entry.state = ConnectionState::Connected;
        } else {
            let attempt = entry.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let delay_secs = reconnect_delay_secs(attempt);
            let next_retry_at = Utc::now() + ChronoDuration::seconds(delay_secs);
            warn!(downloader = name, attempt, delay_secs, "downloader health check failed");
            entry.state = ConnectionState::Reconnecting {
                attempt,
                next_retry_at,
            };
        }
    }
}

/// `delay = min(2^(attempt-1) seconds, MAX_BACKOFF_SECS)`.
pub(crate) fn reconnect_delay_secs(attempt: u32) -> i64 {
    let exponent = attempt.saturating_sub(1);
    2_i64.saturating_pow(exponent).min(MAX_BACKOFF_SECS)
}
