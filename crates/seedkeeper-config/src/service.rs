//! `PostgreSQL`-backed configuration facade: snapshotting, change watching, and
//! debounced republishing onto the event bus.

use std::sync::Arc;
use std::time::Duration;

use seedkeeper_data::{DownloaderConfig, GlobalSettings, SettingsStore, SiteSettings};
use seedkeeper_events::{Event, EventBus};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::error::{ConfigError, ConfigResult};

/// Point-in-time view of global, per-downloader, and per-site configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// Process-wide lifecycle settings.
    pub global: GlobalSettings,
    /// Configured downloader clients.
    pub downloaders: Vec<DownloaderConfig>,
    /// Configured tracker sites.
    pub sites: Vec<SiteSettings>,
}

/// Reads and watches configuration backed by a `SettingsStore`.
#[derive(Clone)]
pub struct ConfigService {
    pool: PgPool,
    store: Arc<dyn SettingsStore>,
}

impl ConfigService {
    /// Build a service over an already-migrated pool and settings store.
    #[must_use]
    pub fn new(pool: PgPool, store: Arc<dyn SettingsStore>) -> Self {
        Self { pool, store }
    }

    /// Produce a consistent snapshot of the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any underlying settings query fails.
    #[instrument(name = "config_service.snapshot", skip(self))]
    pub async fn snapshot(&self) -> ConfigResult<ConfigSnapshot> {
        let global = self
            .store
            .load_global()
            .await
            .map_err(|source| ConfigError::DataAccess {
                operation: "load_global",
                source,
            })?;
        let downloaders =
            self.store
                .load_downloaders()
                .await
                .map_err(|source| ConfigError::DataAccess {
                    operation: "load_downloaders",
                    source,
                })?;
        let sites = self.store.load_sites().await.map_err(|source| ConfigError::DataAccess {
            operation: "load_sites",
            source,
        })?;

        Ok(ConfigSnapshot {
            global,
            downloaders,
            sites,
        })
    }

    /// Start watching for configuration changes, returning the current
    /// snapshot and a watcher positioned at it.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial snapshot cannot be loaded.
    pub async fn watch(&self, poll_interval: Duration) -> ConfigResult<ConfigWatcher> {
        let snapshot = self.snapshot().await?;
        let listener = self.attach_listener().await;

        Ok(ConfigWatcher {
            service: self.clone(),
            listener,
            poll_interval,
            last_revision: snapshot.global.revision,
        })
    }

    /// Spawn a background task that watches for revision bumps, debounces
    /// them, and republishes `Event::ConfigChanged` on `bus`.
    pub fn spawn_debounced_publish(
        &self,
        bus: EventBus,
        poll_interval: Duration,
        debounce: Duration,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            service.run_debounced_publish(bus, poll_interval, debounce).await;
        })
    }

    async fn run_debounced_publish(&self, bus: EventBus, poll_interval: Duration, debounce: Duration) {
        let mut watcher = match self.watch(poll_interval).await {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(error = ?err, "failed to start configuration watcher");
                return;
            }
        };

        let mut pending: Option<i64> = None;
        loop {
            let debounce_timer = async {
                match pending {
                    Some(_) => sleep(debounce).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                revision = watcher.next_revision() => {
                    match revision {
                        Ok(revision) => pending = Some(revision),
                        Err(err) => {
                            warn!(error = ?err, "configuration watcher failed, stopping publisher");
                            return;
                        }
                    }
                }
                () = debounce_timer => {
                    if let Some(revision) = pending.take() {
                        bus.publish(Event::ConfigChanged { revision });
                    }
                }
            }
        }
    }

    async fn attach_listener(&self) -> Option<PgListener> {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(error = ?err, "failed to open LISTEN connection for configuration changes");
                return None;
            }
        };

        match listener.listen(seedkeeper_runtime::SETTINGS_CHANGED_CHANNEL).await {
            Ok(()) => Some(listener),
            Err(err) => {
                warn!(error = ?err, "failed to LISTEN on configuration channel");
                None
            }
        }
    }
}

/// Watches for configuration revision bumps, falling back to polling if
/// `LISTEN`/`NOTIFY` connectivity is interrupted.
pub struct ConfigWatcher {
    service: ConfigService,
    listener: Option<PgListener>,
    poll_interval: Duration,
    last_revision: i64,
}

impl ConfigWatcher {
    /// Await the next revision greater than the last one observed.
    ///
    /// # Errors
    ///
    /// Returns an error if polling or notification parsing fails.
    pub async fn next_revision(&mut self) -> ConfigResult<i64> {
        loop {
            if let Some(revision) = self.listen_once().await? {
                return Ok(revision);
            }

            sleep(self.poll_interval).await;

            if let Some(revision) = self.poll_once().await? {
                return Ok(revision);
            }
        }
    }

    async fn listen_once(&mut self) -> ConfigResult<Option<i64>> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(None);
        };

        match listener.recv().await {
            Ok(notification) => {
                let revision = parse_revision(notification.payload())?;
                self.last_revision = self.last_revision.max(revision);
                Ok(Some(revision))
            }
            Err(err) => {
                warn!(error = ?err, "LISTEN connection dropped; switching to polling");
                self.listener = None;
                Ok(None)
            }
        }
    }

    async fn poll_once(&mut self) -> ConfigResult<Option<i64>> {
        let snapshot = self.service.snapshot().await?;
        if snapshot.global.revision > self.last_revision {
            self.last_revision = snapshot.global.revision;
            self.try_reattach_listen().await;
            return Ok(Some(snapshot.global.revision));
        }
        Ok(None)
    }

    async fn try_reattach_listen(&mut self) {
        if self.listener.is_some() {
            return;
        }
        self.listener = self.service.attach_listener().await;
    }
}

fn parse_revision(payload: &str) -> ConfigResult<i64> {
    payload
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::NotificationPayloadInvalid {
            payload: payload.to_string(),
        })
}
