//! Process bootstrap: environment loading, dependency construction, and the
//! run loop that owns every background task until shutdown.

use std::sync::Arc;
use std::time::Duration;

use seedkeeper_config::ConfigService;
use seedkeeper_data::{DownloaderConfig, SettingsStore, TorrentRepository};
use seedkeeper_downloader_api::{Downloader, HealthStatus};
use seedkeeper_events::EventBus;
use seedkeeper_runtime::PgStore;
use seedkeeper_telemetry::{LoggingConfig, Metrics, init_logging};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::manager::Manager;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CONFIG_DEBOUNCE: Duration = Duration::from_millis(200);
const EVENT_BUS_BUFFER: usize = 256;

/// Everything the run loop needs, assembled once at startup.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    #[allow(dead_code)]
    telemetry: Metrics,
    config: ConfigService,
    events: EventBus,
    manager: Arc<Manager>,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let logging = LoggingConfig::default();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| AppError::MissingEnv {
            name: "DATABASE_URL",
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .map_err(|source| AppError::Data {
                operation: "pool.connect",
                source: source.into(),
            })?;

        let store = PgStore::new(pool.clone())
            .await
            .map_err(|source| AppError::Data {
                operation: "pg_store.new",
                source,
            })?;
        store
            .ensure_global_settings_seeded()
            .await
            .map_err(|source| AppError::Data {
                operation: "pg_store.ensure_global_settings_seeded",
                source,
            })?;

        let repository: Arc<dyn TorrentRepository> = Arc::new(store.clone());
        let settings: Arc<dyn SettingsStore> = Arc::new(store);

        let telemetry = Metrics::new().map_err(|source| AppError::Telemetry {
            operation: "metrics.new",
            source,
        })?;

        let config = ConfigService::new(pool, Arc::clone(&settings));
        let events = EventBus::new(EVENT_BUS_BUFFER);

        let manager = Manager::new(repository, settings, events.clone(), unconfigured_downloader)
            .await
            .map_err(|source| AppError::Data {
                operation: "manager.new",
                source,
            })?;

        Ok(Self {
            logging,
            telemetry,
            config,
            events,
            manager,
        })
    }
}

/// Boot sequence entry point for the binary. Blocks until `SIGINT`/`SIGTERM`
/// (via `ctrl_c`), then drains background tasks before returning.
///
/// # Errors
///
/// Returns an error if dependency construction fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    run_app_with(dependencies).await
}

pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    init_logging(&dependencies.logging).map_err(|source| AppError::Telemetry {
        operation: "telemetry.init_logging",
        source,
    })?;

    info!("seedkeeper application bootstrap starting");

    let BootstrapDependencies {
        logging: _,
        telemetry: _,
        config,
        events,
        manager,
    } = dependencies;

    let config_task = config.spawn_debounced_publish(events.clone(), CONFIG_POLL_INTERVAL, CONFIG_DEBOUNCE);

    manager.start_all().await;
    info!("seedkeeper application ready");

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining background tasks");

    manager.stop_all().await;
    if !config_task.is_finished() {
        config_task.abort();
    }

    Ok(())
}

/// Placeholder downloader client used until a concrete protocol crate is
/// wired in; every operation reports `Unsupported` rather than panicking.
struct UnconfiguredDownloader;

#[async_trait::async_trait]
impl Downloader for UnconfiguredDownloader {
    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Unreachable {
            reason: "no concrete downloader client configured".to_string(),
        }
    }
}

fn unconfigured_downloader(config: &DownloaderConfig) -> Arc<dyn Downloader> {
    tracing::warn!(downloader = %config.name, kind = %config.kind, "no concrete downloader client wired, using unconfigured stub");
    Arc::new(UnconfiguredDownloader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedkeeper_downloader_api::DownloaderResult;

    #[tokio::test]
    async fn unconfigured_downloader_reports_unreachable() {
        let config = DownloaderConfig {
            name: "primary".to_string(),
            kind: "qbittorrent".to_string(),
            endpoint: "http://localhost:8080".to_string(),
            enabled: true,
        };
        let client = unconfigured_downloader(&config);
        assert!(matches!(client.health_check().await, HealthStatus::Unreachable { .. }));

        let result: DownloaderResult<()> = client.pause_torrent(uuid::Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
