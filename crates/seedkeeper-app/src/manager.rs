//! Wires the downloader registry, job supervision, and the free-end/cleanup
//! monitors together for a running process.

use std::sync::Arc;
use std::time::Duration;

use seedkeeper_data::{DataResult, DownloaderConfig, SettingsStore, TorrentRepository};
use seedkeeper_downloader_api::Downloader;
use seedkeeper_events::EventBus;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cleanup::CleanupMonitor;
use crate::free_end::FreeEndMonitor;
use crate::jobs::JobManager;
use crate::registry::DownloaderRegistry;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Top-level facade a binary entrypoint wires up once at startup and holds
/// for the life of the process.
pub struct Manager {
    /// Lazily-connected downloader clients, keyed by name.
    pub registry: Arc<DownloaderRegistry>,
    /// Per-feed background task supervisor.
    pub jobs: Arc<JobManager>,
    /// Free-leech expiry scheduler and claim/decide/act pipeline.
    pub free_end: Arc<FreeEndMonitor>,
    /// Retention/ratio/disk-pressure removal pipeline.
    pub cleanup: Arc<CleanupMonitor>,
}

impl Manager {
    /// Build every component from the given dependencies. `downloader_factory`
    /// constructs one client per enabled [`DownloaderConfig`]; this crate
    /// carries no concrete downloader wire protocol of its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial downloader configuration cannot be loaded.
    pub async fn new(
        repository: Arc<dyn TorrentRepository>,
        settings: Arc<dyn SettingsStore>,
        events: EventBus,
        downloader_factory: impl Fn(&DownloaderConfig) -> Arc<dyn Downloader>,
    ) -> DataResult<Arc<Self>> {
        let configs = settings.load_downloaders().await?;
        let registry = Arc::new(DownloaderRegistry::new(&configs, downloader_factory));
        let jobs = Arc::new(JobManager::new());
        let free_end = FreeEndMonitor::new(
            Arc::clone(&repository),
            Arc::clone(&settings),
            Arc::clone(&registry),
            events.clone(),
        );
        let cleanup = CleanupMonitor::new(repository, settings, Arc::clone(&registry), events);

        Ok(Arc::new(Self {
            registry,
            jobs,
            free_end,
            cleanup,
        }))
    }

    /// Start the free-end monitor, the cleanup monitor, and the periodic
    /// downloader health-check loop.
    pub async fn start_all(self: &Arc<Self>) {
        self.free_end.start().await;
        self.cleanup.start();
        self.spawn_health_check_loop();
        info!("manager started all monitors");
    }

    /// Stop every supervised per-feed job. The monitors' own background
    /// scans are cancelled when their tasks are dropped with the process.
    pub async fn stop_all(&self) {
        self.jobs.stop_all().await;
    }

    fn spawn_health_check_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                manager.registry.health_check_all().await;
            }
        })
    }
}
