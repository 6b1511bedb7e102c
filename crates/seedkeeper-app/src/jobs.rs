//! Per-feed background task supervision with debounced config-driven reloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seedkeeper_data::JobKey;
use seedkeeper_events::{Event, EventBus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop`/`stop_all` wait for cooperative cancellation before
/// hard-aborting a runner that hasn't exited on its own.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// One implementation per feed kind; this workspace does not ship a concrete
/// RSS/scraping runner, only the supervision around one.
#[async_trait]
pub trait FeedRunner: Send + Sync {
    /// Run until `stop` is cancelled.
    async fn run(self: Arc<Self>, stop: CancellationToken);
}

/// A single running (or stopped) feed task.
struct JobHandle {
    task: JoinHandle<()>,
    stop: CancellationToken,
}

/// Owns exactly one running task per `JobKey`, with debounced reload on
/// `Event::ConfigChanged`.
pub struct JobManager {
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    /// Build an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a runner under `key`. A second `start` for a key already
    /// running is a no-op that logs a warning rather than double-spawning;
    /// use [`Self::reload`] to replace a running task.
    pub async fn start(&self, key: JobKey, runner: Arc<dyn FeedRunner>) {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&key) {
            warn!(feed = %key.feed, "job already running, ignoring duplicate start");
            return;
        }

        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            runner.run(task_stop).await;
        });

        jobs.insert(key, JobHandle { task, stop });
    }

    /// Stop the task registered under `key`. A no-op if none is running.
    ///
    /// Signals cancellation and awaits the task with a bounded timeout,
    /// giving the runner a chance to exit cooperatively before it is
    /// hard-aborted.
    pub async fn stop(&self, key: &JobKey) {
        let handle = self.jobs.lock().await.remove(key);
        if let Some(handle) = handle {
            handle.stop.cancel();
            Self::await_or_abort(handle.task).await;
        }
    }

    async fn await_or_abort(task: JoinHandle<()>) {
        if task.is_finished() {
            return;
        }
        let abort_handle = task.abort_handle();
        if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
            warn!("job did not exit within the stop timeout, aborting");
            abort_handle.abort();
        }
    }

    /// Stop the task under `key`, if any, then start `runner` under it, as a
    /// single operation so callers reacting to `ConfigChanged` don't have to
    /// sequence it themselves.
    pub async fn reload(&self, key: JobKey, runner: Arc<dyn FeedRunner>) {
        self.stop(&key).await;
        self.start(key, runner).await;
    }

    /// Start every `(key, runner)` pair, used at process startup.
    pub async fn start_all(&self, runners: impl IntoIterator<Item = (JobKey, Arc<dyn FeedRunner>)>) {
        for (key, runner) in runners {
            self.start(key, runner).await;
        }
    }

    /// Stop every running task.
    ///
    /// Cancels every task up front so they wind down concurrently, then
    /// awaits each with the same bounded timeout as [`Self::stop`].
    pub async fn stop_all(&self) {
        let handles: Vec<JobHandle> = self.jobs.lock().await.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.stop.cancel();
        }
        for handle in handles {
            Self::await_or_abort(handle.task).await;
        }
    }

    /// Number of currently tracked jobs (running or pending abort).
    pub async fn running_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Spawn a task that reloads `key` via `reload` whenever `bus` emits
    /// `Event::ConfigChanged`, debounced by `debounce` with the timer reset
    /// (not accumulated) on every further change observed while armed.
    pub fn spawn_debounced_reload<F, Fut>(
        self: &Arc<Self>,
        key: JobKey,
        bus: EventBus,
        debounce: Duration,
        reload: F,
    ) -> JoinHandle<()>
    where
        F: Fn(JobKey) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut subscription = bus.subscribe();
            let mut armed = false;

            loop {
                let debounce_timer = async {
                    if armed {
                        tokio::time::sleep(debounce).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                };

                tokio::select! {
                    envelope = subscription.next() => {
                        let Some(envelope) = envelope else {
                            info!(feed = %key.feed, "config change subscription closed, stopping reload watcher");
                            return;
                        };
                        if matches!(envelope.event, Event::ConfigChanged { .. }) {
                            armed = true;
                        }
                    }
                    () = debounce_timer => {
                        armed = false;
                        reload(key.clone()).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingRunner {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FeedRunner for RecordingRunner {
        async fn run(self: Arc<Self>, stop: CancellationToken) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            stop.cancelled().await;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn starting_twice_for_the_same_key_is_a_no_op() {
        let manager = JobManager::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let key = JobKey::new("alpha");

        manager
            .start(
                key.clone(),
                Arc::new(RecordingRunner {
                    starts: starts.clone(),
                    stops: stops.clone(),
                }),
            )
            .await;
        tokio::task::yield_now().await;

        manager
            .start(
                key.clone(),
                Arc::new(RecordingRunner {
                    starts: starts.clone(),
                    stops: stops.clone(),
                }),
            )
            .await;
        tokio::task::yield_now().await;

        assert_eq!(manager.running_count().await, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_stops_the_old_task_and_starts_a_new_one() {
        let manager = JobManager::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let key = JobKey::new("alpha");

        manager
            .start(
                key.clone(),
                Arc::new(RecordingRunner { starts: starts.clone(), stops: stops.clone() }),
            )
            .await;
        tokio::task::yield_now().await;

        manager
            .reload(
                key.clone(),
                Arc::new(RecordingRunner { starts: starts.clone(), stops: stops.clone() }),
            )
            .await;
        tokio::task::yield_now().await;

        assert_eq!(manager.running_count().await, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stopping_an_unknown_key_is_a_no_op() {
        let manager = JobManager::new();
        manager.stop(&JobKey::new("never-started")).await;
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn debounced_reload_collapses_rapid_config_changes_into_one_pair() {
        let manager = Arc::new(JobManager::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let key = JobKey::new("alpha");
        let bus = EventBus::new(8);

        manager
            .start(
                key.clone(),
                Arc::new(RecordingRunner { starts: starts.clone(), stops: stops.clone() }),
            )
            .await;
        tokio::task::yield_now().await;

        let watcher_manager = Arc::clone(&manager);
        let watcher_starts = starts.clone();
        let watcher_stops = stops.clone();
        let handle = manager.spawn_debounced_reload(
            key.clone(),
            bus.clone(),
            Duration::from_millis(20),
            move |key| {
                let manager = Arc::clone(&watcher_manager);
                let starts = watcher_starts.clone();
                let stops = watcher_stops.clone();
                async move {
                    manager
                        .reload(key, Arc::new(RecordingRunner { starts, stops }))
                        .await;
                }
            },
        );

        bus.publish(Event::ConfigChanged { revision: 1 });
        tokio::time::sleep(Duration::from_millis(5)).await;
        bus.publish(Event::ConfigChanged { revision: 2 });

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert_eq!(starts.load(Ordering::SeqCst), 2, "exactly one reload, not two");
        assert_eq!(manager.running_count().await, 1);
    }

    #[tokio::test]
    async fn stop_all_clears_every_job() {
        let manager = JobManager::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b", "c"] {
            manager
                .start(
                    JobKey::new(name),
                    Arc::new(RecordingRunner {
                        starts: starts.clone(),
                        stops: stops.clone(),
                    }),
                )
                .await;
        }

        assert_eq!(manager.running_count().await, 3);
        manager.stop_all().await;
        assert_eq!(manager.running_count().await, 0);
    }
}
