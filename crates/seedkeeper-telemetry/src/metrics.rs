//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges specific to the scheduling and
//!   lifecycle-control core: event bus throughput, downloader reconnects,
//!   free-end actions, and cleanup outcomes.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across the scheduling core's crates.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_published_total: IntCounter,
    events_dropped_total: IntCounter,
    downloader_reconnect_attempts_total: IntCounterVec,
    free_end_actions_total: IntCounterVec,
    cleanup_removed_total: IntCounterVec,
    cleanup_freed_bytes_total: IntCounter,
    jobs_running: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total events published on the event bus.
    pub events_published_total: u64,
    /// Total events dropped because a subscriber's queue was full.
    pub events_dropped_total: u64,
    /// Total bytes freed by cleanup removals.
    pub cleanup_freed_bytes_total: u64,
    /// Number of currently running per-feed jobs.
    pub jobs_running: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_published_total = IntCounter::with_opts(Opts::new(
            "events_published_total",
            "Domain events published on the event bus",
        ))?;
        let events_dropped_total = IntCounter::with_opts(Opts::new(
            "events_dropped_total",
            "Domain events dropped because a subscriber's queue was full",
        ))?;
        let downloader_reconnect_attempts_total = IntCounterVec::new(
            Opts::new(
                "downloader_reconnect_attempts_total",
                "Downloader reconnect attempts by downloader name",
            ),
            &["downloader"],
        )?;
        let free_end_actions_total = IntCounterVec::new(
            Opts::new(
                "free_end_actions_total",
                "Free-end monitor terminal actions by kind",
            ),
            &["action"],
        )?;
        let cleanup_removed_total = IntCounterVec::new(
            Opts::new("cleanup_removed_total", "Torrents removed by cleanup by reason"),
            &["reason"],
        )?;
        let cleanup_freed_bytes_total = IntCounter::with_opts(Opts::new(
            "cleanup_freed_bytes_total",
            "Total bytes freed by cleanup removals",
        ))?;
        let jobs_running = IntGauge::with_opts(Opts::new(
            "jobs_running",
            "Number of currently running per-feed jobs",
        ))?;

        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(events_dropped_total.clone()))?;
        registry.register(Box::new(downloader_reconnect_attempts_total.clone()))?;
        registry.register(Box::new(free_end_actions_total.clone()))?;
        registry.register(Box::new(cleanup_removed_total.clone()))?;
        registry.register(Box::new(cleanup_freed_bytes_total.clone()))?;
        registry.register(Box::new(jobs_running.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_published_total,
                events_dropped_total,
                downloader_reconnect_attempts_total,
                free_end_actions_total,
                cleanup_removed_total,
                cleanup_freed_bytes_total,
                jobs_running,
            }),
        })
    }

    /// Increment the published-event counter.
    pub fn inc_event_published(&self) {
        self.inner.events_published_total.inc();
    }

    /// Increment the dropped-event counter.
    pub fn inc_event_dropped(&self) {
        self.inner.events_dropped_total.inc();
    }

    /// Increment the reconnect-attempt counter for a named downloader.
    pub fn inc_downloader_reconnect_attempt(&self, downloader: &str) {
        self.inner
            .downloader_reconnect_attempts_total
            .with_label_values(&[downloader])
            .inc();
    }

    /// Increment the free-end action counter for the given action kind.
    pub fn inc_free_end_action(&self, action: &str) {
        self.inner.free_end_actions_total.with_label_values(&[action]).inc();
    }

    /// Increment the cleanup-removed counter for the given archive reason.
    pub fn inc_cleanup_removed(&self, reason: &str) {
        self.inner.cleanup_removed_total.with_label_values(&[reason]).inc();
    }

    /// Add to the total bytes freed by cleanup.
    pub fn add_cleanup_freed_bytes(&self, bytes: i64) {
        self.inner.cleanup_freed_bytes_total.inc_by(bytes.max(0).unsigned_abs());
    }

    /// Set the running-jobs gauge.
    pub fn set_jobs_running(&self, count: i64) {
        self.inner.jobs_running.set(count);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published_total: self.inner.events_published_total.get(),
            events_dropped_total: self.inner.events_dropped_total.get(),
            cleanup_freed_bytes_total: self.inner.cleanup_freed_bytes_total.get(),
            jobs_running: self.inner.jobs_running.get(),
        }
    }
}
