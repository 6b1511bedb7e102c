//! In-memory `Downloader` double used by this crate's own unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use seedkeeper_downloader_api::{
    AddTorrent, DownloaderError, DownloaderResult, HealthStatus, RateLimit, TorrentSnapshot,
};
use uuid::Uuid;

/// Records every call it receives instead of talking to a real downloader.
#[derive(Default)]
pub(crate) struct FakeDownloader {
    healthy: AtomicBool,
    fail_next_calls: Mutex<u32>,
    added: Mutex<Vec<Uuid>>,
    removed: Mutex<Vec<(Uuid, bool)>>,
    paused: Mutex<Vec<Uuid>>,
    resumed: Mutex<Vec<Uuid>>,
    rate_limits: Mutex<Vec<(Uuid, RateLimit)>>,
    statuses: Mutex<HashMap<Uuid, TorrentSnapshot>>,
    not_found: Mutex<HashSet<Uuid>>,
    disk_free_bytes: Mutex<Option<u64>>,
}

#[allow(dead_code)]
impl FakeDownloader {
    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// The next `n` mutating calls (remove/pause/resume) fail before succeeding again.
    pub(crate) fn fail_next(&self, n: u32) {
        *self.fail_next_calls.lock().expect("fail_next_calls poisoned") = n;
    }

    /// Configure the snapshot `status`/`remove_torrent`/`pause_torrent` see for `id`.
    pub(crate) fn set_status(&self, id: Uuid, snapshot: TorrentSnapshot) {
        self.statuses.lock().expect("statuses poisoned").insert(id, snapshot);
    }

    /// `status` and `remove_torrent` report `id` as gone from the downloader.
    pub(crate) fn set_not_found(&self, id: Uuid) {
        self.not_found.lock().expect("not_found poisoned").insert(id);
    }

    /// Configure the value `disk_free_bytes` reports.
    pub(crate) fn set_disk_free_bytes(&self, bytes: u64) {
        *self.disk_free_bytes.lock().expect("disk_free_bytes poisoned") = Some(bytes);
    }

    pub(crate) fn paused_calls(&self) -> Vec<Uuid> {
        self.paused.lock().expect("paused poisoned").clone()
    }

    pub(crate) fn removed_calls(&self) -> Vec<(Uuid, bool)> {
        self.removed.lock().expect("removed poisoned").clone()
    }

    pub(crate) fn resumed_calls(&self) -> Vec<Uuid> {
        self.resumed.lock().expect("resumed poisoned").clone()
    }

    fn take_failure(&self) -> bool {
        let mut remaining = self.fail_next_calls.lock().expect("fail_next_calls poisoned");
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl seedkeeper_downloader_api::Downloader for FakeDownloader {
    async fn add_torrent(&self, request: AddTorrent) -> DownloaderResult<()> {
        self.added.lock().expect("added poisoned").push(request.id);
        Ok(())
    }

    async fn remove_torrent(&self, id: Uuid, with_data: bool) -> DownloaderResult<()> {
        if self.not_found.lock().expect("not_found poisoned").contains(&id) {
            return Err(DownloaderError::NotFound { torrent_id: id });
        }
        if self.take_failure() {
            return Err(DownloaderError::ClientFailed {
                operation: "remove_torrent",
                source: "fake failure".into(),
            });
        }
        self.removed.lock().expect("removed poisoned").push((id, with_data));
        Ok(())
    }

    async fn pause_torrent(&self, id: Uuid) -> DownloaderResult<()> {
        if self.take_failure() {
            return Err(DownloaderError::ClientFailed {
                operation: "pause_torrent",
                source: "fake failure".into(),
            });
        }
        self.paused.lock().expect("paused poisoned").push(id);
        Ok(())
    }

    async fn resume_torrent(&self, id: Uuid) -> DownloaderResult<()> {
        self.resumed.lock().expect("resumed poisoned").push(id);
        Ok(())
    }

    async fn set_rate_limit(&self, id: Uuid, limit: RateLimit) -> DownloaderResult<()> {
        self.rate_limits.lock().expect("rate_limits poisoned").push((id, limit));
        Ok(())
    }

    async fn status(&self, id: Uuid) -> DownloaderResult<TorrentSnapshot> {
        if self.not_found.lock().expect("not_found poisoned").contains(&id) {
            return Err(DownloaderError::NotFound { torrent_id: id });
        }
        if self.take_failure() {
            return Err(DownloaderError::ClientFailed {
                operation: "status",
                source: "fake failure".into(),
            });
        }
        self.statuses
            .lock()
            .expect("statuses poisoned")
            .get(&id)
            .cloned()
            .ok_or(DownloaderError::NotFound { torrent_id: id })
    }

    async fn list(&self) -> DownloaderResult<Vec<TorrentSnapshot>> {
        Ok(self.statuses.lock().expect("statuses poisoned").values().cloned().collect())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unreachable {
                reason: "fake downloader marked unhealthy".to_string(),
            }
        }
    }

    async fn disk_free_bytes(&self) -> DownloaderResult<u64> {
        self.disk_free_bytes
            .lock()
            .expect("disk_free_bytes poisoned")
            .ok_or(DownloaderError::unsupported("disk_free_bytes"))
    }
}
