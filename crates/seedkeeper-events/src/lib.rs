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
#![allow(clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! Event bus for the scheduling and lifecycle-control core.
//!
//! Unlike a broadcast channel, every subscriber here owns its own bounded
//! queue: a slow subscriber only ever affects its own backlog and drop
//! count, never another subscriber's delivery or the publisher's latency.
//! `publish` is synchronous and never awaits; it fans an envelope out with
//! `try_send`, discarding it for any subscriber whose queue is already
//! full.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_stream::Stream;
use tracing::error;

/// Identifier assigned to each event published on the bus.
pub type EventId = u64;

/// Domain events carried across the scheduling core.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A configuration revision was committed and should be reloaded.
    ConfigChanged {
        /// Revision number of the settings snapshot that should now be active.
        revision: i64,
    },
    /// Available disk space has fallen below the configured threshold.
    DiskSpaceLow {
        /// Bytes currently available on the monitored volume.
        available_bytes: u64,
        /// Threshold that triggered this notification.
        threshold_bytes: u64,
    },
}

/// Metadata wrapper around a published event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned at publish time.
    pub id: EventId,
    /// Wrapped event payload.
    pub event: Event,
    /// Timestamp recording when the envelope was produced.
    pub published_at: DateTime<Utc>,
}

struct SubscriberQueue {
    buffer: usize,
    queue: Mutex<VecDeque<EventEnvelope>>,
    dropped: AtomicU64,
    notify: Notify,
    closed: Mutex<bool>,
}

impl SubscriberQueue {
    fn new(buffer: usize) -> Self {
        Self {
            buffer,
            queue: Mutex::new(VecDeque::with_capacity(buffer)),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            closed: Mutex::new(false),
        }
    }

    fn push(&self, envelope: EventEnvelope) {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.len() >= self.buffer {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        queue.push_back(envelope);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
        self.notify.notify_waiters();
    }
}

/// Shared, cheaply-cloned event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: usize,
    next_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Arc<SubscriberQueue>>>,
}

impl EventBus {
    /// Construct a new bus whose subscribers each hold a queue of `buffer` entries.
    ///
    /// A `buffer` of zero is accepted: every event is immediately dropped for
    /// every subscriber, which is useful for exercising drop-accounting in
    /// tests without also exercising delivery.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer,
                next_id: AtomicU64::new(1),
                next_subscriber_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publish an event, fanning it out to every live subscriber.
    ///
    /// Returns the envelope that was published, including the id assigned to
    /// it, for callers that want to log or assert on it without a second
    /// subscription.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber map mutex has been poisoned.
    pub fn publish(&self, event: Event) -> EventEnvelope {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            event,
            published_at: Utc::now(),
        };

        let subscribers = self.lock_subscribers();
        for queue in subscribers.values() {
            queue.push(envelope.clone());
        }

        envelope
    }

    /// Register a new subscriber. Only events published after this call are
    /// delivered; there is no history replay.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber map mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.buffer));

        self.lock_subscribers().insert(id, queue.clone());

        Subscription {
            id,
            bus: self.inner.clone(),
            queue,
        }
    }

    /// Number of subscribers currently registered.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber map mutex has been poisoned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<u64, Arc<SubscriberQueue>>> {
        match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event bus subscriber map mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A live subscription to the bus. Implements `Stream<Item = EventEnvelope>`.
pub struct Subscription {
    id: u64,
    bus: Arc<Inner>,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Number of events dropped for this subscriber because its queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next event, waiting if none is currently queued.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        std::future::poll_fn(|cx| self.poll_next_envelope(cx)).await
    }

    fn poll_next_envelope(&self, cx: &mut Context<'_>) -> Poll<Option<EventEnvelope>> {
        loop {
            // Register interest before checking state so a push/close that
            // races with this poll is never missed.
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);

            let mut queue = match self.queue.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(envelope) = queue.pop_front() {
                return Poll::Ready(Some(envelope));
            }
            drop(queue);

            if *self.queue.closed.lock().unwrap_or_else(|p| p.into_inner()) {
                return Poll::Ready(None);
            }

            if notified.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
        }
    }
}

impl Stream for Subscription {
    type Item = EventEnvelope;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_next_envelope(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Ok(mut subscribers) = self.bus.subscribers.lock() {
            subscribers.remove(&self.id);
        }
    }
}
