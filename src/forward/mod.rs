//! Forward sink: relays chat text to a remote chat service.
//!
//! The router pushes onto a [`ForwardQueue`]; a single consumer task pops,
//! rate limits and hands each message to a [`ForwardSink`] addressed at the
//! current [`ForwardTarget`]. The target is read at send time, so a change
//! applies to every message still queued.

pub mod discord;
pub mod rate_limit;

use async_trait::async_trait;
use rate_limit::{RateLimitError, RateLimiter};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use discord::DiscordForwarder;

/// Unbounded FIFO of outbound messages that can be emptied without sending.
#[derive(Debug, Clone, Default)]
pub struct ForwardQueue {
    items: Arc<Mutex<VecDeque<String>>>,
    notify: Arc<Notify>,
}

impl ForwardQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Never blocks.
    pub fn push(&self, text: impl Into<String>) {
        match self.items.lock() {
            Ok(mut items) => items.push_back(text.into()),
            Err(e) => {
                warn!(error = %e, "forward queue lock poisoned; message dropped");
                return;
            }
        }
        self.notify.notify_one();
    }

    /// Drop everything queued. Returns how many messages were discarded.
    pub fn clear(&self) -> usize {
        self.items
            .lock()
            .map(|mut items| {
                let n = items.len();
                items.clear();
                n
            })
            .unwrap_or(0)
    }

    /// Messages waiting to be sent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_pop(&self) -> Option<String> {
        self.items.lock().ok()?.pop_front()
    }

    /// Wait for the next message.
    pub async fn next(&self) -> String {
        loop {
            if let Some(text) = self.try_pop() {
                return text;
            }
            self.notify.notified().await;
        }
    }
}

/// Last-write-wins cell holding the current destination id.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    cell: Arc<watch::Sender<Option<String>>>,
}

impl ForwardTarget {
    /// Cell starting at `initial`.
    #[must_use]
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { cell: Arc::new(tx) }
    }

    /// Replace the destination.
    pub fn set(&self, id: impl Into<String>) {
        let id = id.into();
        info!(target_id = %id, "forward target changed");
        self.cell.send_replace(Some(id));
    }

    /// Current target, read at send time.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.cell.borrow().clone()
    }

    /// Observe changes, e.g. to persist the new destination.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.cell.subscribe()
    }
}

/// Remote service the forward consumer delivers to.
#[async_trait]
pub trait ForwardSink: Send + Sync {
    /// Stable service identifier (e.g. `discord`).
    fn id(&self) -> &'static str;

    /// Deliver `text` to `target`.
    async fn send(&self, target: &str, text: &str) -> anyhow::Result<()>;
}

/// Pop, rate limit and deliver messages until `cancel` fires.
///
/// Messages popped while no target is set are dropped with a warning.
/// Delivery failures are logged and not retried.
pub async fn run_forward_consumer(
    queue: ForwardQueue,
    target: ForwardTarget,
    sink: Arc<dyn ForwardSink>,
    mut limiter: RateLimiter,
    cancel: CancellationToken,
) {
    info!(sink = sink.id(), "forward consumer started");
    loop {
        let text = tokio::select! {
            _ = cancel.cancelled() => break,
            text = queue.next() => text,
        };

        let Some(destination) = target.get() else {
            warn!(sink = sink.id(), "no forward target set; message dropped");
            continue;
        };

        while let Err(RateLimitError::Exceeded { retry_after }) = limiter.try_send() {
            debug!(retry_ms = retry_after.as_millis() as u64, "forward rate limited");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("forward consumer cancelled");
                    return;
                }
                _ = tokio::time::sleep(retry_after) => {}
            }
        }

        if let Err(e) = sink.send(&destination, &text).await {
            warn!(sink = sink.id(), target_id = %destination, error = %e, "forward send failed");
        }
    }
    info!("forward consumer cancelled");
}
