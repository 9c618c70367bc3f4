//! Live event stream for in-process subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::config::StreamingConfig;
use crate::event::TelemetryEvent;

/// Fans tracked events out to every live subscriber. Slow subscribers
/// lose the oldest events rather than applying back-pressure to `track`.
pub struct StreamingProvider {
    sender: broadcast::Sender<TelemetryEvent>,
    published: AtomicU64,
    open: AtomicBool,
}

impl StreamingProvider {
    pub fn new(config: &StreamingConfig) -> Self {
        if config.port.is_some() {
            tracing::debug!(port = ?config.port, "streaming port ignored by in-process stream");
        }
        let (sender, _) = broadcast::channel(config.buffer_size.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
            open: AtomicBool::new(true),
        }
    }

    /// Publish an event; returns the number of subscribers that got it.
    pub fn publish(&self, event: &TelemetryEvent) -> usize {
        if !self.open.load(Ordering::Acquire) {
            return 0;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error.
        self.sender.send(event.clone()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
    }
}
