//! Metrics for message queue observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a message queue backend.
#[derive(Debug, Default)]
pub struct MqMetrics {
    /// Total messages produced.
    pub messages_produced: AtomicU64,
    /// Total callback invocations.
    pub messages_delivered: AtomicU64,
    /// Total messages appended to a persistent backlog.
    pub messages_backlogged: AtomicU64,
    /// Total backlog messages handed to a re-attached consumer.
    pub messages_replayed: AtomicU64,
    /// Consumers currently attached.
    pub consumers: AtomicU64,
}

impl MqMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_produce(&self) {
        self.messages_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backlogged(&self) {
        self.messages_backlogged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self, count: u64) {
        self.messages_replayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn consumer_attached(&self) {
        self.consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consumer_detached(&self) {
        self.consumers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_produced: self.messages_produced.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_backlogged: self.messages_backlogged.load(Ordering::Relaxed),
            messages_replayed: self.messages_replayed.load(Ordering::Relaxed),
            consumers: self.consumers.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_produced: u64,
    pub messages_delivered: u64,
    pub messages_backlogged: u64,
    pub messages_replayed: u64,
    pub consumers: u64,
}
