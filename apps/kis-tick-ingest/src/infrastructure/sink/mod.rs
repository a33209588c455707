//! Publish Sink Adapters
//!
//! Implementations of `PublishSink`:
//!
//! - `LogSink`: writes each payload to the tracing log
//! - `TopicBus`: in-process per-topic fan-out over tokio broadcast channels
//!
//! An external event bus client plugs in through the same trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::application::ports::{PublishError, PublishSink};

// =============================================================================
// Log Sink
// =============================================================================

/// Publishes by logging the payload at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PublishSink for LogSink {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        tracing::debug!(topic, payload, "Published tick");
        Ok(())
    }
}

// =============================================================================
// Topic Bus
// =============================================================================

/// A payload delivered through the topic bus.
pub type BusMessage = Arc<str>;

/// In-process publish/subscribe bus keyed by topic.
///
/// Each topic owns a broadcast channel created on first use. Publishing to
/// a topic without subscribers succeeds; slow subscribers observe
/// `RecvError::Lagged` rather than blocking publishers.
///
/// ```rust
/// use kis_tick_ingest::application::ports::PublishSink;
/// use kis_tick_ingest::infrastructure::sink::TopicBus;
///
/// let bus = TopicBus::new(16);
/// let mut rx = bus.subscribe("real_time_stock_prices");
/// bus.publish("real_time_stock_prices", "{}").unwrap();
/// assert_eq!(&*rx.try_recv().unwrap(), "{}");
/// ```
#[derive(Debug)]
pub struct TopicBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    closed: AtomicBool,
}

impl TopicBus {
    /// Create a bus whose topic channels hold `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get a new receiver for a topic.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    /// Number of active receivers on a topic.
    #[must_use]
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Stop accepting publishes and drop all topic channels.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.write().clear();
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl PublishSink for TopicBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }
        // No receivers is not a failure for a fire-and-forget bus.
        let delivered = self.sender(topic).send(Arc::from(payload)).unwrap_or(0);
        tracing::trace!(topic, delivered, "Published to topic bus");
        Ok(())
    }
}
