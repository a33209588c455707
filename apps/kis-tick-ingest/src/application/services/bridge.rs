//! Ingestion Bridge
//!
//! The fan-out point between a tick source and the rest of the process.
//! Each record is serialized once, then
//!
//! 1. published to the sink (fire-and-forget, failures are logged only)
//! 2. enqueued on a bounded channel for in-process consumers
//!
//! When the queue is full the bridge waits up to `enqueue_timeout` and
//! then drops the payload, so a lagging consumer never stalls the feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PublishSink;
use crate::domain::tick::TickRecord;
use crate::infrastructure::metrics::{self, QueueDropReason};

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic records are published to.
    pub topic: String,
    /// Capacity of the consumer queue.
    pub queue_capacity: usize,
    /// How long to wait on a full queue before dropping.
    pub enqueue_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic: "real_time_stock_prices".to_string(),
            queue_capacity: 10_000,
            enqueue_timeout: Duration::from_millis(50),
        }
    }
}

/// Outcome of a single `emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitReport {
    /// The sink accepted the payload.
    pub published: bool,
    /// The payload was placed on the consumer queue.
    pub enqueued: bool,
}

/// Fans records out to the publish sink and the consumer queue.
pub struct IngestionBridge {
    sink: Arc<dyn PublishSink>,
    topic: String,
    queue: Option<mpsc::Sender<String>>,
    enqueue_timeout: Duration,
}

impl std::fmt::Debug for IngestionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionBridge")
            .field("topic", &self.topic)
            .field("has_queue", &self.queue.is_some())
            .field("enqueue_timeout", &self.enqueue_timeout)
            .finish_non_exhaustive()
    }
}

impl IngestionBridge {
    /// Create a bridge with a bounded consumer queue.
    ///
    /// Returns the bridge together with the consumer end of the queue.
    #[must_use]
    pub fn new(sink: Arc<dyn PublishSink>, config: BridgeConfig) -> (Self, TickQueue) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let bridge = Self {
            sink,
            topic: config.topic,
            queue: Some(tx),
            enqueue_timeout: config.enqueue_timeout,
        };
        (bridge, TickQueue { rx })
    }

    /// Create a bridge that only publishes to the sink.
    #[must_use]
    pub fn publish_only(sink: Arc<dyn PublishSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            queue: None,
            enqueue_timeout: Duration::ZERO,
        }
    }

    /// Topic records are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a record and enqueue its payload.
    ///
    /// Never fails: sink and queue problems are logged and counted.
    pub async fn emit(&self, record: &TickRecord) -> EmitReport {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(symbol = %record.symbol, error = %e, "Failed to serialize tick");
                return EmitReport::default();
            }
        };

        let published = match self.sink.publish(&self.topic, &payload) {
            Ok(()) => {
                metrics::record_tick_published();
                true
            }
            Err(e) => {
                tracing::warn!(
                    topic = %self.topic,
                    symbol = %record.symbol,
                    error = %e,
                    "Publish failed"
                );
                metrics::record_publish_failure();
                false
            }
        };

        let enqueued = match &self.queue {
            Some(queue) => self.enqueue(queue, payload, &record.symbol).await,
            None => false,
        };

        EmitReport {
            published,
            enqueued,
        }
    }

    async fn enqueue(&self, queue: &mpsc::Sender<String>, payload: String, symbol: &str) -> bool {
        match queue.send_timeout(payload, self.enqueue_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    symbol,
                    timeout_ms = self.enqueue_timeout.as_millis(),
                    "Consumer queue full, dropping tick"
                );
                metrics::record_queue_dropped(QueueDropReason::Full);
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!(symbol, "Consumer queue closed, dropping tick");
                metrics::record_queue_dropped(QueueDropReason::Closed);
                false
            }
        }
    }
}

/// Consumer end of the bridge queue. Items are serialized tick payloads.
#[derive(Debug)]
pub struct TickQueue {
    rx: mpsc::Receiver<String>,
}

impl TickQueue {
    /// Wait for the next payload, or `None` once cancelled or closed.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<String> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Take the next payload if one is ready.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Number of payloads waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no payloads are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Convert into a `Stream` of payloads.
    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<String> {
        ReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockPublishSink, PublishError};

    fn record(symbol: &str) -> TickRecord {
        TickRecord {
            id: Some(1),
            name: Some("Samsung Electronics".to_string()),
            symbol: symbol.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 2)
                .unwrap()
                .and_hms_opt(9, 44, 34)
                .unwrap(),
            open: "69800".to_string(),
            close: "70000".to_string(),
            high: "70100".to_string(),
            low: "69700".to_string(),
            rate_price: "200".to_string(),
            rate: "0.29".to_string(),
            volume: "1200".to_string(),
            trading_value: Decimal::from(84_000_000),
        }
    }

    fn accepting_sink(times: usize) -> MockPublishSink {
        let mut sink = MockPublishSink::new();
        sink.expect_publish()
            .withf(|topic, payload| {
                topic.contains("real_time_stock_prices") && payload.contains("005930")
            })
            .times(times)
            .returning(|_, _| Ok(()));
        sink
    }

    #[tokio::test]
    async fn emit_publishes_and_enqueues_same_payload() {
        let (bridge, mut queue) =
            IngestionBridge::new(Arc::new(accepting_sink(1)), BridgeConfig::default());

        let report = bridge.emit(&record("005930")).await;
        assert_eq!(
            report,
            EmitReport {
                published: true,
                enqueued: true
            }
        );

        let payload = queue.try_next().unwrap();
        assert_eq!(payload, record("005930").to_payload().unwrap());
    }

    #[tokio::test]
    async fn sink_failure_does_not_block_queue() {
        let mut sink = MockPublishSink::new();
        sink.expect_publish()
            .returning(|_, _| Err(PublishError::Closed));

        let (bridge, mut queue) = IngestionBridge::new(Arc::new(sink), BridgeConfig::default());
        let report = bridge.emit(&record("005930")).await;

        assert!(!report.published);
        assert!(report.enqueued);
        assert!(queue.try_next().is_some());
    }

    #[tokio::test]
    async fn full_queue_drops_after_timeout() {
        let config = BridgeConfig {
            queue_capacity: 1,
            enqueue_timeout: Duration::from_millis(10),
            ..BridgeConfig::default()
        };
        let (bridge, mut queue) = IngestionBridge::new(Arc::new(accepting_sink(2)), config);

        assert!(bridge.emit(&record("005930")).await.enqueued);
        let second = bridge.emit(&record("005930")).await;
        assert!(second.published);
        assert!(!second.enqueued);

        assert_eq!(queue.len(), 1);
        assert!(queue.try_next().is_some());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn closed_queue_still_publishes() {
        let (bridge, queue) =
            IngestionBridge::new(Arc::new(accepting_sink(1)), BridgeConfig::default());
        drop(queue);

        let report = bridge.emit(&record("005930")).await;
        assert!(report.published);
        assert!(!report.enqueued);
    }

    #[tokio::test]
    async fn publish_only_bridge_skips_queue() {
        let bridge =
            IngestionBridge::publish_only(Arc::new(accepting_sink(1)), "real_time_stock_prices");
        let report = bridge.emit(&record("005930")).await;
        assert!(report.published);
        assert!(!report.enqueued);
    }

    #[tokio::test]
    async fn next_returns_none_when_cancelled() {
        let (_bridge, mut queue) =
            IngestionBridge::new(Arc::new(MockPublishSink::new()), BridgeConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(queue.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn next_preserves_fifo_order() {
        let mut sink = MockPublishSink::new();
        sink.expect_publish().returning(|_, _| Ok(()));
        let (bridge, mut queue) = IngestionBridge::new(Arc::new(sink), BridgeConfig::default());

        bridge.emit(&record("005930")).await;
        bridge.emit(&record("000660")).await;

        let cancel = CancellationToken::new();
        let first = queue.next(&cancel).await.unwrap();
        let second = queue.next(&cancel).await.unwrap();
        assert!(first.contains("005930"));
        assert!(second.contains("000660"));
    }
}
