//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: raw frames received and per-frame failures by kind
//! - **Ticks**: records published, publish failures, queue drops
//! - **Connection**: state gauge and reconnect attempts
//! - **Latency**: per-frame processing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kis_ingest_frames_received_total",
        "Total frames received from the streaming feed"
    );
    describe_counter!(
        "kis_ingest_frame_errors_total",
        "Frames dropped by the decoder, by kind"
    );
    describe_counter!(
        "kis_ingest_control_frames_total",
        "JSON control frames received (acknowledgments and others)"
    );
    describe_counter!(
        "kis_ingest_ticks_published_total",
        "Tick records accepted by the publish sink"
    );
    describe_counter!(
        "kis_ingest_publish_failures_total",
        "Tick records the publish sink rejected"
    );
    describe_counter!(
        "kis_ingest_queue_dropped_total",
        "Tick payloads dropped before reaching the consumer queue"
    );
    describe_counter!(
        "kis_ingest_synthetic_ticks_total",
        "Synthetic tick records generated"
    );
    describe_counter!(
        "kis_ingest_reconnects_total",
        "Streaming reconnection attempts"
    );
    describe_gauge!(
        "kis_ingest_connection_state",
        "Current connection state (0=disconnected .. 4=streaming, 6=failed)"
    );
    describe_histogram!(
        "kis_ingest_frame_processing_seconds",
        "Time to decode and emit a single data frame"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why a frame produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// Malformed control or data frame.
    Protocol,
    /// Numeric or time conversion failed.
    Decode,
    /// Symbol has no reference data.
    LookupMiss,
}

impl FrameErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Decode => "decode",
            Self::LookupMiss => "lookup_miss",
        }
    }
}

/// Why a payload missed the consumer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDropReason {
    /// Queue stayed full past the enqueue timeout.
    Full,
    /// Consumer end was dropped.
    Closed,
}

impl QueueDropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("kis_ingest_frames_received_total").increment(1);
}

/// Record a frame dropped by the decoder.
pub fn record_frame_error(kind: FrameErrorKind) {
    counter!("kis_ingest_frame_errors_total", "kind" => kind.as_str()).increment(1);
}

/// Record a JSON control frame.
pub fn record_control_frame(acknowledgment: bool) {
    let kind = if acknowledgment { "ack" } else { "other" };
    counter!("kis_ingest_control_frames_total", "kind" => kind).increment(1);
}

/// Record a tick accepted by the publish sink.
pub fn record_tick_published() {
    counter!("kis_ingest_ticks_published_total").increment(1);
}

/// Record a tick the publish sink rejected.
pub fn record_publish_failure() {
    counter!("kis_ingest_publish_failures_total").increment(1);
}

/// Record a payload dropped before the consumer queue.
pub fn record_queue_dropped(reason: QueueDropReason) {
    counter!("kis_ingest_queue_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record a generated synthetic tick.
pub fn record_synthetic_tick() {
    counter!("kis_ingest_synthetic_ticks_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("kis_ingest_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("kis_ingest_connection_state").set(f64::from(state.code()));
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("kis_ingest_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
