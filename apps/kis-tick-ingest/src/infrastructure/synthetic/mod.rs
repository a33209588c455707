//! Synthetic Feed
//!
//! Randomized ticks sharing the live path's record contract, for demos,
//! tests and running without a live feed. Two modes:
//!
//! - [`SyntheticFeed`]: a `TickSource` emitting one record per symbol every
//!   interval into the ingestion bridge
//! - [`server_push_stream`]: a stream of `data: <json>\n\n` events for a
//!   direct streaming consumer, bypassing the bridge

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Timelike};
use futures_util::{Stream, StreamExt, stream};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ReferenceLookup, TickSource};
use crate::application::services::{FeedStatus, IngestionBridge};
use crate::domain::streaming::ConnectionState;
use crate::domain::tick::{self, Symbol, TickRecord};
use crate::infrastructure::metrics;

/// Generate one randomized record per symbol, timestamped now.
///
/// Reference data is attached when the lookup resolves the symbol and left
/// null otherwise.
#[must_use]
pub fn generate(symbols: &[Symbol], lookup: &dyn ReferenceLookup) -> Vec<TickRecord> {
    let now = now_to_second();
    let mut rng = rand::rng();
    symbols
        .iter()
        .map(|symbol| {
            metrics::record_synthetic_tick();
            tick::random_tick(&mut rng, symbol, lookup.lookup(symbol), now)
        })
        .collect()
}

fn now_to_second() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

// =============================================================================
// Repeating Task
// =============================================================================

/// Synthetic tick source feeding the ingestion bridge.
pub struct SyntheticFeed {
    symbols: Vec<Symbol>,
    lookup: Arc<dyn ReferenceLookup>,
    interval: Duration,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SyntheticFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticFeed")
            .field("symbols", &self.symbols)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl SyntheticFeed {
    /// Create a synthetic feed.
    #[must_use]
    pub fn new(
        symbols: Vec<Symbol>,
        lookup: Arc<dyn ReferenceLookup>,
        interval: Duration,
        status: Arc<FeedStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            symbols,
            lookup,
            interval: interval.max(Duration::from_millis(1)),
            status,
            cancel,
        }
    }

    /// Emit ticks into the bridge until cancelled.
    pub async fn run_until_cancelled(&self, bridge: &IngestionBridge) {
        self.status.set_subscribed_symbols(self.symbols.len());
        self.status.set_state(ConnectionState::Streaming);
        tracing::info!(
            symbols = self.symbols.len(),
            interval_ms = self.interval.as_millis(),
            "Synthetic feed started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for record in generate(&self.symbols, self.lookup.as_ref()) {
                        bridge.emit(&record).await;
                        self.status.increment_ticks();
                    }
                }
            }
        }

        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Synthetic feed stopped");
    }
}

#[async_trait]
impl TickSource for SyntheticFeed {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn run(&self, bridge: Arc<IngestionBridge>) {
        self.run_until_cancelled(&bridge).await;
    }
}

// =============================================================================
// Server-Push Stream
// =============================================================================

/// Default cadence of [`server_push_stream`]. The bridge-fed
/// [`SyntheticFeed`] runs on its own, faster interval.
pub const DEFAULT_SERVER_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Stream of server-push events, one per symbol every `interval`.
///
/// Ends only when `cancel` fires or the consumer drops the stream.
pub fn server_push_stream(
    symbols: Vec<Symbol>,
    lookup: Arc<dyn ReferenceLookup>,
    interval: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = String> + Send + 'static {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    IntervalStream::new(ticker)
        .flat_map(move |_| {
            let events: Vec<String> = generate(&symbols, lookup.as_ref())
                .iter()
                .filter_map(|record| match record.to_server_push_event() {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::error!(
                            symbol = %record.symbol,
                            error = %e,
                            "Failed to format event"
                        );
                        None
                    }
                })
                .collect();
            stream::iter(events)
        })
        .take_until(cancel.cancelled_owned())
}
