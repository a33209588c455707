//! Connection Keepalive
//!
//! A background task asks the read loop to ping on a fixed interval. Any
//! inbound frame counts as proof of life; a ping left unanswered for longer
//! than the pong timeout ends the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Floor for the ping period; `tokio::time::interval` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Keepalive timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated while a ping is outstanding.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(60))
    }
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Keepalive timing from stream settings.
    #[must_use]
    pub const fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(settings.ping_interval, settings.pong_timeout)
    }
}

/// Request from the keepalive task to the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write a ping frame.
    SendPing,
    /// The peer went silent; drop the session.
    Timeout,
}

/// Activity clock shared by the read loop and the keepalive task.
#[derive(Debug)]
pub struct HeartbeatState {
    epoch: Instant,
    last_seen_ms: AtomicU64,
    ping_outstanding: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Start the clock with the peer considered alive now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            ping_outstanding: AtomicBool::new(false),
        }
    }

    /// Note inbound traffic (a pong or any frame).
    pub fn record_activity(&self) {
        self.last_seen_ms.store(self.elapsed_ms(), Ordering::Release);
        self.ping_outstanding.store(false, Ordering::Release);
    }

    /// Note that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::Release);
    }

    /// Whether a ping is still unanswered.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.ping_outstanding.load(Ordering::Acquire)
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn silence(&self) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Decide the next keepalive step.
    #[must_use]
    pub fn evaluate(&self, pong_timeout: Duration) -> HeartbeatEvent {
        if self.is_waiting_for_pong() && self.silence() > pong_timeout {
            HeartbeatEvent::Timeout
        } else {
            HeartbeatEvent::SendPing
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Background keepalive task for one session.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a keepalive task.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Tick until cancelled, the read loop goes away, or the peer times out.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let event = self.state.evaluate(self.config.pong_timeout);
            if event == HeartbeatEvent::Timeout {
                tracing::warn!(
                    silence_ms = self.state.silence().as_millis(),
                    timeout_ms = self.config.pong_timeout.as_millis(),
                    "No response to ping"
                );
            }
            if self.event_tx.send(event).await.is_err() || event == HeartbeatEvent::Timeout {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stream_settings() {
        let config = HeartbeatConfig::default();
        let from_settings = HeartbeatConfig::from_settings(&StreamSettings::default());
        assert_eq!(config.ping_interval, from_settings.ping_interval);
        assert_eq!(config.pong_timeout, from_settings.pong_timeout);
    }

    #[test]
    fn activity_answers_outstanding_ping() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());

        state.record_activity();
        assert!(!state.is_waiting_for_pong());
        assert!(state.silence() < Duration::from_millis(100));
    }

    #[test]
    fn silence_without_outstanding_ping_is_not_a_timeout() {
        let state = HeartbeatState::new();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.evaluate(Duration::from_millis(5)), HeartbeatEvent::SendPing);
    }

    #[test]
    fn unanswered_ping_times_out() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert_eq!(state.evaluate(Duration::from_secs(1)), HeartbeatEvent::SendPing);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.evaluate(Duration::from_millis(5)), HeartbeatEvent::Timeout);
    }

    #[tokio::test]
    async fn manager_requests_pings() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_secs(1));
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone())
                .run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn zero_interval_still_pings() {
        let config = HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(1));
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone())
                .run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        drop(event_rx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn manager_stops_after_timeout() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_millis(10));
        let state = Arc::new(HeartbeatState::new());
        state.mark_ping_sent();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let handle = tokio::spawn(
            HeartbeatManager::new(config, state, event_tx, CancellationToken::new()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HeartbeatEvent::Timeout);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn manager_stops_when_read_loop_is_gone() {
        let config = HeartbeatConfig::new(Duration::from_millis(10), Duration::from_secs(1));
        let (event_tx, event_rx) = mpsc::channel(1);
        drop(event_rx);
        let handle = tokio::spawn(
            HeartbeatManager::new(
                config,
                Arc::new(HeartbeatState::new()),
                event_tx,
                CancellationToken::new(),
            )
            .run(),
        );

        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
