//! Feed Status
//!
//! Connection state and counters of the running tick source, shared
//! between the source (sole writer of the state) and the health server.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics;

/// Shared status of a tick source.
#[derive(Debug)]
pub struct FeedStatus {
    source: &'static str,
    state_tx: watch::Sender<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    subscribed_symbols: AtomicUsize,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    ticks_emitted: AtomicU64,
}

impl FeedStatus {
    /// Create a status for the named source, starting `Disconnected`.
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            source,
            state_tx,
            last_connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            subscribed_symbols: AtomicUsize::new(0),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            ticks_emitted: AtomicU64::new(0),
        }
    }

    /// Name of the source this status belongs to.
    #[must_use]
    pub const fn source(&self) -> &'static str {
        self.source
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        metrics::set_connection_state(state);
        if state == ConnectionState::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record the error that ended the last connection attempt.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the frames-received counter.
    pub fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the ticks-emitted counter.
    pub fn increment_ticks(&self) {
        self.ticks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the number of symbols subscribed on the current connection.
    pub fn set_subscribed_symbols(&self, count: usize) {
        self.subscribed_symbols.store(count, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Get the last successful connection time.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Get the last recorded error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Get reconnect attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Get frames received.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get ticks emitted into the bridge.
    #[must_use]
    pub fn ticks_emitted(&self) -> u64 {
        self.ticks_emitted.load(Ordering::Relaxed)
    }

    /// Get the subscribed symbol count.
    #[must_use]
    pub fn subscribed_symbols(&self) -> usize {
        self.subscribed_symbols.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let status = FeedStatus::new("live");
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert_eq!(status.source(), "live");
        assert!(status.last_connected_at().is_none());
    }

    #[test]
    fn streaming_resets_attempts_and_error() {
        let status = FeedStatus::new("live");
        status.increment_reconnect_attempts();
        status.increment_reconnect_attempts();
        status.set_error("connection reset".to_string());

        status.set_state(ConnectionState::Streaming);

        assert_eq!(status.reconnect_attempts(), 0);
        assert!(status.last_error().is_none());
        assert!(status.last_connected_at().is_some());
    }

    #[test]
    fn failed_keeps_error() {
        let status = FeedStatus::new("live");
        status.set_error("heartbeat timeout".to_string());
        status.set_state(ConnectionState::Failed);
        assert_eq!(status.last_error().as_deref(), Some("heartbeat timeout"));
    }

    #[tokio::test]
    async fn watchers_see_transitions() {
        let status = FeedStatus::new("live");
        let mut rx = status.subscribe();

        status.set_state(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
    }

    #[test]
    fn counters_accumulate() {
        let status = FeedStatus::new("synthetic");
        status.increment_frames();
        status.increment_ticks();
        status.increment_ticks();
        status.set_subscribed_symbols(3);

        assert_eq!(status.frames_received(), 1);
        assert_eq!(status.ticks_emitted(), 2);
        assert_eq!(status.subscribed_symbols(), 3);
    }
}
