//! Connection Supervisor
//!
//! Owns the lifecycle of the single streaming connection:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Subscribing → Streaming
//!       ^                                                       |
//!       +------------------- Failed | Closing <-----------------+
//! ```
//!
//! Each cycle opens a socket, obtains an approval key, subscribes every
//! configured symbol in turn and then dispatches frames to the decoder
//! until the connection breaks. The loop retries with backoff for as long
//! as the cancellation token is live. A failure on an established session
//! discards the cached approval key so the next cycle re-authenticates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::Authenticator;
use super::codec::FrameDecoder;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::build_subscribe_message;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ApprovalKey, AuthError, TickSource};
use crate::application::services::{FeedStatus, IngestionBridge};
use crate::domain::streaming::ConnectionState;
use crate::domain::tick::Symbol;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a connection cycle.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The socket could not be opened.
    #[error("connection to {url} failed: {reason}")]
    Connect {
        /// Endpoint URL
        url: String,
        /// Failure reason
        reason: String,
    },

    /// The socket did not open in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No approval key could be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A subscribe request could not be sent.
    #[error("subscribe for {symbol} failed: {reason}")]
    Subscribe {
        /// Symbol being subscribed
        symbol: Symbol,
        /// Failure reason
        reason: String,
    },

    /// Transport error on an open connection.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// No inbound traffic within the pong timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,
}

impl SupervisorError {
    /// Whether an established session broke.
    ///
    /// Such failures invalidate the cached approval key.
    #[must_use]
    pub const fn breaks_session(&self) -> bool {
        matches!(
            self,
            Self::Subscribe { .. } | Self::WebSocket(_) | Self::HeartbeatTimeout | Self::Closed
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the live feed.
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    /// Streaming endpoint URL.
    pub url: String,
    /// Symbols subscribed on every connection.
    pub symbols: Vec<Symbol>,
    /// Socket open timeout.
    pub connect_timeout: Duration,
    /// Pause between obtaining the key and the first subscribe.
    pub subscribe_warmup: Duration,
    /// Pause between successive subscribe sends.
    pub subscribe_delay: Duration,
    /// Keepalive configuration.
    pub heartbeat: HeartbeatConfig,
    /// Backoff between cycles.
    pub reconnect: ReconnectConfig,
}

impl LiveFeedConfig {
    /// Build from stream settings.
    #[must_use]
    pub fn from_settings(
        url: impl Into<String>,
        symbols: Vec<Symbol>,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            url: url.into(),
            symbols,
            connect_timeout: settings.connect_timeout,
            subscribe_warmup: settings.subscribe_warmup,
            subscribe_delay: settings.subscribe_delay,
            heartbeat: HeartbeatConfig::from_settings(settings),
            reconnect: ReconnectConfig::from_settings(settings),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One open connection. Never reused across cycles.
struct Session {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    approval_key: Option<ApprovalKey>,
    connected: bool,
}

impl Session {
    fn new(stream: WsStream) -> Self {
        let (write, read) = stream.split();
        Self {
            write,
            read,
            approval_key: None,
            connected: true,
        }
    }

    async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let close = async {
            let _ = self.write.send(Message::Close(None)).await;
            let _ = self.write.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
            tracing::debug!("Close handshake timed out");
        }
    }
}

// =============================================================================
// Live Feed
// =============================================================================

/// Live tick source backed by the KIS streaming connection.
pub struct LiveFeed {
    config: LiveFeedConfig,
    authenticator: Authenticator,
    decoder: FrameDecoder,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("config", &self.config)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

impl LiveFeed {
    /// Create a live feed.
    #[must_use]
    pub const fn new(
        config: LiveFeedConfig,
        authenticator: Authenticator,
        decoder: FrameDecoder,
        status: Arc<FeedStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            authenticator,
            decoder,
            status,
            cancel,
        }
    }

    /// Shared status of this feed.
    #[must_use]
    pub const fn status(&self) -> &Arc<FeedStatus> {
        &self.status
    }

    /// Run connection cycles until cancelled.
    pub async fn run_until_cancelled(&self, bridge: &IngestionBridge) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.run_session(bridge, &mut policy).await {
                tracing::warn!(error = %e, "Streaming session failed");
                self.status.set_error(e.to_string());
                self.status.set_state(ConnectionState::Failed);
                if e.breaks_session() {
                    self.authenticator.invalidate();
                }
            }
            self.status.set_state(ConnectionState::Disconnected);
            self.status.set_subscribed_symbols(0);

            if self.cancel.is_cancelled() {
                break;
            }

            let delay = policy.next_delay();
            self.status.increment_reconnect_attempts();
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to KIS stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Live feed stopped");
    }

    /// One connection cycle. `Ok` means cancelled.
    async fn run_session(
        &self,
        bridge: &IngestionBridge,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SupervisorError> {
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to KIS stream");

        let stream = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(
                self.config.connect_timeout,
                tokio_tungstenite::connect_async(self.config.url.as_str()),
            ) => match result {
                Err(_) => return Err(SupervisorError::ConnectTimeout(self.config.connect_timeout)),
                Ok(Err(e)) => {
                    return Err(SupervisorError::Connect {
                        url: self.config.url.clone(),
                        reason: e.to_string(),
                    });
                }
                Ok(Ok((stream, _response))) => stream,
            },
        };

        let mut session = Session::new(stream);
        let result = self.drive(&mut session, bridge, policy).await;
        if result.is_ok() {
            self.status.set_state(ConnectionState::Closing);
        }
        session.close().await;
        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        bridge: &IngestionBridge,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SupervisorError> {
        self.status.set_state(ConnectionState::Authenticating);
        let key = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            key = self.authenticator.approval_key() => key?,
        };
        session.approval_key = Some(key);

        self.status.set_state(ConnectionState::Subscribing);
        if !self.pump_for(session, bridge, self.config.subscribe_warmup).await? {
            return Ok(());
        }
        if !self.drive_subscriptions(session, bridge).await? {
            return Ok(());
        }

        self.status.set_state(ConnectionState::Streaming);
        policy.reset();
        tracing::info!(
            symbols = self.config.symbols.len(),
            "KIS stream established"
        );

        self.stream(session, bridge).await
    }

    /// Send one subscribe request per symbol.
    ///
    /// Returns `false` if cancelled part way.
    async fn drive_subscriptions(
        &self,
        session: &mut Session,
        bridge: &IngestionBridge,
    ) -> Result<bool, SupervisorError> {
        let Some(key) = session.approval_key.clone() else {
            return Err(AuthError::MissingKey.into());
        };

        for (index, symbol) in self.config.symbols.iter().enumerate() {
            if index > 0 && !self.pump_for(session, bridge, self.config.subscribe_delay).await? {
                return Ok(false);
            }
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            if !session.connected {
                return Err(SupervisorError::Subscribe {
                    symbol: symbol.clone(),
                    reason: "connection lost".to_string(),
                });
            }

            let json = build_subscribe_message(&key, symbol)
                .to_json()
                .map_err(|e| SupervisorError::Subscribe {
                    symbol: symbol.clone(),
                    reason: format!("failed to serialize subscribe: {e}"),
                })?;

            if let Err(e) = session.write.send(Message::Text(json.into())).await {
                session.connected = false;
                return Err(SupervisorError::Subscribe {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                });
            }

            self.status.set_subscribed_symbols(index + 1);
            tracing::debug!(symbol = %symbol, "Sent subscribe request");
        }

        Ok(true)
    }

    /// Dispatch inbound frames for `duration`. Returns `false` if cancelled.
    async fn pump_for(
        &self,
        session: &mut Session,
        bridge: &IngestionBridge,
        duration: Duration,
    ) -> Result<bool, SupervisorError> {
        if duration.is_zero() {
            // Drain what is already buffered so a close is seen before the next send.
            while let Some(msg) = session.read.next().now_or_never() {
                self.handle_message(session, bridge, msg, None).await?;
            }
            return Ok(!self.cancel.is_cancelled());
        }

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(false),
                () = &mut deadline => return Ok(true),
                msg = session.read.next() => {
                    self.handle_message(session, bridge, msg, None).await?;
                }
            }
        }
    }

    /// Dispatch frames with a running heartbeat until the connection ends.
    async fn stream(
        &self,
        session: &mut Session,
        bridge: &IngestionBridge,
    ) -> Result<(), SupervisorError> {
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        heartbeat_state.mark_ping_sent();
                        session.write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    HeartbeatEvent::Timeout => {
                        return Err(SupervisorError::HeartbeatTimeout);
                    }
                },
                msg = session.read.next() => {
                    self.handle_message(session, bridge, msg, Some(&heartbeat_state)).await?;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        session: &mut Session,
        bridge: &IngestionBridge,
        msg: Option<Result<Message, tungstenite::Error>>,
        heartbeat: Option<&HeartbeatState>,
    ) -> Result<(), SupervisorError> {
        match msg {
            Some(Ok(Message::Text(text))) => {
                if let Some(state) = heartbeat {
                    state.record_activity();
                }
                self.dispatch(text.as_str(), bridge).await;
                Ok(())
            }
            Some(Ok(Message::Pong(_))) => {
                if let Some(state) = heartbeat {
                    state.record_activity();
                }
                Ok(())
            }
            Some(Ok(Message::Ping(data))) => {
                session.write.send(Message::Pong(data)).await?;
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "Server sent close frame");
                session.connected = false;
                Err(SupervisorError::Closed)
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(len = data.len(), "Ignoring binary frame");
                Ok(())
            }
            Some(Ok(Message::Frame(_))) => Ok(()),
            Some(Err(e)) => {
                session.connected = false;
                Err(e.into())
            }
            None => {
                tracing::info!("WebSocket stream ended");
                session.connected = false;
                Err(SupervisorError::Closed)
            }
        }
    }

    async fn dispatch(&self, text: &str, bridge: &IngestionBridge) {
        let started = Instant::now();
        self.status.increment_frames();
        metrics::record_frame_received();

        if let Some(record) = self.decoder.decode(text) {
            bridge.emit(&record).await;
            self.status.increment_ticks();
        }

        metrics::record_processing_duration(started.elapsed());
    }
}

#[async_trait]
impl TickSource for LiveFeed {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn run(&self, bridge: Arc<IngestionBridge>) {
        self.run_until_cancelled(&bridge).await;
    }
}
