//! Streaming Connection States
//!
//! Lifecycle of the persistent streaming connection as driven by the
//! connection supervisor:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Subscribing -> Streaming
//!       ^                              |               |            |
//!       |                              v               v            v
//!       +-------------------------- Failed <-------- Closing <------+
//! ```

use std::fmt;

/// State of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; the supervisor is about to (re)connect.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, obtaining an approval key.
    Authenticating,
    /// Sending per-symbol subscribe messages.
    Subscribing,
    /// Dispatching incoming frames.
    Streaming,
    /// Shutting the socket down after cancellation.
    Closing,
    /// The current connection attempt failed.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Failed => "failed",
        }
    }

    /// Numeric code used for the connection state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Authenticating => 2,
            Self::Subscribing => 3,
            Self::Streaming => 4,
            Self::Closing => 5,
            Self::Failed => 6,
        }
    }

    /// Check whether frames are currently being dispatched.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
