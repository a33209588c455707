//! KIS Streaming Adapter
//!
//! Live tick source for the Korea Investment real-time feed:
//!
//! - `auth`: approval key exchange and caching
//! - `messages`: subscribe requests and control frames
//! - `codec`: data frame decoding
//! - `heartbeat` / `reconnect`: connection health and backoff
//! - `supervisor`: the connection lifecycle

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod supervisor;

pub use auth::{Authenticator, Credentials, KisApprovalClient};
pub use codec::{Frame, FrameDecoder, FrameError};
pub use messages::{ControlFrame, SubscribeMessage, build_subscribe_message};
pub use supervisor::{LiveFeed, LiveFeedConfig, SupervisorError};
