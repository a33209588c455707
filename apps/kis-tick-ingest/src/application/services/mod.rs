//! Application Services
//!
//! - `IngestionBridge`: fans tick records out to the publish sink and the
//!   bounded consumer queue
//! - `FeedStatus`: shared connection state and counters of a tick source

mod bridge;
mod status;

pub use bridge::{BridgeConfig, EmitReport, IngestionBridge, TickQueue};
pub use status::FeedStatus;
