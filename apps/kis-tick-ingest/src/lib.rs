#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! KIS Tick Ingest - Real-time Tick Ingestion Daemon
//!
//! Maintains a single streaming connection to the KIS real-time feed,
//! decodes contract-price frames into tick records, enriches them with
//! reference data and fans them out to a publish sink and a bounded
//! in-process queue. A synthetic source produces the same records without
//! a live feed.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Tick records and connection states
//!   - `tick`: `TickRecord`, `CompanyRef`, trading value rule
//!   - `streaming`: connection lifecycle states
//!
//! - **Application**: Ports and pipeline services
//!   - `ports`: reference lookup, publish sink, approval provider, tick source
//!   - `services`: ingestion bridge, consumer queue, feed status
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kis`: approval client, frame codec, connection supervisor
//!   - `synthetic`: randomized tick source and server-push stream
//!   - `reference`: in-memory reference data
//!   - `sink`: log sink and in-process topic bus
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! KIS WS ──► Supervisor ──► FrameDecoder ──┐
//!                            (+ lookup)    │     ┌──► PublishSink
//!                                          ├──►  │
//! SyntheticFeed ───────────────────────────┘     └──► TickQueue ──► consumer
//!                                  IngestionBridge
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core tick types with no I/O.
pub mod domain;

/// Application layer - Ports and pipeline services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::ConnectionState;
pub use domain::tick::{CompanyRef, Symbol, TickRecord};

// Ports and services
pub use application::ports::{
    ApprovalKey, ApprovalProvider, AuthError, PublishError, PublishSink, ReferenceLookup,
    TickSource,
};
pub use application::services::{BridgeConfig, EmitReport, FeedStatus, IngestionBridge, TickQueue};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig, StreamSettings, TickSourceKind};

// Tick sources
pub use infrastructure::kis::{LiveFeed, LiveFeedConfig};
pub use infrastructure::synthetic::{SyntheticFeed, server_push_stream};

// Adapters
pub use infrastructure::reference::{InMemoryReferenceLookup, ReferenceError};
pub use infrastructure::sink::{LogSink, TopicBus};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
