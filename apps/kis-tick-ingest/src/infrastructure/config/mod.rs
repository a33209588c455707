//! Configuration Module
//!
//! Configuration loading for the ingestion daemon.

mod settings;

pub use settings::{
    BridgeSettings, ConfigError, DEFAULT_REST_URL, DEFAULT_WS_URL, IngestConfig, StreamSettings,
    TickSourceKind, parse_symbols,
};
