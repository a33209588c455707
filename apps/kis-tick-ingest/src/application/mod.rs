//! Application Layer - Ports and pipeline services.
//!
//! Defines the contracts the pipeline depends on (reference lookup,
//! publish sink, approval provider, tick source) and the services that
//! sit between a tick source and its consumers.

/// Port definitions (driven and driver interfaces).
pub mod ports;

/// Pipeline services (ingestion bridge, consumer queue, feed status).
pub mod services;
