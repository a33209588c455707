//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// KIS streaming adapters (approval, codec, heartbeat, supervisor).
pub mod kis;

/// Synthetic tick source and server-push stream.
pub mod synthetic;

/// Reference data lookup.
pub mod reference;

/// Publish sink adapters.
pub mod sink;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
