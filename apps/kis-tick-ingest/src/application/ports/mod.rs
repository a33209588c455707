//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ReferenceLookup`: resolves a symbol to its reference data
//! - `PublishSink`: fire-and-forget publish onto the event bus
//! - `ApprovalProvider`: exchanges credentials for an approval key
//!
//! ## Driver Ports (Inbound)
//!
//! - `TickSource`: a producer of tick records (live feed or synthetic)

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::services::IngestionBridge;
use crate::domain::tick::CompanyRef;

// =============================================================================
// Reference Lookup
// =============================================================================

/// Resolves a ticker symbol to `{id, name}`.
#[cfg_attr(test, mockall::automock)]
pub trait ReferenceLookup: Send + Sync {
    /// Look up reference data for a symbol.
    fn lookup(&self, symbol: &str) -> Option<CompanyRef>;
}

// =============================================================================
// Publish Sink
// =============================================================================

/// Errors returned by a publish sink.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The sink has been shut down.
    #[error("publish sink closed")]
    Closed,

    /// The sink rejected the payload.
    #[error("publish to {topic} rejected: {reason}")]
    Rejected {
        /// Target topic
        topic: String,
        /// Reason given by the sink
        reason: String,
    },
}

/// Fire-and-forget publish onto the event bus.
#[cfg_attr(test, mockall::automock)]
pub trait PublishSink: Send + Sync {
    /// Publish a serialized payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink could not accept the payload.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

// =============================================================================
// Approval Provider
// =============================================================================

/// Errors from the approval key exchange.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Credentials are missing or empty.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The token endpoint could not be reached.
    #[error("approval endpoint unreachable: {0}")]
    Unreachable(String),

    /// The token exchange did not finish in time.
    #[error("approval request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status.
    #[error("approval endpoint returned status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The response lacked a usable `approval_key`.
    #[error("approval response missing approval_key")]
    MissingKey,
}

/// Opaque short-lived approval key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApprovalKey(String);

impl ApprovalKey {
    /// Wrap a raw key, rejecting empty values.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingKey` if the key is empty.
    pub fn new(raw: impl Into<String>) -> Result<Self, AuthError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AuthError::MissingKey);
        }
        Ok(Self(raw))
    }

    /// Get the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApprovalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApprovalKey([REDACTED])")
    }
}

/// Exchanges client credentials for an approval key.
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    /// Perform one credential exchange.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the endpoint is unreachable or the response
    /// lacks the key.
    async fn obtain_approval_key(&self) -> Result<ApprovalKey, AuthError>;
}

// =============================================================================
// Tick Source
// =============================================================================

/// A producer of tick records feeding the ingestion bridge.
///
/// Implementations run until their cancellation token fires.
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Produce ticks into the bridge until cancelled.
    async fn run(&self, bridge: Arc<IngestionBridge>);
}
