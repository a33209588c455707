//! Domain Layer - Core tick types and pure logic.
//!
//! This layer contains the canonical tick record and the connection
//! lifecycle states with no I/O. Everything here is plain Rust with
//! serialization support.

/// Connection lifecycle states of the streaming feed.
pub mod streaming;

/// Tick records, reference data and synthetic tick generation.
pub mod tick;
