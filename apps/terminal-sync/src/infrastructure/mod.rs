//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus configuration and telemetry.

/// Environment-variable configuration.
pub mod config;

/// Provisioning API client.
pub mod provisioning;

/// Logging and tracing initialization.
pub mod telemetry;

/// WebSocket terminal transport adapter.
pub mod transport;
