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

//! Terminal Sync - Remote Terminal Synchronization SDK
//!
//! Maintains a supervised duplex connection to a remote trading
//! terminal, mirrors its state into a locally cached snapshot, and
//! routes subscription and trade commands upstream with correlated
//! responses.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical state types with no IO
//!   - `account`: Deployment and broker-connectivity state
//!   - `events`: Synchronization event and command model
//!   - `subscription`: Market data subscription tracking
//!   - `terminal`: Local mirror of the remote terminal state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Provisioning/transport contracts, listener capability set
//!   - `services`: Lifecycle, stream supervision, dispatch, trading
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `transport`: WebSocket terminal transport
//!   - `provisioning`: Provisioning REST client
//!   - `config`: Environment-variable configuration
//!   - `telemetry`: Tracing initialization
//!
//! # Data Flow
//!
//! ```text
//! Provisioning API ──► Lifecycle Manager ─┐
//!                                         │ status
//! Remote Terminal ◄──── commands ─────┐   ▼
//!        │                       ┌──────────────┐     ┌───────────┐
//!        └──── events ──────────►│ Sync Stream  │────►│   Cache   │──► snapshot reads
//!                                │  Supervisor  │     └───────────┘
//!                                └──────┬───────┘     ┌───────────┐
//!                                       └────────────►│ Dispatch  │──► listeners
//!                                                     └───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core terminal state types with no IO dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::account::{AccountId, AccountStatus, ConnectionStatus, DeploymentState};
pub use domain::events::{
    AccountInformation, AccountMetrics, Book, BookEntry, BookSide, Candle, EventEnvelope,
    InstanceIndex, Order, OrderKind, Position, StreamCommand, Symbol, SymbolPrice,
    SymbolSpecification, SyncEvent, Tick, TradeRequest, TradeResponsePayload, TradeSide,
};
pub use domain::subscription::{MarketDataSubscription, SubscriptionManager};
pub use domain::terminal::{TerminalSnapshot, TerminalStateCache};

// Ports (for adapters and test fakes)
pub use application::ports::{
    ListenerError, ListenerResult, ProvisioningError, ProvisioningPort, ResumePoint,
    SynchronizationListener, TerminalTransport, TransportError, TransportSession,
};

// Services
pub use application::services::connection::TerminalConnection;
pub use application::services::dispatch::{ListenerDispatch, ListenerId};
pub use application::services::lifecycle::{AccountLifecycleManager, LifecycleError};
pub use application::services::reconnect::BackoffConfig;
pub use application::services::stream::{
    StreamConfig, StreamError, StreamState, SubscribeError, SynchronizationStream,
};
pub use application::services::trade::{OrderResult, TradeError, TradeGateway, TradeSubmitError};

// Infrastructure config
pub use infrastructure::config::{AuthToken, ConfigError, SdkConfig, StreamSettings, WaitSettings};

// Adapters
pub use infrastructure::provisioning::ProvisioningClient;
pub use infrastructure::transport::WebSocketTransport;
