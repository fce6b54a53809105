//! Port Interfaces
//!
//! Contracts for the external collaborators this crate consumes but
//! does not implement: the account-provisioning API and the remote
//! terminal synchronization transport. Infrastructure adapters (and
//! test fakes) implement these traits; the services layer depends only
//! on the contracts.
//!
//! The [`SynchronizationListener`] capability set also lives here: it
//! is the inbound contract through which consumers observe stream
//! events. Every handler has a default no-op body, so implementors
//! override only the capabilities they care about.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::account::{AccountId, AccountStatus};
use crate::domain::events::{
    AccountInformation, Book, Candle, EventEnvelope, InstanceIndex, Order, Position, StreamCommand,
    Symbol, SymbolPrice, Tick,
};
use crate::domain::subscription::MarketDataSubscription;

// =============================================================================
// Provisioning
// =============================================================================

/// Errors returned by the provisioning API.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The account id is unknown to the provisioning API.
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// The provisioning API rejected or failed the request.
    #[error("provisioning API error: {0}")]
    Api(String),
}

/// Contract of the account-provisioning API.
///
/// Deploy/undeploy are asynchronous on the remote side: they start a
/// transition and return; completion is observed through status reads
/// and status events on the stream.
#[async_trait]
pub trait ProvisioningPort: Send + Sync {
    /// Start deploying the terminal process backing an account.
    async fn deploy(&self, account: &AccountId) -> Result<(), ProvisioningError>;

    /// Start undeploying the terminal process backing an account.
    async fn undeploy(&self, account: &AccountId) -> Result<(), ProvisioningError>;

    /// Read the current deployment and connectivity status.
    async fn fetch_status(&self, account: &AccountId) -> Result<AccountStatus, ProvisioningError>;
}

// =============================================================================
// Transport
// =============================================================================

/// Errors returned by the synchronization transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Establishing the session failed.
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),

    /// The session is no longer usable.
    #[error("transport session closed")]
    Closed,
}

/// Resume marker: the last event observed before a disconnect.
///
/// Passed back to the transport on reconnect so the remote can resume
/// the event stream instead of re-sending full state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Instance the marker belongs to.
    pub instance: InstanceIndex,
    /// Highest sequence number observed on that instance.
    pub sequence: u64,
}

/// One established terminal session.
///
/// Commands flow in through `commands`; envelopes flow out through
/// `events`. The transport closes the event channel when the session
/// dies, which the stream supervisor treats as a disconnect.
#[derive(Debug)]
pub struct TransportSession {
    /// Outbound command channel into the session.
    pub commands: mpsc::Sender<StreamCommand>,
    /// Inbound event channel out of the session.
    pub events: mpsc::Receiver<EventEnvelope>,
}

/// Contract of the remote terminal synchronization transport.
#[async_trait]
pub trait TerminalTransport: Send + Sync {
    /// Open a session for an account.
    ///
    /// With a [`ResumePoint`] the remote resumes event delivery past the
    /// marker; without one it performs a full state transfer.
    async fn connect(
        &self,
        account: &AccountId,
        resume: Option<ResumePoint>,
    ) -> Result<TransportSession, TransportError>;
}

// =============================================================================
// Synchronization Listener
// =============================================================================

/// Error raised by a listener handler.
///
/// A failing listener is recorded and skipped; it never aborts the
/// stream or delivery to subsequent listeners.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Create a listener error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type of listener handlers.
pub type ListenerResult = Result<(), ListenerError>;

/// Observer capability set for synchronization stream events.
///
/// All handlers default to no-ops; implement only what you need. Within
/// one instance index, handlers are invoked in event arrival order.
#[async_trait]
#[allow(unused_variables)]
pub trait SynchronizationListener: Send + Sync {
    /// A subscribed symbol's price changed.
    async fn on_symbol_price_updated(
        &self,
        instance: InstanceIndex,
        price: &SymbolPrice,
    ) -> ListenerResult {
        Ok(())
    }

    /// Candles were updated for a subscribed symbol.
    async fn on_candles_updated(
        &self,
        instance: InstanceIndex,
        candles: &[Candle],
    ) -> ListenerResult {
        Ok(())
    }

    /// Ticks arrived for a subscribed symbol.
    async fn on_ticks_updated(&self, instance: InstanceIndex, ticks: &[Tick]) -> ListenerResult {
        Ok(())
    }

    /// Order books were updated for a subscribed symbol.
    async fn on_books_updated(&self, instance: InstanceIndex, books: &[Book]) -> ListenerResult {
        Ok(())
    }

    /// The server reduced a subscription due to rate limits.
    async fn on_subscription_downgraded(
        &self,
        instance: InstanceIndex,
        symbol: &Symbol,
        updates: &[MarketDataSubscription],
    ) -> ListenerResult {
        Ok(())
    }

    /// Account information was refreshed.
    async fn on_account_information_updated(
        &self,
        instance: InstanceIndex,
        account_information: &AccountInformation,
    ) -> ListenerResult {
        Ok(())
    }

    /// The open position set was replaced wholesale.
    async fn on_positions_replaced(
        &self,
        instance: InstanceIndex,
        positions: &[Position],
    ) -> ListenerResult {
        Ok(())
    }

    /// A position was created or modified.
    async fn on_position_updated(
        &self,
        instance: InstanceIndex,
        position: &Position,
    ) -> ListenerResult {
        Ok(())
    }

    /// A position was closed.
    async fn on_position_removed(
        &self,
        instance: InstanceIndex,
        position_id: &str,
    ) -> ListenerResult {
        Ok(())
    }

    /// The open order set was replaced wholesale.
    async fn on_orders_replaced(&self, instance: InstanceIndex, orders: &[Order]) -> ListenerResult {
        Ok(())
    }

    /// An order was created or modified.
    async fn on_order_updated(&self, instance: InstanceIndex, order: &Order) -> ListenerResult {
        Ok(())
    }

    /// An order was filled or cancelled.
    async fn on_order_removed(&self, instance: InstanceIndex, order_id: &str) -> ListenerResult {
        Ok(())
    }

    /// An instance completed a full state transfer.
    async fn on_synchronized(&self, instance: InstanceIndex) -> ListenerResult {
        Ok(())
    }

    /// The stream established a terminal session.
    async fn on_connected(&self, instance: InstanceIndex) -> ListenerResult {
        Ok(())
    }

    /// The stream lost its terminal session.
    async fn on_disconnected(&self, instance: InstanceIndex) -> ListenerResult {
        Ok(())
    }
}
