//! Terminal Connection Facade
//!
//! Ties the per-account pieces together: the supervised stream, the
//! terminal state cache, subscription tracking, listener dispatch and
//! the trade gateway. This is the surface consumers drive; everything
//! underneath stays composable for tests.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{SynchronizationListener, TerminalTransport};
use crate::application::services::dispatch::{ListenerDispatch, ListenerId};
use crate::application::services::lifecycle::AccountLifecycleManager;
use crate::application::services::stream::{
    StreamConfig, StreamError, StreamState, SubscribeError, SynchronizationStream,
};
use crate::application::services::trade::{OrderResult, TradeSubmitError};
use crate::domain::events::TradeRequest;
use crate::domain::subscription::{MarketDataSubscription, SubscriptionManager};
use crate::domain::terminal::TerminalStateCache;

/// One account's live connection to its remote terminal.
pub struct TerminalConnection {
    lifecycle: Arc<AccountLifecycleManager>,
    cache: Arc<TerminalStateCache>,
    subscriptions: Arc<SubscriptionManager>,
    dispatch: Arc<ListenerDispatch>,
    stream: SynchronizationStream,
}

impl TerminalConnection {
    /// Wire up a connection for the lifecycle manager's account.
    ///
    /// The connection is inert until [`Self::open`] is called.
    #[must_use]
    pub fn new(
        lifecycle: Arc<AccountLifecycleManager>,
        transport: Arc<dyn TerminalTransport>,
        config: StreamConfig,
    ) -> Self {
        let cache = Arc::new(TerminalStateCache::new());
        let subscriptions = Arc::new(SubscriptionManager::new());
        let dispatch = Arc::new(ListenerDispatch::new());

        let stream = SynchronizationStream::new(
            lifecycle.account().clone(),
            transport,
            Arc::clone(&cache),
            Arc::clone(&subscriptions),
            Arc::clone(&dispatch),
            Arc::clone(&lifecycle),
            config,
        );

        Self {
            lifecycle,
            cache,
            subscriptions,
            dispatch,
            stream,
        }
    }

    /// The lifecycle manager driving this connection's account.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<AccountLifecycleManager> {
        &self.lifecycle
    }

    /// Open the stream and start synchronizing.
    pub fn open(&self) {
        self.stream.open();
    }

    /// Close the stream; background tasks stop before this returns.
    pub async fn close(&self) {
        self.stream.close().await;
    }

    /// Current connection state of the stream.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    /// Register a listener for stream events.
    pub fn add_listener(&self, listener: Arc<dyn SynchronizationListener>) -> ListenerId {
        self.dispatch.add_listener(listener)
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.dispatch.remove_listener(id);
    }

    /// The locally cached terminal state.
    #[must_use]
    pub fn terminal_state(&self) -> Arc<TerminalStateCache> {
        Arc::clone(&self.cache)
    }

    /// The acknowledged market data subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscriptions)
    }

    /// Wait until the terminal state is fully synchronized.
    pub async fn wait_synchronized(&self, timeout: Duration) -> Result<(), StreamError> {
        self.stream.wait_synchronized(timeout).await
    }

    /// Subscribe a symbol to market data.
    ///
    /// The requested kinds are merged with any already-acknowledged
    /// subscription for the symbol; the returned set is the one the
    /// server actually granted (which may be a downgrade).
    pub async fn subscribe_to_market_data(
        &self,
        symbol: &str,
        requested: &[MarketDataSubscription],
    ) -> Result<Vec<MarketDataSubscription>, SubscribeError> {
        self.stream.subscribe(symbol, requested).await
    }

    /// Remove every market data subscription for a symbol.
    pub async fn unsubscribe_from_market_data(&self, symbol: &str) -> Result<(), SubscribeError> {
        self.stream.unsubscribe(symbol).await
    }

    /// Submit an order and await the broker's correlated response.
    pub async fn submit_order(&self, request: TradeRequest) -> Result<OrderResult, TradeSubmitError> {
        self.stream.trades().submit_order(request).await
    }
}
