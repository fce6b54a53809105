//! Listener Dispatch
//!
//! Fans stream events out to registered [`SynchronizationListener`]s in
//! registration order. A failing listener is recorded and skipped; it
//! never prevents delivery to subsequent listeners and never aborts the
//! stream. Events of one instance index are dispatched in arrival order
//! because the stream pumps them through here sequentially.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::application::ports::SynchronizationListener;
use crate::domain::events::{EventEnvelope, InstanceIndex, SyncEvent};

/// Handle identifying a registered listener.
pub type ListenerId = u64;

/// Registration-ordered listener registry and event fan-out.
#[derive(Default)]
pub struct ListenerDispatch {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SynchronizationListener>)>>,
    next_id: AtomicU64,
}

impl ListenerDispatch {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; later registrations are invoked later.
    pub fn add_listener(&self, listener: Arc<dyn SynchronizationListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver one envelope to every registered listener.
    pub async fn dispatch(&self, envelope: &EventEnvelope) {
        let listeners: Vec<_> = self.listeners.read().clone();
        for (id, listener) in listeners {
            if let Err(error) = Self::deliver(listener.as_ref(), envelope).await {
                tracing::warn!(
                    listener = id,
                    instance = envelope.instance,
                    error = %error,
                    "Listener failed; continuing with remaining listeners"
                );
            }
        }
    }

    /// Notify listeners that a terminal session came up.
    pub async fn notify_connected(&self, instance: InstanceIndex) {
        let listeners: Vec<_> = self.listeners.read().clone();
        for (id, listener) in listeners {
            if let Err(error) = listener.on_connected(instance).await {
                tracing::warn!(listener = id, error = %error, "Listener failed on connect");
            }
        }
    }

    async fn deliver(
        listener: &dyn SynchronizationListener,
        envelope: &EventEnvelope,
    ) -> crate::application::ports::ListenerResult {
        let instance = envelope.instance;
        match &envelope.event {
            SyncEvent::PriceUpdated { price, .. } => {
                listener.on_symbol_price_updated(instance, price).await
            }
            SyncEvent::CandlesUpdated { candles, .. } => {
                listener.on_candles_updated(instance, candles).await
            }
            SyncEvent::TicksUpdated { ticks, .. } => {
                listener.on_ticks_updated(instance, ticks).await
            }
            SyncEvent::BooksUpdated { books, .. } => {
                listener.on_books_updated(instance, books).await
            }
            SyncEvent::SubscriptionDowngraded {
                symbol, updates, ..
            } => {
                listener
                    .on_subscription_downgraded(instance, symbol, updates)
                    .await
            }
            SyncEvent::AccountInformationUpdated {
                account_information,
            } => {
                listener
                    .on_account_information_updated(instance, account_information)
                    .await
            }
            SyncEvent::PositionsReplaced { positions } => {
                listener.on_positions_replaced(instance, positions).await
            }
            SyncEvent::PositionUpdated { position } => {
                listener.on_position_updated(instance, position).await
            }
            SyncEvent::PositionRemoved { position_id } => {
                listener.on_position_removed(instance, position_id).await
            }
            SyncEvent::OrdersReplaced { orders } => {
                listener.on_orders_replaced(instance, orders).await
            }
            SyncEvent::OrderUpdated { order } => listener.on_order_updated(instance, order).await,
            SyncEvent::OrderRemoved { order_id } => {
                listener.on_order_removed(instance, order_id).await
            }
            SyncEvent::Synchronized { .. } => listener.on_synchronized(instance).await,
            SyncEvent::Disconnected => listener.on_disconnected(instance).await,
            // Request/response plumbing and status transitions have no
            // listener capability; they are routed by the stream.
            SyncEvent::SpecificationsUpdated { .. }
            | SyncEvent::SubscriptionAck { .. }
            | SyncEvent::TradeResponse { .. }
            | SyncEvent::StatusChanged { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use crate::application::ports::{ListenerError, ListenerResult};
    use crate::domain::events::SymbolPrice;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    struct RecordingListener {
        name: &'static str,
        log: Arc<Recording>,
        fail: bool,
    }

    #[async_trait]
    impl SynchronizationListener for RecordingListener {
        async fn on_symbol_price_updated(
            &self,
            _instance: InstanceIndex,
            price: &SymbolPrice,
        ) -> ListenerResult {
            self.log
                .seen
                .lock()
                .push(format!("{}:{}", self.name, price.symbol));
            if self.fail {
                return Err(ListenerError::new("boom"));
            }
            Ok(())
        }

        async fn on_disconnected(&self, _instance: InstanceIndex) -> ListenerResult {
            self.log.seen.lock().push(format!("{}:disconnected", self.name));
            Ok(())
        }
    }

    fn price_envelope(symbol: &str) -> EventEnvelope {
        EventEnvelope {
            instance: 0,
            sequence: 1,
            event: SyncEvent::PriceUpdated {
                price: SymbolPrice {
                    symbol: symbol.to_string(),
                    bid: Decimal::new(11000, 4),
                    ask: Decimal::new(11002, 4),
                    time: Utc::now(),
                },
                metrics: None,
            },
        }
    }

    #[tokio::test]
    async fn listeners_run_in_registration_order() {
        let log = Arc::new(Recording::default());
        let dispatch = ListenerDispatch::new();
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "first",
            log: Arc::clone(&log),
            fail: false,
        }));
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "second",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatch.dispatch(&price_envelope("EURUSD")).await;

        assert_eq!(*log.seen.lock(), vec!["first:EURUSD", "second:EURUSD"]);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_later_ones() {
        let log = Arc::new(Recording::default());
        let dispatch = ListenerDispatch::new();
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "failing",
            log: Arc::clone(&log),
            fail: true,
        }));
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "after",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatch.dispatch(&price_envelope("EURUSD")).await;

        assert_eq!(*log.seen.lock(), vec!["failing:EURUSD", "after:EURUSD"]);
    }

    #[tokio::test]
    async fn removed_listener_is_skipped() {
        let log = Arc::new(Recording::default());
        let dispatch = ListenerDispatch::new();
        let id = dispatch.add_listener(Arc::new(RecordingListener {
            name: "gone",
            log: Arc::clone(&log),
            fail: false,
        }));
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "kept",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatch.remove_listener(id);
        dispatch.dispatch(&price_envelope("EURUSD")).await;

        assert_eq!(*log.seen.lock(), vec!["kept:EURUSD"]);
        assert_eq!(dispatch.listener_count(), 1);
    }

    #[tokio::test]
    async fn default_handlers_ignore_unobserved_events() {
        let dispatch = ListenerDispatch::new();
        let log = Arc::new(Recording::default());
        dispatch.add_listener(Arc::new(RecordingListener {
            name: "quiet",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatch
            .dispatch(&EventEnvelope {
                instance: 0,
                sequence: 1,
                event: SyncEvent::Synchronized {
                    synchronization_id: "s".to_string(),
                },
            })
            .await;

        assert!(log.seen.lock().is_empty());
    }
}
