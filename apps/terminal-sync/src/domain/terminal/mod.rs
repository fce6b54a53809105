//! Terminal State Cache
//!
//! A locally held, continuously updated mirror of the remote terminal's
//! account information, open positions, open orders, symbol
//! specifications and latest prices.
//!
//! # Consistency
//!
//! Every incoming event is applied transactionally under a single update
//! lock, then a fresh immutable [`TerminalSnapshot`] handle is published.
//! Readers always observe a complete snapshot, never a partially applied
//! one, and reads are lock-free apart from cloning the handle.
//!
//! # Instances
//!
//! State is kept per terminal replica ([`InstanceIndex`]) and the
//! snapshot reflects the *active* instance: the one that completed a
//! full synchronization most recently. When two instances report the
//! same completion, the lower instance index wins. This rule is
//! deterministic; cross-instance event interleaving never changes the
//! outcome of a replayed sequence.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::domain::account::ConnectionStatus;
use crate::domain::events::{
    AccountInformation, AccountMetrics, EventEnvelope, InstanceIndex, Order, Position, Symbol,
    SymbolPrice, SymbolSpecification, SyncEvent,
};

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of the terminal state at one point in time.
///
/// Handles are cheap to clone (`Arc` inside the cache) and remain valid
/// after later updates; they simply describe an older state.
#[derive(Debug, Clone, Default)]
pub struct TerminalSnapshot {
    /// Whether a full synchronization has completed for the active
    /// instance. Reads taken while this is `false` may be partial.
    pub synchronized: bool,
    /// Whether the client currently holds a live terminal session.
    pub connected: bool,
    /// Whether the terminal reports a live broker connection.
    pub connected_to_broker: bool,
    account_information: Option<AccountInformation>,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    specifications: HashMap<Symbol, SymbolSpecification>,
    prices: HashMap<Symbol, SymbolPrice>,
}

impl TerminalSnapshot {
    /// Get the cached account information, if ever received.
    #[must_use]
    pub const fn account_information(&self) -> Option<&AccountInformation> {
        self.account_information.as_ref()
    }

    /// Get the open positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.id.cmp(&b.id));
        positions
    }

    /// Look up one open position by id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Get the open orders.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    /// Get the specifications of all subscribed symbols.
    #[must_use]
    pub fn specifications(&self) -> Vec<SymbolSpecification> {
        let mut specs: Vec<_> = self.specifications.values().cloned().collect();
        specs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        specs
    }

    /// Look up one symbol's specification.
    #[must_use]
    pub fn specification(&self, symbol: &str) -> Option<&SymbolSpecification> {
        self.specifications.get(symbol)
    }

    /// Get the latest price of a subscribed symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<&SymbolPrice> {
        self.prices.get(symbol)
    }
}

// =============================================================================
// Per-Instance State
// =============================================================================

#[derive(Debug, Default)]
struct InstanceState {
    account_information: Option<AccountInformation>,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    specifications: HashMap<Symbol, SymbolSpecification>,
    prices: HashMap<Symbol, SymbolPrice>,
    has_positions: bool,
    has_orders: bool,
    /// Cache-local epoch at which this instance last completed a full
    /// synchronization. `None` until the terminating event arrives.
    completed_epoch: Option<u64>,
}

impl InstanceState {
    /// A full snapshot plus the terminating synchronized event.
    fn is_synchronized(&self) -> bool {
        self.completed_epoch.is_some()
            && self.has_positions
            && self.has_orders
            && self.account_information.is_some()
    }

    fn apply_metrics(&mut self, metrics: &AccountMetrics) {
        if let Some(info) = self.account_information.as_mut() {
            info.equity = metrics.equity;
            info.margin = metrics.margin;
            info.free_margin = metrics.free_margin;
            info.margin_level = metrics.margin_level;
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Default)]
struct CacheInner {
    instances: HashMap<InstanceIndex, InstanceState>,
    connected: bool,
    broker_connection: ConnectionStatus,
    sync_epoch: u64,
}

impl CacheInner {
    /// Pick the instance the snapshot should reflect.
    ///
    /// Synchronized instances win over unsynchronized ones; among
    /// synchronized instances the most recent completion wins and equal
    /// completions resolve to the lower instance index.
    fn active_instance(&self) -> Option<InstanceIndex> {
        self.instances
            .keys()
            .copied()
            .max_by_key(|index| {
                let epoch = self
                    .instances
                    .get(index)
                    .and_then(|state| state.completed_epoch);
                (epoch, std::cmp::Reverse(*index))
            })
    }

    fn build_snapshot(&self) -> TerminalSnapshot {
        let active = self.active_instance().and_then(|i| self.instances.get(&i));

        let synchronized = active.is_some_and(InstanceState::is_synchronized);
        let base = TerminalSnapshot {
            synchronized,
            connected: self.connected,
            connected_to_broker: self.connected
                && self.broker_connection == ConnectionStatus::Connected,
            ..TerminalSnapshot::default()
        };

        match active {
            Some(state) => TerminalSnapshot {
                account_information: state.account_information.clone(),
                positions: state.positions.clone(),
                orders: state.orders.clone(),
                specifications: state.specifications.clone(),
                prices: state.prices.clone(),
                ..base
            },
            None => base,
        }
    }
}

/// Continuously updated local mirror of the remote terminal state.
///
/// One writer (the stream's event pump) applies envelopes; any number of
/// readers take snapshot handles concurrently.
#[derive(Debug, Default)]
pub struct TerminalStateCache {
    inner: Mutex<CacheInner>,
    snapshot: RwLock<Arc<TerminalSnapshot>>,
}

impl TerminalStateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event and publish a fresh snapshot.
    pub fn apply(&self, envelope: &EventEnvelope) {
        let mut inner = self.inner.lock();
        Self::apply_event(&mut inner, envelope);
        let snapshot = Arc::new(inner.build_snapshot());
        drop(inner);
        *self.snapshot.write() = snapshot;
    }

    /// Record that the stream session came up or went down.
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.lock();
        inner.connected = connected;
        let snapshot = Arc::new(inner.build_snapshot());
        drop(inner);
        *self.snapshot.write() = snapshot;
    }

    /// Mark every instance as no longer synchronized.
    ///
    /// Called when a session is re-established without a resume marker:
    /// the remote will re-send full state, and until its terminating
    /// synchronized event arrives the cached data must read as stale.
    pub fn mark_all_unsynchronized(&self) {
        let mut inner = self.inner.lock();
        for state in inner.instances.values_mut() {
            state.completed_epoch = None;
            state.has_positions = false;
            state.has_orders = false;
        }
        let snapshot = Arc::new(inner.build_snapshot());
        drop(inner);
        *self.snapshot.write() = snapshot;
    }

    fn apply_event(inner: &mut CacheInner, envelope: &EventEnvelope) {
        let instance = inner.instances.entry(envelope.instance).or_default();

        match &envelope.event {
            SyncEvent::PriceUpdated { price, metrics } => {
                // Reject prices older than the cached one for the symbol;
                // reordering across reconnects must not roll quotes back.
                let stale = instance
                    .prices
                    .get(&price.symbol)
                    .is_some_and(|cached| price.time < cached.time);
                if stale {
                    tracing::debug!(
                        symbol = %price.symbol,
                        instance = envelope.instance,
                        "Ignoring stale price update"
                    );
                    return;
                }
                instance.prices.insert(price.symbol.clone(), price.clone());
                if let Some(metrics) = metrics {
                    instance.apply_metrics(metrics);
                }
            }
            SyncEvent::CandlesUpdated { metrics, .. }
            | SyncEvent::TicksUpdated { metrics, .. }
            | SyncEvent::BooksUpdated { metrics, .. } => {
                // Candle/tick/book history is delivered to listeners, not
                // cached; only the piggybacked margin figures stick.
                if let Some(metrics) = metrics {
                    instance.apply_metrics(metrics);
                }
            }
            SyncEvent::PositionsReplaced { positions } => {
                instance.positions = positions
                    .iter()
                    .map(|p| (p.id.clone(), p.clone()))
                    .collect();
                instance.has_positions = true;
            }
            SyncEvent::PositionUpdated { position } => {
                instance
                    .positions
                    .insert(position.id.clone(), position.clone());
            }
            SyncEvent::PositionRemoved { position_id } => {
                instance.positions.remove(position_id);
            }
            SyncEvent::OrdersReplaced { orders } => {
                instance.orders = orders.iter().map(|o| (o.id.clone(), o.clone())).collect();
                instance.has_orders = true;
            }
            SyncEvent::OrderUpdated { order } => {
                instance.orders.insert(order.id.clone(), order.clone());
            }
            SyncEvent::OrderRemoved { order_id } => {
                instance.orders.remove(order_id);
            }
            SyncEvent::AccountInformationUpdated {
                account_information,
            } => {
                instance.account_information = Some(account_information.clone());
            }
            SyncEvent::SpecificationsUpdated { specifications } => {
                for spec in specifications {
                    instance
                        .specifications
                        .insert(spec.symbol.clone(), spec.clone());
                }
            }
            SyncEvent::Synchronized { synchronization_id } => {
                inner.sync_epoch += 1;
                let epoch = inner.sync_epoch;
                let instance = inner
                    .instances
                    .entry(envelope.instance)
                    .or_default();
                instance.completed_epoch = Some(epoch);
                tracing::debug!(
                    instance = envelope.instance,
                    synchronization_id = %synchronization_id,
                    "Instance completed synchronization"
                );
            }
            SyncEvent::StatusChanged { status } => {
                inner.broker_connection = status.connection;
            }
            SyncEvent::Disconnected => {
                let instance = inner
                    .instances
                    .entry(envelope.instance)
                    .or_default();
                instance.completed_epoch = None;
            }
            SyncEvent::SubscriptionAck { .. }
            | SyncEvent::SubscriptionDowngraded { .. }
            | SyncEvent::TradeResponse { .. } => {
                // Routed by the stream; no cached state.
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Take a handle to the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TerminalSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Whether a full synchronization has completed for the active instance.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.snapshot().synchronized
    }

    /// Whether the client currently holds a live terminal session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.snapshot().connected
    }

    /// Whether the terminal reports a live broker connection.
    #[must_use]
    pub fn is_connected_to_broker(&self) -> bool {
        self.snapshot().connected_to_broker
    }

    /// Get the cached account information.
    #[must_use]
    pub fn account_information(&self) -> Option<AccountInformation> {
        self.snapshot().account_information().cloned()
    }

    /// Get the open positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.snapshot().positions()
    }

    /// Get the open orders.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.snapshot().orders()
    }

    /// Get the specifications of all subscribed symbols.
    #[must_use]
    pub fn specifications(&self) -> Vec<SymbolSpecification> {
        self.snapshot().specifications()
    }

    /// Look up one symbol's specification.
    #[must_use]
    pub fn specification(&self, symbol: &str) -> Option<SymbolSpecification> {
        self.snapshot().specification(symbol).cloned()
    }

    /// Get the latest price of a subscribed symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<SymbolPrice> {
        self.snapshot().price(symbol).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================
