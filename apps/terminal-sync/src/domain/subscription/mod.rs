//! Market Data Subscription Tracking
//!
//! Domain types for tracking which symbols and data kinds are currently
//! subscribed on the terminal stream.
//!
//! # Design
//!
//! The manager records one normalized subscription set per symbol. A
//! subscribe call merges the requested kinds into the active record
//! (union of kinds, minimum interval per kind) and yields the full set
//! to send upstream; the record itself is committed only once the
//! server acknowledges, so the local state always mirrors the server's
//! acknowledged set. Server-initiated downgrades overwrite the record
//! with the reduced set and are never answered with a re-request, since
//! that would loop against the server's rate limit. After a reconnect
//! the server retains no subscription state, so the full tracked set is
//! replayed as fresh subscribe commands.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::events::Symbol;

// =============================================================================
// Types
// =============================================================================

/// One requested market data kind for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MarketDataSubscription {
    /// Bid/ask quote updates.
    #[serde(rename_all = "camelCase")]
    Quotes {
        /// Maximum update interval in milliseconds; server default when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
    /// Candle updates for one timeframe.
    #[serde(rename_all = "camelCase")]
    Candles {
        /// Candle timeframe, e.g. `"1m"`.
        timeframe: String,
        /// Maximum update interval in milliseconds; server default when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
    /// Raw tick updates.
    Ticks,
    /// Order book (market depth) updates.
    #[serde(rename_all = "camelCase")]
    MarketDepth {
        /// Maximum update interval in milliseconds; server default when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
}

/// Key identifying one subscription kind within a symbol's record.
///
/// Candle subscriptions are keyed per timeframe so that, e.g., `1m` and
/// `1h` candles coexist for the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SubscriptionKey {
    Quotes,
    Candles(String),
    Ticks,
    MarketDepth,
}

impl MarketDataSubscription {
    fn key(&self) -> SubscriptionKey {
        match self {
            Self::Quotes { .. } => SubscriptionKey::Quotes,
            Self::Candles { timeframe, .. } => SubscriptionKey::Candles(timeframe.clone()),
            Self::Ticks => SubscriptionKey::Ticks,
            Self::MarketDepth { .. } => SubscriptionKey::MarketDepth,
        }
    }

    const fn interval_ms(&self) -> Option<u64> {
        match self {
            Self::Quotes { interval_ms }
            | Self::Candles { interval_ms, .. }
            | Self::MarketDepth { interval_ms } => *interval_ms,
            Self::Ticks => None,
        }
    }
}

/// Merge two optional intervals, keeping the tighter one.
const fn min_interval(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x < y { x } else { y }),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

// =============================================================================
// Symbol Record
// =============================================================================

/// Normalized subscription set for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SymbolRecord {
    entries: BTreeMap<SubscriptionKey, Option<u64>>,
}

impl SymbolRecord {
    fn from_subscriptions(subscriptions: &[MarketDataSubscription]) -> Self {
        let mut record = Self::default();
        record.merge(subscriptions);
        record
    }

    /// Union of kinds, minimum interval per kind.
    fn merge(&mut self, subscriptions: &[MarketDataSubscription]) {
        for sub in subscriptions {
            let interval = sub.interval_ms();
            self.entries
                .entry(sub.key())
                .and_modify(|existing| *existing = min_interval(*existing, interval))
                .or_insert(interval);
        }
    }

    fn to_subscriptions(&self) -> Vec<MarketDataSubscription> {
        self.entries
            .iter()
            .map(|(key, interval)| match key {
                SubscriptionKey::Quotes => MarketDataSubscription::Quotes {
                    interval_ms: *interval,
                },
                SubscriptionKey::Candles(timeframe) => MarketDataSubscription::Candles {
                    timeframe: timeframe.clone(),
                    interval_ms: *interval,
                },
                SubscriptionKey::Ticks => MarketDataSubscription::Ticks,
                SubscriptionKey::MarketDepth => MarketDataSubscription::MarketDepth {
                    interval_ms: *interval,
                },
            })
            .collect()
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Tracks the acknowledged market data subscriptions for one connection.
///
/// Thread-safe; commands are computed against the tracked state and the
/// state is committed from server acknowledgments, so local records
/// always equal the server's acknowledged set.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    records: RwLock<HashMap<Symbol, SymbolRecord>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the full subscription set to request for a symbol.
    ///
    /// Merges the requested kinds into the currently acknowledged record
    /// (union of kinds, minimum interval per kind) without committing;
    /// the record is committed by [`Self::apply_ack`] or
    /// [`Self::apply_downgrade`].
    #[must_use]
    pub fn merge_request(
        &self,
        symbol: &str,
        requested: &[MarketDataSubscription],
    ) -> Vec<MarketDataSubscription> {
        let records = self.records.read();
        let mut merged = records.get(symbol).cloned().unwrap_or_default();
        drop(records);
        merged.merge(requested);
        merged.to_subscriptions()
    }

    /// Commit the server-acknowledged set for a symbol.
    pub fn apply_ack(&self, symbol: &str, granted: &[MarketDataSubscription]) {
        self.records.write().insert(
            symbol.to_string(),
            SymbolRecord::from_subscriptions(granted),
        );
    }

    /// Overwrite a symbol's record with a server-downgraded set.
    ///
    /// The reduced set replaces the record as-is. An empty set removes
    /// the symbol entirely (the server dropped every kind).
    pub fn apply_downgrade(&self, symbol: &str, updates: &[MarketDataSubscription]) {
        let mut records = self.records.write();
        if updates.is_empty() {
            records.remove(symbol);
        } else {
            records.insert(
                symbol.to_string(),
                SymbolRecord::from_subscriptions(updates),
            );
        }
    }

    /// Drop all kinds for a symbol.
    pub fn remove(&self, symbol: &str) {
        self.records.write().remove(symbol);
    }

    /// Drop every tracked subscription.
    ///
    /// Called when the stream reaches its terminal failed state; a fresh
    /// open starts with no subscriptions, matching the server.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Get the acknowledged set for a symbol, if any.
    #[must_use]
    pub fn tracked(&self, symbol: &str) -> Option<Vec<MarketDataSubscription>> {
        self.records
            .read()
            .get(symbol)
            .map(SymbolRecord::to_subscriptions)
    }

    /// Snapshot every tracked subscription for replay after a reconnect.
    ///
    /// Symbols are returned in stable order so each is re-sent exactly
    /// once per reconnect.
    #[must_use]
    pub fn replay_set(&self) -> Vec<(Symbol, Vec<MarketDataSubscription>)> {
        let records = self.records.read();
        let mut replay: Vec<_> = records
            .iter()
            .map(|(symbol, record)| (symbol.clone(), record.to_subscriptions()))
            .collect();
        drop(records);
        replay.sort_by(|a, b| a.0.cmp(&b.0));
        replay
    }

    /// Number of symbols with at least one tracked kind.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.records.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
