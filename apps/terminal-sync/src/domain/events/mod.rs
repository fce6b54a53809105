//! Synchronization Event and Command Model
//!
//! Canonical types for the duplex terminal stream: incremental state
//! events pushed from the remote terminal down to the client, and
//! subscription/trade commands carried upstream.
//!
//! # Event Envelopes
//!
//! A single logical account may be served by several redundant terminal
//! replicas. Every event therefore travels in an [`EventEnvelope`] tagged
//! with the emitting replica's [`InstanceIndex`] and a per-instance
//! monotonically increasing sequence number used as the resume marker
//! after reconnects. Ordering is guaranteed only within one instance
//! index; consumers must tolerate cross-instance interleaving.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountStatus;
use super::subscription::MarketDataSubscription;

/// A symbol string, e.g. `"EURUSD"`.
pub type Symbol = String;

/// Identifier of a redundant terminal replica serving one logical account.
pub type InstanceIndex = u32;

// =============================================================================
// Market Data Payloads
// =============================================================================

/// Latest bid/ask pair for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPrice {
    /// Symbol the quote belongs to.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Quote time reported by the terminal.
    pub time: DateTime<Utc>,
}

/// A completed or in-progress OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Symbol the candle belongs to.
    pub symbol: Symbol,
    /// Candle timeframe, e.g. `"1m"` or `"1h"`.
    pub timeframe: String,
    /// Candle open time.
    pub time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Tick count within the candle.
    pub tick_volume: u64,
}

/// A single trade tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Symbol the tick belongs to.
    pub symbol: Symbol,
    /// Tick time reported by the terminal.
    pub time: DateTime<Utc>,
    /// Bid price, when present in the tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    /// Ask price, when present in the tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    /// Last trade price, when present in the tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Decimal>,
}

/// Side of an order book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    /// Buy side.
    Bid,
    /// Sell side.
    Ask,
}

/// One price level of an order book snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    /// Side of the book.
    pub side: BookSide,
    /// Price level.
    pub price: Decimal,
    /// Aggregate volume at the level.
    pub volume: Decimal,
}

/// Order book snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Symbol the book belongs to.
    pub symbol: Symbol,
    /// Snapshot time reported by the terminal.
    pub time: DateTime<Utc>,
    /// Book entries, best levels first.
    pub entries: Vec<BookEntry>,
}

// =============================================================================
// Account State Payloads
// =============================================================================

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    /// Long.
    Buy,
    /// Short.
    Sell,
}

/// Terminal account information and margin figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInformation {
    /// Broker login of the account.
    pub login: String,
    /// Broker name.
    pub broker: String,
    /// Trade server name.
    pub server: String,
    /// Account deposit currency.
    pub currency: String,
    /// Account balance.
    pub balance: Decimal,
    /// Account equity.
    pub equity: Decimal,
    /// Used margin.
    pub margin: Decimal,
    /// Free margin.
    pub free_margin: Decimal,
    /// Margin level percentage, absent when no margin is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_level: Option<Decimal>,
    /// Account leverage.
    pub leverage: u32,
}

/// Account margin figures piggybacked on market data events.
///
/// The terminal refreshes equity and margin on every quote it streams;
/// these update the cached account information in place without a full
/// `AccountInformationUpdated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMetrics {
    /// Account equity.
    pub equity: Decimal,
    /// Used margin.
    pub margin: Decimal,
    /// Free margin.
    pub free_margin: Decimal,
    /// Margin level percentage, absent when no margin is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_level: Option<Decimal>,
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Position id assigned by the terminal.
    pub id: String,
    /// Symbol the position is in.
    pub symbol: Symbol,
    /// Trade direction.
    pub side: TradeSide,
    /// Position volume in lots.
    pub volume: Decimal,
    /// Open price.
    pub open_price: Decimal,
    /// Current market price, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// Stop loss level, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Take profit level, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    /// Floating profit, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit: Option<Decimal>,
    /// Position open time.
    pub time: DateTime<Utc>,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Pending order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Execute at the current market price.
    Market,
    /// Execute at the given price or better.
    Limit,
    /// Execute once the market reaches the given price.
    Stop,
}

/// An open (pending) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id assigned by the terminal.
    pub id: String,
    /// Symbol the order is for.
    pub symbol: Symbol,
    /// Trade direction.
    pub side: TradeSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Order volume in lots.
    pub volume: Decimal,
    /// Entry price for limit/stop orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_price: Option<Decimal>,
    /// Stop loss level, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Take profit level, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    /// Order placement time.
    pub time: DateTime<Utc>,
    /// Client-assigned order id, when provided at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Trading specification of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpecification {
    /// Symbol the specification describes.
    pub symbol: Symbol,
    /// Minimum tradable volume in lots.
    pub min_volume: Decimal,
    /// Maximum tradable volume in lots.
    pub max_volume: Decimal,
    /// Volume step in lots.
    pub volume_step: Decimal,
    /// Minimal price change.
    pub tick_size: Decimal,
    /// Price digits after the decimal point.
    pub digits: u32,
    /// Human-readable description, when provided by the broker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// =============================================================================
// Trade Requests and Responses
// =============================================================================

/// An order submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Client-assigned correlation id linking the request to its response.
    pub request_id: String,
    /// Symbol to trade.
    pub symbol: Symbol,
    /// Trade direction.
    pub side: TradeSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Order volume in lots.
    pub volume: Decimal,
    /// Entry price, required for limit/stop orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_price: Option<Decimal>,
    /// Stop loss level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Take profit level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    /// Free-form comment attached to the order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Broker response to a trade request, success or rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResponsePayload {
    /// Correlation id of the originating request.
    pub request_id: String,
    /// Broker order id, present on accepted orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Broker result code string, e.g. `"TRADE_RETCODE_DONE"`.
    pub string_code: String,
    /// Broker numeric result code, e.g. `10009`.
    pub numeric_code: i32,
    /// Human-readable broker message.
    pub message: String,
}

impl TradeResponsePayload {
    /// Broker codes that indicate an accepted order.
    const ACCEPTED_CODES: &'static [i32] = &[10008, 10009];

    /// Check whether the broker accepted the order.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        Self::ACCEPTED_CODES.contains(&self.numeric_code)
    }
}

// =============================================================================
// Stream Events
// =============================================================================

/// An incremental state event pushed by the remote terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A subscribed symbol's latest price changed.
    #[serde(rename_all = "camelCase")]
    PriceUpdated {
        /// The updated price.
        price: SymbolPrice,
        /// Refreshed account margin figures, when streamed with the quote.
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<AccountMetrics>,
    },
    /// New or updated candles for a subscribed symbol.
    #[serde(rename_all = "camelCase")]
    CandlesUpdated {
        /// The updated candles.
        candles: Vec<Candle>,
        /// Refreshed account margin figures, when streamed alongside.
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<AccountMetrics>,
    },
    /// New ticks for a subscribed symbol.
    #[serde(rename_all = "camelCase")]
    TicksUpdated {
        /// The new ticks.
        ticks: Vec<Tick>,
        /// Refreshed account margin figures, when streamed alongside.
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<AccountMetrics>,
    },
    /// Order book snapshots for a subscribed symbol.
    #[serde(rename_all = "camelCase")]
    BooksUpdated {
        /// The updated books.
        books: Vec<Book>,
        /// Refreshed account margin figures, when streamed alongside.
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<AccountMetrics>,
    },
    /// Full replacement of the open position set.
    #[serde(rename_all = "camelCase")]
    PositionsReplaced {
        /// The complete new position set.
        positions: Vec<Position>,
    },
    /// A single position was created or modified.
    #[serde(rename_all = "camelCase")]
    PositionUpdated {
        /// The new position value.
        position: Position,
    },
    /// A single position was closed.
    #[serde(rename_all = "camelCase")]
    PositionRemoved {
        /// Id of the removed position.
        position_id: String,
    },
    /// Full replacement of the open order set.
    #[serde(rename_all = "camelCase")]
    OrdersReplaced {
        /// The complete new order set.
        orders: Vec<Order>,
    },
    /// A single order was created or modified.
    #[serde(rename_all = "camelCase")]
    OrderUpdated {
        /// The new order value.
        order: Order,
    },
    /// A single order was filled or cancelled.
    #[serde(rename_all = "camelCase")]
    OrderRemoved {
        /// Id of the removed order.
        order_id: String,
    },
    /// Account information was refreshed.
    #[serde(rename_all = "camelCase")]
    AccountInformationUpdated {
        /// The new account information.
        account_information: AccountInformation,
    },
    /// Specifications for subscribed symbols were refreshed.
    #[serde(rename_all = "camelCase")]
    SpecificationsUpdated {
        /// The updated specifications.
        specifications: Vec<SymbolSpecification>,
    },
    /// The server acknowledged a subscribe request.
    #[serde(rename_all = "camelCase")]
    SubscriptionAck {
        /// Correlation id of the subscribe request.
        request_id: String,
        /// Symbol the acknowledgment is for.
        symbol: Symbol,
        /// The granted subscription set.
        granted: Vec<MarketDataSubscription>,
    },
    /// The server unilaterally reduced a subscription due to rate limits.
    #[serde(rename_all = "camelCase")]
    SubscriptionDowngraded {
        /// Correlation id of the subscribe request, when the downgrade
        /// answers one directly.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Symbol the downgrade applies to.
        symbol: Symbol,
        /// The reduced subscription set now in effect.
        updates: Vec<MarketDataSubscription>,
    },
    /// Broker response to a trade command.
    #[serde(rename_all = "camelCase")]
    TradeResponse {
        /// The response payload.
        response: TradeResponsePayload,
    },
    /// The emitting instance completed a full state transfer.
    #[serde(rename_all = "camelCase")]
    Synchronized {
        /// Server-assigned id of the completed synchronization.
        synchronization_id: String,
    },
    /// Deployment or connectivity status of the account changed.
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        /// The new account status.
        status: AccountStatus,
    },
    /// The emitting instance lost its terminal session.
    Disconnected,
}

/// A stream event tagged with its emitting instance and sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Terminal replica that emitted the event.
    pub instance: InstanceIndex,
    /// Per-instance monotonically increasing sequence number.
    pub sequence: u64,
    /// The event itself.
    pub event: SyncEvent,
}

// =============================================================================
// Stream Commands
// =============================================================================

/// An outbound command carried upstream over the synchronization stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamCommand {
    /// Subscribe a symbol to the given market data kinds.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Client-assigned correlation id.
        request_id: String,
        /// Symbol to subscribe.
        symbol: Symbol,
        /// Requested subscription set.
        subscriptions: Vec<MarketDataSubscription>,
    },
    /// Remove all market data subscriptions for a symbol.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Client-assigned correlation id.
        request_id: String,
        /// Symbol to unsubscribe.
        symbol: Symbol,
    },
    /// Submit an order to the broker.
    #[serde(rename_all = "camelCase")]
    Trade {
        /// The order request.
        request: TradeRequest,
    },
}

impl StreamCommand {
    /// Get the correlation id the command carries.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Subscribe { request_id, .. } | Self::Unsubscribe { request_id, .. } => request_id,
            Self::Trade { request } => &request.request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = SyncEvent::PriceUpdated {
            price: SymbolPrice {
                symbol: "EURUSD".to_string(),
                bid: Decimal::new(11000, 4),
                ask: Decimal::new(11002, 4),
                time: Utc::now(),
            },
            metrics: None,
        };
        let envelope = EventEnvelope {
            instance: 0,
            sequence: 17,
            event,
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn event_tag_is_camel_case() {
        let json = serde_json::to_string(&SyncEvent::PositionsReplaced { positions: vec![] }).unwrap();
        assert!(json.contains("\"type\":\"positionsReplaced\""));
    }

    #[test]
    fn accepted_codes_cover_placed_and_done() {
        let done = TradeResponsePayload {
            request_id: "r1".to_string(),
            order_id: Some("46870472".to_string()),
            string_code: "TRADE_RETCODE_DONE".to_string(),
            numeric_code: 10009,
            message: "Request completed".to_string(),
        };
        assert!(done.is_accepted());

        let rejected = TradeResponsePayload {
            request_id: "r2".to_string(),
            order_id: None,
            string_code: "TRADE_RETCODE_INVALID_VOLUME".to_string(),
            numeric_code: 10014,
            message: "Invalid volume in the request".to_string(),
        };
        assert!(!rejected.is_accepted());
    }

    #[test]
    fn command_request_id_is_exposed_for_all_variants() {
        let subscribe = StreamCommand::Subscribe {
            request_id: "s1".to_string(),
            symbol: "EURUSD".to_string(),
            subscriptions: vec![],
        };
        assert_eq!(subscribe.request_id(), "s1");

        let trade = StreamCommand::Trade {
            request: TradeRequest {
                request_id: "t1".to_string(),
                symbol: "GBPUSD".to_string(),
                side: TradeSide::Buy,
                kind: OrderKind::Limit,
                volume: Decimal::new(7, 2),
                open_price: Some(Decimal::ONE),
                stop_loss: Some(Decimal::new(9, 1)),
                take_profit: Some(Decimal::TWO),
                comment: Some("comm".to_string()),
            },
        };
        assert_eq!(trade.request_id(), "t1");
    }
}
