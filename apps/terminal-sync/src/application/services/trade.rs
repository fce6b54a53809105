//! Trade Gateway
//!
//! Submits order requests over the synchronization stream and resolves
//! each to a typed result through its client-assigned correlation id.
//! Broker rejections surface as [`TradeError`] with the broker's result
//! codes; connectivity problems surface as a distinct variant so
//! callers never have to string-match to tell them apart.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::events::{StreamCommand, TradeRequest, TradeResponsePayload};

/// A broker-rejected trade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trade rejected with {string_code} ({numeric_code}): {message}")]
pub struct TradeError {
    /// Broker result code string, e.g. `"TRADE_RETCODE_INVALID_VOLUME"`.
    pub string_code: String,
    /// Broker numeric result code.
    pub numeric_code: i32,
    /// Human-readable broker message.
    pub message: String,
}

/// Errors returned by [`TradeGateway::submit_order`].
#[derive(Debug, thiserror::Error)]
pub enum TradeSubmitError {
    /// The broker rejected the order. Business rejection; the order
    /// reached the broker and is never retried automatically.
    #[error(transparent)]
    Trade(TradeError),

    /// The order never reached the broker.
    #[error("trade command could not be delivered: {0}")]
    Connectivity(String),

    /// No response arrived within the budget.
    #[error("no trade response within {0:?}")]
    Timeout(Duration),
}

/// Result of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    /// Broker order id, when the broker assigned one.
    pub order_id: Option<String>,
    /// Broker result code string, e.g. `"TRADE_RETCODE_DONE"`.
    pub string_code: String,
    /// Broker numeric result code.
    pub numeric_code: i32,
}

/// Correlated order submission over the stream's command channel.
pub struct TradeGateway {
    commands: mpsc::Sender<StreamCommand>,
    pending: Mutex<HashMap<String, oneshot::Sender<TradeResponsePayload>>>,
    response_timeout: Duration,
}

impl TradeGateway {
    /// Create a gateway sending commands into the given channel.
    #[must_use]
    pub fn new(commands: mpsc::Sender<StreamCommand>, response_timeout: Duration) -> Self {
        Self {
            commands,
            pending: Mutex::new(HashMap::new()),
            response_timeout,
        }
    }

    /// Submit an order and await its correlated response.
    ///
    /// A missing `request_id` is filled with a fresh UUID. Safe to call
    /// concurrently; every submission gets its own correlation id and
    /// independent resolution.
    pub async fn submit_order(
        &self,
        mut request: TradeRequest,
    ) -> Result<OrderResult, TradeSubmitError> {
        if request.request_id.is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }
        let request_id = request.request_id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if let Err(error) = self.commands.send(StreamCommand::Trade { request }).await {
            self.pending.lock().remove(&request_id);
            return Err(TradeSubmitError::Connectivity(error.to_string()));
        }

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(response)) => Self::resolve(response),
            // Sender dropped: the stream failed all pending requests.
            Ok(Err(_)) => Err(TradeSubmitError::Connectivity(
                "stream closed before the broker responded".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(TradeSubmitError::Timeout(self.response_timeout))
            }
        }
    }

    /// Route a trade response to its outstanding request.
    ///
    /// A response without a matching outstanding request is dropped.
    pub fn handle_response(&self, response: TradeResponsePayload) {
        let waiter = self.pending.lock().remove(&response.request_id);
        match waiter {
            Some(tx) => {
                // The submitter may have timed out meanwhile; nothing to do.
                let _ = tx.send(response);
            }
            None => {
                tracing::debug!(
                    request_id = %response.request_id,
                    "Dropping trade response without outstanding request"
                );
            }
        }
    }

    /// Fail every outstanding request with a connectivity error.
    ///
    /// Called when the stream enters its terminal failed state.
    pub fn fail_all_pending(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::warn!(
                count = drained.len(),
                "Failing outstanding trade requests after stream failure"
            );
        }
        // Dropping the senders resolves the waiters with a recv error.
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn resolve(response: TradeResponsePayload) -> Result<OrderResult, TradeSubmitError> {
        if response.is_accepted() {
            Ok(OrderResult {
                order_id: response.order_id,
                string_code: response.string_code,
                numeric_code: response.numeric_code,
            })
        } else {
            Err(TradeSubmitError::Trade(TradeError {
                string_code: response.string_code,
                numeric_code: response.numeric_code,
                message: response.message,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::domain::events::{OrderKind, TradeSide};

    fn request(request_id: &str) -> TradeRequest {
        TradeRequest {
            request_id: request_id.to_string(),
            symbol: "GBPUSD".to_string(),
            side: TradeSide::Buy,
            kind: OrderKind::Limit,
            volume: Decimal::new(7, 2),
            open_price: Some(Decimal::ONE),
            stop_loss: None,
            take_profit: None,
            comment: Some("comm".to_string()),
        }
    }

    fn response(request_id: &str, string_code: &str, numeric_code: i32) -> TradeResponsePayload {
        TradeResponsePayload {
            request_id: request_id.to_string(),
            order_id: (numeric_code == 10009).then(|| "46870472".to_string()),
            string_code: string_code.to_string(),
            numeric_code,
            message: String::new(),
        }
    }

    #[tokio::test]
    async fn accepted_response_resolves_success() {
        let (tx, mut rx) = mpsc::channel(4);
        let gateway = std::sync::Arc::new(TradeGateway::new(tx, Duration::from_secs(1)));

        let submit = {
            let gateway = std::sync::Arc::clone(&gateway);
            tokio::spawn(async move { gateway.submit_order(request("X1")).await })
        };

        // The command reaches the channel with its correlation id intact.
        let command = rx.recv().await.unwrap();
        assert_eq!(command.request_id(), "X1");

        gateway.handle_response(response("X1", "TRADE_RETCODE_DONE", 10009));

        let result = submit.await.unwrap().unwrap();
        assert_eq!(result.order_id.as_deref(), Some("46870472"));
        assert_eq!(result.string_code, "TRADE_RETCODE_DONE");
    }

    #[tokio::test]
    async fn rejection_surfaces_typed_trade_error() {
        let (tx, mut rx) = mpsc::channel(4);
        let gateway = std::sync::Arc::new(TradeGateway::new(tx, Duration::from_secs(1)));

        let submit = {
            let gateway = std::sync::Arc::clone(&gateway);
            tokio::spawn(async move { gateway.submit_order(request("X1")).await })
        };
        let _ = rx.recv().await.unwrap();

        gateway.handle_response(response("X1", "TRADE_RETCODE_INVALID_VOLUME", 10014));

        match submit.await.unwrap() {
            Err(TradeSubmitError::Trade(error)) => {
                assert_eq!(error.string_code, "TRADE_RETCODE_INVALID_VOLUME");
                assert_eq!(error.numeric_code, 10014);
            }
            other => panic!("expected trade error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let (tx, _rx) = mpsc::channel(4);
        let gateway = TradeGateway::new(tx, Duration::from_secs(1));

        gateway.handle_response(response("unknown", "TRADE_RETCODE_DONE", 10009));

        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_request_id_is_generated() {
        let (tx, mut rx) = mpsc::channel(4);
        let gateway = std::sync::Arc::new(TradeGateway::new(tx, Duration::from_millis(50)));

        let submit = {
            let gateway = std::sync::Arc::clone(&gateway);
            tokio::spawn(async move { gateway.submit_order(request("")).await })
        };

        let command = rx.recv().await.unwrap();
        assert!(!command.request_id().is_empty());

        // No response: the call times out rather than hanging.
        assert!(matches!(
            submit.await.unwrap(),
            Err(TradeSubmitError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn timeout_clears_the_outstanding_entry() {
        let (tx, mut rx) = mpsc::channel(4);
        let gateway = std::sync::Arc::new(TradeGateway::new(tx, Duration::from_millis(20)));

        let submit = {
            let gateway = std::sync::Arc::clone(&gateway);
            tokio::spawn(async move { gateway.submit_order(request("X9")).await })
        };
        let _ = rx.recv().await.unwrap();

        assert!(matches!(
            submit.await.unwrap(),
            Err(TradeSubmitError::Timeout(_))
        ));
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn stream_failure_releases_waiters_with_connectivity_error() {
        let (tx, mut rx) = mpsc::channel(4);
        let gateway = std::sync::Arc::new(TradeGateway::new(tx, Duration::from_secs(5)));

        let submit = {
            let gateway = std::sync::Arc::clone(&gateway);
            tokio::spawn(async move { gateway.submit_order(request("X1")).await })
        };
        let _ = rx.recv().await.unwrap();

        gateway.fail_all_pending();

        assert!(matches!(
            submit.await.unwrap(),
            Err(TradeSubmitError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn closed_command_channel_is_a_connectivity_error() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let gateway = TradeGateway::new(tx, Duration::from_secs(1));

        assert!(matches!(
            gateway.submit_order(request("X1")).await,
            Err(TradeSubmitError::Connectivity(_))
        ));
    }
}
