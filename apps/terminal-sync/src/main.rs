//! Terminal Sync Demo Binary
//!
//! Deploys an account, connects to its remote terminal, synchronizes
//! the local state cache and streams market data for one symbol until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin terminal-sync
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TERMINAL_TOKEN`: API auth token
//! - `TERMINAL_ACCOUNT_ID`: Account to synchronize
//!
//! ## Optional
//! - `TERMINAL_SYMBOL`: Symbol to stream (default: EURUSD)
//! - `TERMINAL_API_URL`: Provisioning API base URL
//! - `TERMINAL_STREAM_URL`: Terminal stream WebSocket base URL
//! - `TERMINAL_MAX_RECONNECT_ATTEMPTS`: Reconnect ceiling (default: unlimited)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::signal;

use terminal_sync::application::ports::ListenerResult;
use terminal_sync::infrastructure::telemetry;
use terminal_sync::{
    AccountLifecycleManager, Book, Candle, InstanceIndex, MarketDataSubscription,
    ProvisioningClient, SdkConfig, StreamConfig, Symbol, SymbolPrice, SynchronizationListener,
    TerminalConnection, Tick, WebSocketTransport,
};

/// Interval between provisioning status polls while waiting for the
/// broker connection.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Prints market data updates for one symbol.
struct QuoteListener {
    symbol: String,
}

#[async_trait]
impl SynchronizationListener for QuoteListener {
    async fn on_symbol_price_updated(
        &self,
        _instance: InstanceIndex,
        price: &SymbolPrice,
    ) -> ListenerResult {
        if price.symbol == self.symbol {
            tracing::info!(symbol = %price.symbol, bid = %price.bid, ask = %price.ask, "Price updated");
        }
        Ok(())
    }

    async fn on_candles_updated(
        &self,
        _instance: InstanceIndex,
        candles: &[Candle],
    ) -> ListenerResult {
        for candle in candles.iter().filter(|c| c.symbol == self.symbol) {
            tracing::info!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                close = %candle.close,
                "Candle updated"
            );
        }
        Ok(())
    }

    async fn on_ticks_updated(&self, _instance: InstanceIndex, ticks: &[Tick]) -> ListenerResult {
        for tick in ticks.iter().filter(|t| t.symbol == self.symbol) {
            tracing::info!(symbol = %tick.symbol, bid = ?tick.bid, ask = ?tick.ask, "Tick");
        }
        Ok(())
    }

    async fn on_books_updated(&self, _instance: InstanceIndex, books: &[Book]) -> ListenerResult {
        for book in books.iter().filter(|b| b.symbol == self.symbol) {
            tracing::info!(symbol = %book.symbol, levels = book.entries.len(), "Order book updated");
        }
        Ok(())
    }

    async fn on_subscription_downgraded(
        &self,
        _instance: InstanceIndex,
        symbol: &Symbol,
        _updates: &[MarketDataSubscription],
    ) -> ListenerResult {
        tracing::warn!(
            symbol = %symbol,
            "Market data subscriptions were downgraded by the server due to rate limits"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    telemetry::init();

    let config = SdkConfig::from_env()?;
    let symbol = std::env::var("TERMINAL_SYMBOL").unwrap_or_else(|_| "EURUSD".to_string());
    log_config(&config, &symbol);

    let provisioning = Arc::new(ProvisioningClient::new(
        &config.provisioning_url,
        config.token.as_str(),
    )?);
    let lifecycle = Arc::new(AccountLifecycleManager::new(
        config.account_id.clone(),
        provisioning,
    ));
    let transport = Arc::new(WebSocketTransport::new(
        &config.stream_url,
        config.token.as_str(),
    ));

    lifecycle.reload().await?;
    tracing::info!("Deploying account");
    lifecycle.deploy().await?;
    lifecycle.wait_deployed(config.waits.deploy_timeout).await?;

    tracing::info!("Waiting for the terminal to connect to the broker (may take a couple of minutes)");
    wait_connected_with_polling(&lifecycle, config.waits.connect_timeout).await?;

    let connection = TerminalConnection::new(
        Arc::clone(&lifecycle),
        transport,
        StreamConfig::from(&config.stream),
    );
    connection.add_listener(Arc::new(QuoteListener {
        symbol: symbol.clone(),
    }));
    connection.open();

    tracing::info!("Waiting for terminal state synchronization (may take some time depending on history size)");
    connection
        .wait_synchronized(config.waits.synchronize_timeout)
        .await?;

    let granted = connection
        .subscribe_to_market_data(
            &symbol,
            &[
                MarketDataSubscription::Quotes {
                    interval_ms: Some(5000),
                },
                MarketDataSubscription::Candles {
                    timeframe: "1m".to_string(),
                    interval_ms: Some(10_000),
                },
                MarketDataSubscription::Ticks,
                MarketDataSubscription::MarketDepth {
                    interval_ms: Some(5000),
                },
            ],
        )
        .await?;
    tracing::info!(symbol = %symbol, kinds = granted.len(), "Market data subscription active");

    if let Some(price) = connection.terminal_state().price(&symbol) {
        tracing::info!(bid = %price.bid, ask = %price.ask, "Price after subscribe");
    }

    tracing::info!(symbol = %symbol, "Synchronized successfully, streaming market data now");
    await_shutdown().await;

    connection.close().await;
    lifecycle.undeploy().await?;
    tracing::info!("Account undeployed, exiting");
    Ok(())
}

/// Wait for broker connectivity, polling the provisioning API while
/// the stream is not yet delivering status events.
async fn wait_connected_with_polling(
    lifecycle: &Arc<AccountLifecycleManager>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let poller = {
        let lifecycle = Arc::clone(lifecycle);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(STATUS_POLL_INTERVAL).await;
                match lifecycle.reload().await {
                    Ok(status) if status.is_connected() => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(error = %error, "Status poll failed; retrying");
                    }
                }
            }
        })
    };

    let result = lifecycle.wait_connected(timeout).await;
    poller.abort();
    result.map_err(Into::into)
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SdkConfig, symbol: &str) {
    tracing::info!(
        account = %config.account_id,
        symbol = %symbol,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        provisioning_url = %config.provisioning_url,
        stream_url = %config.stream_url,
        "API endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
