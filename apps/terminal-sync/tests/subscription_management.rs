//! Subscription Management Integration Tests
//!
//! Subscribe round-trips, server downgrades and reconnect replay over
//! an in-process fake transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use terminal_sync::application::ports::ListenerResult;
use terminal_sync::{
    AccountId, AccountLifecycleManager, AccountStatus, BackoffConfig, ConnectionStatus,
    DeploymentState, EventEnvelope, InstanceIndex, MarketDataSubscription, ProvisioningError,
    ProvisioningPort, ResumePoint, StreamCommand, StreamConfig, Symbol, SyncEvent,
    SynchronizationListener, TerminalConnection, TerminalTransport, TransportError,
    TransportSession,
};

// =============================================================================
// Test Fakes
// =============================================================================

/// Server half of one fake transport session.
struct ServerSession {
    resume: Option<ResumePoint>,
    commands: mpsc::Receiver<StreamCommand>,
    events: mpsc::Sender<EventEnvelope>,
}

struct FakeTransport {
    sessions: mpsc::Sender<ServerSession>,
}

impl FakeTransport {
    fn new() -> (Arc<Self>, mpsc::Receiver<ServerSession>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Self { sessions: tx }), rx)
    }
}

#[async_trait]
impl TerminalTransport for FakeTransport {
    async fn connect(
        &self,
        _account: &AccountId,
        resume: Option<ResumePoint>,
    ) -> Result<TransportSession, TransportError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (evt_tx, evt_rx) = mpsc::channel(64);
        self.sessions
            .send(ServerSession {
                resume,
                commands: cmd_rx,
                events: evt_tx,
            })
            .await
            .map_err(|_| TransportError::ConnectFailed("test finished".to_string()))?;
        Ok(TransportSession {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

struct NoopProvisioning;

#[async_trait]
impl ProvisioningPort for NoopProvisioning {
    async fn deploy(&self, _account: &AccountId) -> Result<(), ProvisioningError> {
        Ok(())
    }

    async fn undeploy(&self, _account: &AccountId) -> Result<(), ProvisioningError> {
        Ok(())
    }

    async fn fetch_status(&self, _account: &AccountId) -> Result<AccountStatus, ProvisioningError> {
        Ok(AccountStatus::new(
            DeploymentState::Deployed,
            ConnectionStatus::Connected,
        ))
    }
}

/// Records downgrade notifications.
#[derive(Default)]
struct DowngradeProbe {
    seen: Mutex<Vec<(Symbol, Vec<MarketDataSubscription>)>>,
}

#[async_trait]
impl SynchronizationListener for DowngradeProbe {
    async fn on_subscription_downgraded(
        &self,
        _instance: InstanceIndex,
        symbol: &Symbol,
        updates: &[MarketDataSubscription],
    ) -> ListenerResult {
        self.seen.lock().push((symbol.clone(), updates.to_vec()));
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> StreamConfig {
    StreamConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        },
        command_capacity: 32,
        request_timeout: Duration::from_secs(2),
    }
}

async fn open_connection() -> (TerminalConnection, mpsc::Receiver<ServerSession>, ServerSession) {
    let (transport, mut sessions) = FakeTransport::new();
    let lifecycle = Arc::new(AccountLifecycleManager::new(
        "demo123".to_string(),
        Arc::new(NoopProvisioning) as Arc<dyn ProvisioningPort>,
    ));
    lifecycle.apply_status(AccountStatus::new(
        DeploymentState::Deployed,
        ConnectionStatus::Connected,
    ));

    let connection = TerminalConnection::new(lifecycle, transport, fast_config());
    connection.open();

    let session = timeout(Duration::from_secs(2), sessions.recv())
        .await
        .unwrap()
        .unwrap();
    (connection, sessions, session)
}

fn envelope(sequence: u64, event: SyncEvent) -> EventEnvelope {
    EventEnvelope {
        instance: 0,
        sequence,
        event,
    }
}

fn quotes(interval_ms: u64) -> MarketDataSubscription {
    MarketDataSubscription::Quotes {
        interval_ms: Some(interval_ms),
    }
}

/// Answer the next subscribe command with the given response builder.
async fn answer_subscribe(
    session: &mut ServerSession,
    respond: impl FnOnce(String, Symbol, Vec<MarketDataSubscription>) -> SyncEvent,
) {
    let command = timeout(Duration::from_secs(2), session.commands.recv())
        .await
        .unwrap()
        .unwrap();
    let StreamCommand::Subscribe {
        request_id,
        symbol,
        subscriptions,
    } = command
    else {
        panic!("expected subscribe command, got {command:?}");
    };
    session
        .events
        .send(envelope(1, respond(request_id, symbol, subscriptions)))
        .await
        .unwrap();
}

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn ack_round_trip_records_exactly_the_requested_set() {
    let (connection, _sessions, mut session) = open_connection().await;

    let requested = vec![quotes(5000), MarketDataSubscription::Ticks];
    let server = tokio::spawn(async move {
        answer_subscribe(&mut session, |request_id, symbol, subscriptions| {
            SyncEvent::SubscriptionAck {
                request_id,
                symbol,
                granted: subscriptions,
            }
        })
        .await;
        session
    });

    let granted = connection
        .subscribe_to_market_data("EURUSD", &requested)
        .await
        .unwrap();

    assert_eq!(granted, requested);
    assert_eq!(
        connection.subscriptions().tracked("EURUSD").unwrap(),
        requested
    );

    drop(server.await.unwrap());
    connection.close().await;
}

#[tokio::test]
async fn downgrade_resolves_subscribe_with_the_reduced_set() {
    let (connection, _sessions, mut session) = open_connection().await;

    let probe = Arc::new(DowngradeProbe::default());
    connection.add_listener(Arc::clone(&probe) as Arc<dyn SynchronizationListener>);

    let server = tokio::spawn(async move {
        answer_subscribe(&mut session, |request_id, symbol, _subscriptions| {
            SyncEvent::SubscriptionDowngraded {
                request_id: Some(request_id),
                symbol,
                updates: vec![quotes(10_000)],
            }
        })
        .await;
        session
    });

    let granted = connection
        .subscribe_to_market_data("EURUSD", &[quotes(5000), MarketDataSubscription::Ticks])
        .await
        .unwrap();

    // The recorded state equals the downgraded set, not the original.
    assert_eq!(granted, vec![quotes(10_000)]);
    assert_eq!(
        connection.subscriptions().tracked("EURUSD").unwrap(),
        vec![quotes(10_000)]
    );

    // Listeners hear about the downgrade. The subscribe call may
    // resolve before fan-out finishes, so poll briefly.
    timeout(Duration::from_secs(2), async {
        loop {
            let downgrades = probe.seen.lock().clone();
            if downgrades == vec![("EURUSD".to_string(), vec![quotes(10_000)])] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The client must not answer the downgrade with a re-request; that
    // would loop against the server's rate limit.
    let mut session = server.await.unwrap();
    assert!(
        timeout(Duration::from_millis(100), session.commands.recv())
            .await
            .is_err()
    );

    connection.close().await;
}

#[tokio::test]
async fn unsolicited_downgrade_overwrites_the_record() {
    let (connection, _sessions, mut session) = open_connection().await;

    let server = tokio::spawn(async move {
        answer_subscribe(&mut session, |request_id, symbol, subscriptions| {
            SyncEvent::SubscriptionAck {
                request_id,
                symbol,
                granted: subscriptions,
            }
        })
        .await;
        session
    });

    connection
        .subscribe_to_market_data("EURUSD", &[quotes(5000), MarketDataSubscription::Ticks])
        .await
        .unwrap();
    let session = server.await.unwrap();

    // Later, the server reduces the subscription on its own.
    session
        .events
        .send(envelope(
            2,
            SyncEvent::SubscriptionDowngraded {
                request_id: None,
                symbol: "EURUSD".to_string(),
                updates: vec![quotes(10_000)],
            },
        ))
        .await
        .unwrap();

    // The record converges on the server's set.
    timeout(Duration::from_secs(2), async {
        loop {
            if connection.subscriptions().tracked("EURUSD") == Some(vec![quotes(10_000)]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    connection.close().await;
}

// =============================================================================
// Reconnect Replay
// =============================================================================

#[tokio::test]
async fn reconnect_replays_every_active_subscription_exactly_once() {
    let (connection, mut sessions, mut session) = open_connection().await;

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            answer_subscribe(&mut session, |request_id, symbol, subscriptions| {
                SyncEvent::SubscriptionAck {
                    request_id,
                    symbol,
                    granted: subscriptions,
                }
            })
            .await;
        }
        session
    });

    let eurusd = connection
        .subscribe_to_market_data("EURUSD", &[quotes(5000), MarketDataSubscription::Ticks])
        .await
        .unwrap();
    let gbpusd = connection
        .subscribe_to_market_data("GBPUSD", &[quotes(2500)])
        .await
        .unwrap();

    // Simulated transport drop.
    drop(server.await.unwrap());

    let mut session = timeout(Duration::from_secs(2), sessions.recv())
        .await
        .unwrap()
        .unwrap();

    // Both symbols are replayed, each exactly once, in stable order.
    let mut replayed = Vec::new();
    for _ in 0..2 {
        let command = timeout(Duration::from_secs(2), session.commands.recv())
            .await
            .unwrap()
            .unwrap();
        let StreamCommand::Subscribe {
            symbol,
            subscriptions,
            ..
        } = command
        else {
            panic!("expected subscribe command");
        };
        replayed.push((symbol, subscriptions));
    }
    assert_eq!(replayed[0], ("EURUSD".to_string(), eurusd));
    assert_eq!(replayed[1], ("GBPUSD".to_string(), gbpusd));

    // Nothing further: replay happens once per reconnect.
    assert!(
        timeout(Duration::from_millis(100), session.commands.recv())
            .await
            .is_err()
    );

    connection.close().await;
}

#[tokio::test]
async fn unsubscribed_symbols_are_not_replayed() {
    let (connection, mut sessions, mut session) = open_connection().await;

    let server = tokio::spawn(async move {
        answer_subscribe(&mut session, |request_id, symbol, subscriptions| {
            SyncEvent::SubscriptionAck {
                request_id,
                symbol,
                granted: subscriptions,
            }
        })
        .await;
        session
    });

    connection
        .subscribe_to_market_data("EURUSD", &[quotes(5000)])
        .await
        .unwrap();
    let mut session = server.await.unwrap();

    connection
        .unsubscribe_from_market_data("EURUSD")
        .await
        .unwrap();
    let command = timeout(Duration::from_secs(2), session.commands.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(command, StreamCommand::Unsubscribe { ref symbol, .. } if symbol == "EURUSD"));
    assert!(connection.subscriptions().tracked("EURUSD").is_none());

    // After a drop and reconnect there is nothing to replay.
    drop(session);
    let mut session = timeout(Duration::from_secs(2), sessions.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(
        timeout(Duration::from_millis(100), session.commands.recv())
            .await
            .is_err()
    );

    connection.close().await;
}
