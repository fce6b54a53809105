//! Synchronization Stream Supervisor
//!
//! Maintains exactly one logical terminal connection per account,
//! transparently reconnecting on transport failure with exponential
//! backoff. Incoming envelopes are pumped through a single path into
//! the terminal cache and the listener dispatcher, preserving
//! per-instance arrival order; outbound subscribe/trade commands share
//! one command channel and are safe to issue from any task.
//!
//! # Failure semantics
//!
//! Transport errors below the configured attempt ceiling are absorbed:
//! they are logged, counted against the backoff, and never surfaced to
//! callers. Once the ceiling is exhausted the stream enters a terminal
//! `Failed` state: every waiter is released with a connectivity error,
//! outstanding trades are failed, tracked subscriptions are cleared,
//! and the stream stays down until an explicit reopen.
//!
//! The supervisor task's lifetime is bound to `open()`/`close()` via a
//! cancellation token, so teardown is deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{ResumePoint, TerminalTransport, TransportSession};
use crate::application::services::dispatch::ListenerDispatch;
use crate::application::services::lifecycle::AccountLifecycleManager;
use crate::application::services::reconnect::{BackoffConfig, ReconnectBackoff};
use crate::application::services::trade::TradeGateway;
use crate::domain::account::AccountId;
use crate::domain::events::{EventEnvelope, InstanceIndex, StreamCommand, SyncEvent};
use crate::domain::subscription::{MarketDataSubscription, SubscriptionManager};
use crate::domain::terminal::TerminalStateCache;

/// Instance index used for session-level listener notifications, where
/// no replica-tagged envelope is available.
const SESSION_INSTANCE: InstanceIndex = 0;

// =============================================================================
// Configuration and State
// =============================================================================

/// Configuration of the stream supervisor.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Reconnect backoff schedule.
    pub backoff: BackoffConfig,
    /// Capacity of the outbound command channel.
    pub command_capacity: usize,
    /// Budget for subscribe acknowledgments and trade responses.
    pub request_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            command_capacity: 256,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Never opened, or closed and not reopened.
    #[default]
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// A terminal session is live.
    Connected,
    /// Session lost; reconnecting with backoff.
    Reconnecting,
    /// Reconnect attempts exhausted; terminal until reopen.
    Failed,
    /// Closed by the caller.
    Closed,
}

/// Synchronization progress of the active instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SyncProgress {
    /// No full state transfer has completed yet.
    #[default]
    Pending,
    /// The cache holds a complete synchronized snapshot.
    Synchronized,
    /// The stream failed before (or after) synchronizing.
    Failed,
}

/// Errors returned by stream waits.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reconnect attempts were exhausted; the stream is down until an
    /// explicit reopen.
    #[error("stream failed after exhausting reconnect attempts")]
    ConnectivityFailure,

    /// A wait exceeded its budget. The stream itself keeps running.
    #[error("timed out after {0:?} waiting for synchronization")]
    Timeout(Duration),
}

/// Errors returned by subscribe calls.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// The command could not be delivered or the stream died before
    /// the server answered.
    #[error("subscribe command could not be delivered: {0}")]
    Connectivity(String),

    /// No acknowledgment arrived within the budget.
    #[error("no subscription acknowledgment within {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// Stream
// =============================================================================

struct StreamShared {
    account: AccountId,
    config: StreamConfig,
    transport: Arc<dyn TerminalTransport>,
    cache: Arc<TerminalStateCache>,
    subscriptions: Arc<SubscriptionManager>,
    dispatch: Arc<ListenerDispatch>,
    lifecycle: Arc<AccountLifecycleManager>,
    trades: Arc<TradeGateway>,
    state_tx: watch::Sender<StreamState>,
    sync_tx: watch::Sender<SyncProgress>,
    acks: Mutex<HashMap<String, oneshot::Sender<Vec<MarketDataSubscription>>>>,
    resume: Mutex<Option<ResumePoint>>,
    active_instance: Mutex<Option<InstanceIndex>>,
}

enum SessionEnd {
    /// The caller cancelled; stop without reconnecting.
    Cancelled,
    /// The transport session died; reconnect.
    Disconnected,
}

/// Supervised duplex connection to the remote terminal.
pub struct SynchronizationStream {
    shared: Arc<StreamShared>,
    cmd_tx: mpsc::Sender<StreamCommand>,
    cmd_rx_slot: Arc<Mutex<Option<mpsc::Receiver<StreamCommand>>>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SynchronizationStream {
    /// Create a stream for one account. The stream is inert until
    /// [`Self::open`] is called.
    #[must_use]
    pub fn new(
        account: AccountId,
        transport: Arc<dyn TerminalTransport>,
        cache: Arc<TerminalStateCache>,
        subscriptions: Arc<SubscriptionManager>,
        dispatch: Arc<ListenerDispatch>,
        lifecycle: Arc<AccountLifecycleManager>,
        config: StreamConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let trades = Arc::new(TradeGateway::new(cmd_tx.clone(), config.request_timeout));
        let (state_tx, _) = watch::channel(StreamState::Idle);
        let (sync_tx, _) = watch::channel(SyncProgress::Pending);

        let shared = Arc::new(StreamShared {
            account,
            config,
            transport,
            cache,
            subscriptions,
            dispatch,
            lifecycle,
            trades,
            state_tx,
            sync_tx,
            acks: Mutex::new(HashMap::new()),
            resume: Mutex::new(None),
            active_instance: Mutex::new(None),
        });

        Self {
            shared,
            cmd_tx,
            cmd_rx_slot: Arc::new(Mutex::new(Some(cmd_rx))),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// The gateway submitting trades over this stream.
    #[must_use]
    pub fn trades(&self) -> Arc<TradeGateway> {
        Arc::clone(&self.shared.trades)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.shared.state_tx.subscribe()
    }

    /// Start the supervisor task. Idempotent while already open.
    pub fn open(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let Some(cmd_rx) = self.cmd_rx_slot.lock().take() else {
            return;
        };

        // A fresh open after a failure starts a clean retry schedule.
        self.shared.sync_tx.send_replace(SyncProgress::Pending);

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let shared = Arc::clone(&self.shared);
        let slot = Arc::clone(&self.cmd_rx_slot);
        *task = Some(tokio::spawn(async move {
            let cmd_rx = run_supervisor(shared, cancel, cmd_rx).await;
            *slot.lock() = Some(cmd_rx);
        }));
    }

    /// Stop the supervisor task and wait for it to finish.
    pub async fn close(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "Stream supervisor task panicked");
            }
        }
        self.shared.state_tx.send_replace(StreamState::Closed);
    }

    /// Wait until the cache holds a fully synchronized snapshot.
    pub async fn wait_synchronized(&self, timeout: Duration) -> Result<(), StreamError> {
        let mut rx = self.shared.sync_tx.subscribe();
        let wait = rx.wait_for(|progress| *progress != SyncProgress::Pending);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(progress)) if *progress == SyncProgress::Synchronized => Ok(()),
            Ok(_) => Err(StreamError::ConnectivityFailure),
            Err(_) => Err(StreamError::Timeout(timeout)),
        }
    }

    /// Subscribe a symbol to market data, merging with the active set.
    ///
    /// Resolves once the server acknowledges or downgrades; the returned
    /// set is the one actually in effect.
    pub async fn subscribe(
        &self,
        symbol: &str,
        requested: &[MarketDataSubscription],
    ) -> Result<Vec<MarketDataSubscription>, SubscribeError> {
        let merged = self.shared.subscriptions.merge_request(symbol, requested);
        let request_id = Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        self.shared.acks.lock().insert(request_id.clone(), tx);

        let command = StreamCommand::Subscribe {
            request_id: request_id.clone(),
            symbol: symbol.to_string(),
            subscriptions: merged,
        };
        if let Err(error) = self.cmd_tx.send(command).await {
            self.shared.acks.lock().remove(&request_id);
            return Err(SubscribeError::Connectivity(error.to_string()));
        }

        let budget = self.shared.config.request_timeout;
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(granted)) => Ok(granted),
            Ok(Err(_)) => Err(SubscribeError::Connectivity(
                "stream closed before the server acknowledged".to_string(),
            )),
            Err(_) => {
                self.shared.acks.lock().remove(&request_id);
                Err(SubscribeError::Timeout(budget))
            }
        }
    }

    /// Remove every market data subscription for a symbol.
    pub async fn unsubscribe(&self, symbol: &str) -> Result<(), SubscribeError> {
        self.shared.subscriptions.remove(symbol);
        let command = StreamCommand::Unsubscribe {
            request_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
        };
        self.cmd_tx
            .send(command)
            .await
            .map_err(|error| SubscribeError::Connectivity(error.to_string()))
    }
}

// =============================================================================
// Supervisor Loop
// =============================================================================

async fn run_supervisor(
    shared: Arc<StreamShared>,
    cancel: CancellationToken,
    mut cmd_rx: mpsc::Receiver<StreamCommand>,
) -> mpsc::Receiver<StreamCommand> {
    let mut backoff = ReconnectBackoff::new(shared.config.backoff.clone());

    loop {
        if cancel.is_cancelled() {
            shared.state_tx.send_replace(StreamState::Closed);
            return cmd_rx;
        }

        shared.state_tx.send_replace(if backoff.attempts() == 0 {
            StreamState::Connecting
        } else {
            StreamState::Reconnecting
        });

        let resume = *shared.resume.lock();
        match shared.transport.connect(&shared.account, resume).await {
            Ok(session) => {
                backoff.reset();
                tracing::info!(account = %shared.account, resumed = resume.is_some(), "Terminal session established");
                shared.state_tx.send_replace(StreamState::Connected);
                shared.cache.set_connected(true);
                if resume.is_none() {
                    // Full state transfer ahead: cached data reads as
                    // stale until the new synchronized event lands.
                    shared.cache.mark_all_unsynchronized();
                    shared.sync_tx.send_replace(SyncProgress::Pending);
                }
                shared.dispatch.notify_connected(SESSION_INSTANCE).await;

                replay_subscriptions(&shared, &session).await;

                let end = pump_session(&shared, &cancel, &mut cmd_rx, session).await;

                shared.cache.set_connected(false);
                shared
                    .dispatch
                    .dispatch(&EventEnvelope {
                        instance: SESSION_INSTANCE,
                        sequence: 0,
                        event: SyncEvent::Disconnected,
                    })
                    .await;

                if matches!(end, SessionEnd::Cancelled) {
                    shared.state_tx.send_replace(StreamState::Closed);
                    return cmd_rx;
                }
                tracing::warn!(account = %shared.account, "Terminal session lost");
            }
            Err(error) => {
                tracing::warn!(account = %shared.account, error = %error, "Terminal connect failed");
            }
        }

        // Retries are unbounded while the account stays deployed; when
        // it is not, hold off until redeployment instead of burning the
        // attempt budget against a terminal that cannot exist.
        if !shared.lifecycle.status().is_deployed() {
            let mut status_rx = shared.lifecycle.watch_status();
            tokio::select! {
                () = cancel.cancelled() => {
                    shared.state_tx.send_replace(StreamState::Closed);
                    return cmd_rx;
                }
                result = status_rx.wait_for(|status| status.is_deployed()) => {
                    if result.is_ok() {
                        backoff.reset();
                        continue;
                    }
                }
            }
        }

        match backoff.next_delay() {
            Some(delay) => {
                tracing::info!(
                    account = %shared.account,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis(),
                    "Reconnecting to terminal"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        shared.state_tx.send_replace(StreamState::Closed);
                        return cmd_rx;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                fail_terminally(&shared);
                return cmd_rx;
            }
        }
    }
}

/// Release every waiter and enter the terminal failed state.
fn fail_terminally(shared: &StreamShared) {
    tracing::error!(account = %shared.account, "Reconnect attempts exhausted; stream failed");
    shared.state_tx.send_replace(StreamState::Failed);
    shared.sync_tx.send_replace(SyncProgress::Failed);
    shared.trades.fail_all_pending();
    shared.acks.lock().clear();
    // Server-side subscription state is gone; a reopen starts fresh.
    shared.subscriptions.clear();
}

/// Re-send every tracked subscription after a reconnect.
///
/// The server retains no subscription state across a full reconnect, so
/// each symbol's acknowledged set goes upstream exactly once.
async fn replay_subscriptions(shared: &StreamShared, session: &TransportSession) {
    for (symbol, subscriptions) in shared.subscriptions.replay_set() {
        let command = StreamCommand::Subscribe {
            request_id: Uuid::new_v4().to_string(),
            symbol: symbol.clone(),
            subscriptions,
        };
        if session.commands.send(command).await.is_err() {
            tracing::warn!(symbol = %symbol, "Session died while replaying subscriptions");
            return;
        }
        tracing::debug!(symbol = %symbol, "Replayed subscription after reconnect");
    }
}

async fn pump_session(
    shared: &StreamShared,
    cancel: &CancellationToken,
    cmd_rx: &mut mpsc::Receiver<StreamCommand>,
    mut session: TransportSession,
) -> SessionEnd {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            command = cmd_rx.recv() => {
                match command {
                    Some(command) => {
                        if session.commands.send(command).await.is_err() {
                            return SessionEnd::Disconnected;
                        }
                    }
                    // Every sender dropped: the owning stream is gone.
                    None => return SessionEnd::Cancelled,
                }
            }
            envelope = session.events.recv() => {
                match envelope {
                    Some(envelope) => handle_envelope(shared, envelope).await,
                    None => return SessionEnd::Disconnected,
                }
            }
        }
    }
}

async fn handle_envelope(shared: &StreamShared, envelope: EventEnvelope) {
    update_resume(shared, &envelope);

    match &envelope.event {
        SyncEvent::TradeResponse { response } => {
            shared.trades.handle_response(response.clone());
        }
        SyncEvent::SubscriptionAck {
            request_id,
            symbol,
            granted,
        } => {
            shared.subscriptions.apply_ack(symbol, granted);
            resolve_ack(shared, request_id, granted.clone());
        }
        SyncEvent::SubscriptionDowngraded {
            request_id,
            symbol,
            updates,
        } => {
            tracing::warn!(
                symbol = %symbol,
                "Server downgraded market data subscription due to rate limits"
            );
            shared.subscriptions.apply_downgrade(symbol, updates);
            if let Some(request_id) = request_id {
                // The reduced set satisfies the pending subscribe call;
                // re-requesting the original would loop against the
                // server's rate limit.
                resolve_ack(shared, request_id, updates.clone());
            }
            shared.dispatch.dispatch(&envelope).await;
        }
        SyncEvent::StatusChanged { status } => {
            shared.lifecycle.apply_status(*status);
            shared.cache.apply(&envelope);
        }
        SyncEvent::Synchronized { .. } => {
            *shared.active_instance.lock() = Some(envelope.instance);
            shared.cache.apply(&envelope);
            if shared.cache.is_synchronized() {
                shared.sync_tx.send_replace(SyncProgress::Synchronized);
            }
            shared.dispatch.dispatch(&envelope).await;
        }
        _ => {
            shared.cache.apply(&envelope);
            shared.dispatch.dispatch(&envelope).await;
        }
    }
}

fn resolve_ack(shared: &StreamShared, request_id: &str, granted: Vec<MarketDataSubscription>) {
    let waiter = shared.acks.lock().remove(request_id);
    match waiter {
        Some(tx) => {
            // The subscriber may have timed out meanwhile; nothing to do.
            let _ = tx.send(granted);
        }
        None => {
            tracing::debug!(
                request_id = %request_id,
                "Dropping subscription acknowledgment without outstanding request"
            );
        }
    }
}

/// Track the highest sequence seen on the active instance as the resume
/// marker for the next reconnect.
fn update_resume(shared: &StreamShared, envelope: &EventEnvelope) {
    let tracked = shared
        .active_instance
        .lock()
        .unwrap_or(envelope.instance);
    if envelope.instance != tracked {
        return;
    }

    let mut resume = shared.resume.lock();
    match resume.as_mut() {
        Some(point) if point.instance == envelope.instance => {
            if envelope.sequence > point.sequence {
                point.sequence = envelope.sequence;
            }
        }
        _ => {
            *resume = Some(ResumePoint {
                instance: envelope.instance,
                sequence: envelope.sequence,
            });
        }
    }
}
