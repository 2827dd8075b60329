//! Fan-out propagation latency measurement.
//!
//! [`LatencyHarness`] opens N subscriber connections, fires one update through
//! a [`Trigger`], and records how long each subscriber takes to see the
//! resulting notification.
//!
//! ## Round lifecycle
//!
//! 1. [`LatencyHarness::connect`] opens every client (**connecting**)
//! 2. [`LatencyHarness::trigger_update`] arms the clients and fires the
//!    update (**triggered**)
//! 3. [`LatencyHarness::await_propagation`] collects first receipts until all
//!    clients reported or the deadline passed (**awaiting**, then
//!    **finalized**)
//! 4. [`LatencyHarness::begin_next_round`] re-enters **connecting** on the
//!    same client set
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsprobe::{HarnessConfig, LatencyHarness, UpdatePayload};
//!
//! let mut harness = LatencyHarness::from_config(HarnessConfig::new("http://localhost:3010", 100))?;
//! harness.connect().await?;
//! let round = harness.run_round(UpdatePayload::fresh()).await?;
//! println!("p95 = {:?} ms", round.stats.p95);
//! harness.disconnect_all().await;
//! ```

mod client;
mod round;
mod subscriber;
mod trigger;

pub use client::{ClientHandle, ClientId, ClientStatus, Connector, Subscriber};
pub use round::{MeasurementRound, Receipt, RoundPhase, RoundStatus};
pub use subscriber::{WsConnector, WsSubscriber};
pub use trigger::{HttpTrigger, Trigger, UpdatePayload};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, MatchMode};
use crate::error::{Error, Result};
use client::{Arm, RawReceipt, TaskContext, run_client};
use round::duration_ms;

/// Interval at which a propagation wait re-checks for clients that dropped.
const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// A client that could not be connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub client: ClientId,
    pub cause: Error,
}

/// A finished connect attempt.
type Attempt<S> = std::result::Result<(ClientId, Result<S>), JoinError>;

struct PendingRound {
    id: u64,
    sent_at: Instant,
    triggered_at: DateTime<Utc>,
    connected: Vec<ClientId>,
}

/// Drives connect, trigger and propagation rounds over a set of clients.
pub struct LatencyHarness<C: Connector, T: Trigger> {
    config: HarnessConfig,
    connector: Arc<C>,
    trigger: T,
    phase: RoundPhase,
    clients: Vec<Arc<ClientHandle>>,
    failures: Vec<ConnectFailure>,
    tasks: JoinSet<()>,
    arm_tx: watch::Sender<Option<Arc<Arm>>>,
    shutdown_tx: watch::Sender<bool>,
    receipts_tx: mpsc::UnboundedSender<RawReceipt>,
    receipts_rx: mpsc::UnboundedReceiver<RawReceipt>,
    progress: Arc<AtomicUsize>,
    round_id: u64,
    pending: Option<PendingRound>,
}

impl LatencyHarness<WsConnector, HttpTrigger> {
    /// WebSocket subscribers and an HTTP trigger, both from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` or `Error::Tls` if an endpoint is unusable.
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        let connector = WsConnector::new(&config)?;
        let trigger = HttpTrigger::new(&config)?;
        Ok(Self::new(config, connector, trigger))
    }
}

impl<C: Connector, T: Trigger> LatencyHarness<C, T> {
    pub fn new(config: HarnessConfig, connector: C, trigger: T) -> Self {
        let (arm_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (receipts_tx, receipts_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector: Arc::new(connector),
            trigger,
            phase: RoundPhase::Idle,
            clients: Vec::new(),
            failures: Vec::new(),
            tasks: JoinSet::new(),
            arm_tx,
            shutdown_tx,
            receipts_tx,
            receipts_rx,
            progress: Arc::new(AtomicUsize::new(0)),
            round_id: 0,
            pending: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn clients(&self) -> &[Arc<ClientHandle>] {
        &self.clients
    }

    pub fn connect_failures(&self) -> &[ConnectFailure] {
        &self.failures
    }

    pub fn connected_count(&self) -> usize {
        self.clients.iter().filter(|c| c.is_connected()).count()
    }

    /// Open `client_count` connections, staggered by the configured delay.
    ///
    /// Clients that connect while later attempts are still being launched
    /// start reading right away. Failed or timed-out attempts are recorded in
    /// [`connect_failures`](Self::connect_failures) and never abort the batch.
    /// Attempts still pending `connect_phase` after the last launch are
    /// cancelled. Returns the number of connected clients.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPhase` unless the harness is idle.
    pub async fn connect(&mut self) -> Result<usize> {
        self.expect_phase(RoundPhase::Idle, "connect")?;
        self.phase = RoundPhase::Connecting;

        let count = self.config.client_count;
        let stagger = self.config.stagger;
        let per_client = self.config.timeouts.connect;
        info!(clients = count, "connecting clients");

        let mut attempts = JoinSet::new();
        let mut next_launch = Instant::now();
        for id in 0..count {
            loop {
                tokio::select! {
                    biased;
                    () = tokio::time::sleep_until(next_launch) => break,
                    Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                        self.settle_attempt(joined);
                    }
                }
            }
            next_launch = Instant::now() + stagger;
            self.clients.push(Arc::new(ClientHandle::new(id)));

            let connector = Arc::clone(&self.connector);
            attempts.spawn(async move {
                let result = match tokio::time::timeout(per_client, connector.connect(id)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        operation: "connect",
                        millis: per_client.as_millis() as u64,
                    }),
                };
                (id, result)
            });
        }

        let phase_timeout = self.config.timeouts.connect_phase;
        let deadline = Instant::now() + phase_timeout;
        loop {
            match tokio::time::timeout_at(deadline, attempts.join_next()).await {
                Ok(Some(joined)) => self.settle_attempt(joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = attempts.len(), "connect phase timed out");
                    attempts.abort_all();
                    break;
                }
            }
        }

        let stragglers: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| c.status() == ClientStatus::Pending)
            .map(|c| c.id())
            .collect();
        for id in stragglers {
            self.record_failure(
                id,
                Error::Timeout {
                    operation: "connect phase",
                    millis: phase_timeout.as_millis() as u64,
                },
            );
        }

        let connected = self.connected_count();
        if connected < count {
            warn!(connected, requested = count, "some clients failed to connect");
        } else {
            info!(connected, "all clients connected");
        }

        if connected > 0 && !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }
        Ok(connected)
    }

    /// Arm every connected client for a new round and fire the update.
    ///
    /// The round's clock starts just before the request is sent, after the
    /// clients are armed, and that instant is returned once the server
    /// acknowledges. On failure the round is finalized without waiting.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPhase` unless the harness is connecting
    /// - `Error::NoClientsConnected` if no client is connected
    /// - `Error::TriggerRejected` / `Error::TriggerTransport` from the trigger
    pub async fn trigger_update(&mut self, payload: &UpdatePayload) -> Result<Instant> {
        self.expect_phase(RoundPhase::Connecting, "trigger update")?;

        let connected: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| c.id())
            .collect();
        if connected.is_empty() {
            return Err(Error::NoClientsConnected);
        }

        self.round_id += 1;
        let round = self.round_id;
        for client in &self.clients {
            client.reset_receipt();
        }
        self.progress.store(0, Ordering::Release);
        while self.receipts_rx.try_recv().is_ok() {}

        let marker = match self.config.match_mode {
            MatchMode::Marker => Some(payload.marker().to_string()),
            MatchMode::Any => None,
        };
        self.arm_tx
            .send_replace(Some(Arc::new(Arm { round, marker })));
        info!(round, clients = connected.len(), "triggering update");

        let sent_at = Instant::now();
        let triggered_at = Utc::now();
        let limit = self.config.timeouts.trigger;
        let outcome = match tokio::time::timeout(limit, self.trigger.fire(payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::TriggerTransport(format!(
                "no response within {} ms",
                limit.as_millis()
            ))),
        };

        match outcome {
            Ok(()) => {
                debug!(
                    round,
                    ack_ms = duration_ms(sent_at.elapsed()),
                    "trigger acknowledged"
                );
                self.pending = Some(PendingRound {
                    id: round,
                    sent_at,
                    triggered_at,
                    connected,
                });
                self.phase = RoundPhase::Triggered;
                Ok(sent_at)
            }
            Err(e) => {
                warn!(round, error = %e, "trigger failed");
                self.arm_tx.send_replace(None);
                self.phase = RoundPhase::Finalized;
                Err(e)
            }
        }
    }

    /// Collect first receipts until every client connected at trigger time
    /// reported or `deadline` after the trigger was sent elapsed.
    ///
    /// A receipt stamped before the send is not a sample. It is counted in
    /// [`MeasurementRound::early_receipts`] and its client is reported
    /// missing.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPhase` unless an update was just triggered.
    pub async fn await_propagation(&mut self, deadline: Duration) -> Result<MeasurementRound> {
        self.expect_phase(RoundPhase::Triggered, "await propagation")?;
        let Some(pending) = self.pending.take() else {
            return Err(Error::InvalidPhase {
                phase: self.phase,
                operation: "await propagation",
            });
        };
        self.phase = RoundPhase::Awaiting;

        let expected: HashSet<ClientId> = pending.connected.iter().copied().collect();
        let until = pending.sent_at + deadline;
        let mut seen = HashSet::with_capacity(expected.len());
        let mut receipts = Vec::with_capacity(expected.len());
        let mut early = Vec::new();
        let mut reported = 0;

        while seen.len() < expected.len() {
            let now = Instant::now();
            if now >= until {
                break;
            }
            let tick = until.min(now + PROGRESS_TICK);
            match tokio::time::timeout_at(tick, self.receipts_rx.recv()).await {
                Ok(Some(raw)) => {
                    if raw.round != pending.id
                        || !expected.contains(&raw.client)
                        || !seen.insert(raw.client)
                    {
                        continue;
                    }
                    if raw.at < pending.sent_at {
                        debug!(client = raw.client, "receipt stamped before the trigger was sent");
                        early.push(raw.client);
                        continue;
                    }
                    let elapsed = raw.at.duration_since(pending.sent_at);
                    debug!(client = raw.client, elapsed_ms = duration_ms(elapsed), "receipt");
                    receipts.push(Receipt {
                        client: raw.client,
                        elapsed,
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    let progress = self.progress.load(Ordering::Acquire);
                    if progress != reported {
                        reported = progress;
                        debug!(received = progress, expected = expected.len(), "progress");
                    }
                    let outstanding_alive = self
                        .clients
                        .iter()
                        .any(|c| expected.contains(&c.id()) && !seen.contains(&c.id()) && c.is_connected());
                    if !outstanding_alive {
                        warn!("every outstanding client disconnected");
                        break;
                    }
                }
            }
        }
        self.arm_tx.send_replace(None);

        let mut missing: Vec<ClientId> = expected
            .difference(&seen)
            .copied()
            .chain(early.iter().copied())
            .collect();
        missing.sort_unstable();
        let round = MeasurementRound::finalize(
            pending.id,
            pending.triggered_at,
            expected.len(),
            receipts,
            missing,
            early.len(),
        );
        self.phase = RoundPhase::Finalized;

        match round.status {
            RoundStatus::Complete => {
                info!(round = round.id, received = round.received(), "all clients received the update");
            }
            _ => warn!(
                round = round.id,
                received = round.received(),
                connected = round.connected,
                "round finished with clients missing"
            ),
        }
        if round.early_receipts() > 0 {
            warn!(
                early = round.early_receipts(),
                "discarded notifications stamped before the trigger was sent"
            );
        }
        Ok(round)
    }

    /// Trigger one update and wait for it with the configured propagation
    /// timeout. A trigger failure yields a `TriggerFailed` round.
    ///
    /// Re-enters the connecting phase first if a previous round finished.
    ///
    /// # Errors
    ///
    /// Phase errors and `Error::NoClientsConnected`.
    pub async fn run_round(&mut self, payload: UpdatePayload) -> Result<MeasurementRound> {
        if self.phase == RoundPhase::Finalized {
            self.begin_next_round()?;
        }
        let connected = self.connected_count();

        match self.trigger_update(&payload).await {
            Ok(_) => {
                let deadline = self.config.timeouts.propagation;
                self.await_propagation(deadline).await
            }
            Err(e) if e.is_trigger_failure() => Ok(MeasurementRound::trigger_failed(
                self.round_id,
                connected,
                e.to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Move from a finalized round back to connecting, keeping the client set.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPhase` unless finalized, `Error::NoClientsConnected` if
    /// every client has dropped.
    pub fn begin_next_round(&mut self) -> Result<usize> {
        self.expect_phase(RoundPhase::Finalized, "begin next round")?;
        let connected = self.connected_count();
        if connected == 0 {
            return Err(Error::NoClientsConnected);
        }
        self.phase = RoundPhase::Connecting;
        Ok(connected)
    }

    /// Close every connection. Tasks that do not finish within the disconnect
    /// timeout are aborted. Calling it again is a no-op.
    pub async fn disconnect_all(&mut self) {
        self.arm_tx.send_replace(None);
        self.shutdown_tx.send_replace(true);

        if !self.tasks.is_empty() {
            info!(clients = self.tasks.len(), "disconnecting clients");
            let tasks = &mut self.tasks;
            let grace = self.config.timeouts.disconnect;
            let drained = tokio::time::timeout(grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = self.tasks.len(), "aborting clients that did not close in time");
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
            }
        }

        for client in &self.clients {
            client.set_status(ClientStatus::Disconnected);
        }
    }

    fn expect_phase(&self, expected: RoundPhase, operation: &'static str) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(Error::InvalidPhase {
                phase: self.phase,
                operation,
            })
        }
    }

    fn settle_attempt(&mut self, joined: Attempt<C::Subscriber>) {
        match joined {
            Ok((id, Ok(subscriber))) => self.attach(id, subscriber),
            Ok((id, Err(cause))) => self.record_failure(id, cause),
            Err(e) => warn!(error = %e, "connect task failed"),
        }
    }

    fn attach(&mut self, id: ClientId, subscriber: C::Subscriber) {
        let Some(handle) = self.clients.get(id).cloned() else {
            return;
        };
        handle.set_status(ClientStatus::Connected);
        debug!(client = id, "client connected");

        let ctx = TaskContext {
            arm: self.arm_tx.subscribe(),
            shutdown: self.shutdown_tx.subscribe(),
            receipts: self.receipts_tx.clone(),
            progress: Arc::clone(&self.progress),
        };
        self.tasks.spawn(run_client(subscriber, handle, ctx));
    }

    fn record_failure(&mut self, id: ClientId, cause: Error) {
        if let Some(handle) = self.clients.get(id) {
            handle.set_status(ClientStatus::Disconnected);
        }
        debug!(client = id, error = %cause, "client failed to connect");
        self.failures.push(ConnectFailure { client: id, cause });
    }
}
