//! Per-client state and the subscriber seam.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

/// Sequence number of a client within a session.
pub type ClientId = usize;

/// Connection status of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientStatus {
    Pending = 0,
    Connected = 1,
    Disconnected = 2,
}

impl ClientStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientStatus::Pending,
            1 => ClientStatus::Connected,
            _ => ClientStatus::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    round: u64,
    at: Instant,
}

/// One subscriber as seen by the harness.
///
/// The first-receipt slot is written only by the client's own task and holds
/// at most one receipt per round.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    status: AtomicU8,
    first_receipt: Mutex<Option<Slot>>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            status: AtomicU8::new(ClientStatus::Pending as u8),
            first_receipt: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> ClientStatus {
        ClientStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ClientStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Connected
    }

    /// First receipt time recorded for `round`.
    #[must_use]
    pub fn first_receipt(&self, round: u64) -> Option<Instant> {
        self.slot()
            .filter(|slot| slot.round == round)
            .map(|slot| slot.at)
    }

    /// Record a receipt for `round`. Returns `false` if one is already held.
    pub fn record_receipt(&self, round: u64, at: Instant) -> bool {
        let mut slot = self
            .first_receipt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some(existing) if existing.round == round => false,
            _ => {
                *slot = Some(Slot { round, at });
                true
            }
        }
    }

    /// Clear the slot ahead of a new round.
    pub fn reset_receipt(&self) {
        *self
            .first_receipt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn slot(&self) -> Option<Slot> {
        *self
            .first_receipt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// An open notification stream for one client.
pub trait Subscriber: Send + 'static {
    /// Next notification body. `Ok(None)` once the server ended the stream.
    fn next_notification(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Close the stream.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens subscribers. Shared by every connect attempt.
pub trait Connector: Send + Sync + 'static {
    type Subscriber: Subscriber;

    /// Open and acknowledge one subscription.
    fn connect(&self, id: ClientId) -> impl Future<Output = Result<Self::Subscriber>> + Send;
}

/// Which round is currently accepting receipts, and what a matching
/// notification must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Arm {
    pub round: u64,
    pub marker: Option<String>,
}

impl Arm {
    fn matches(&self, body: &str) -> bool {
        self.marker
            .as_deref()
            .is_none_or(|marker| body.contains(marker))
    }
}

/// Receipt as reported by a client task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawReceipt {
    pub client: ClientId,
    pub round: u64,
    pub at: Instant,
}

/// Channels a client task shares with the harness.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub arm: watch::Receiver<Option<Arc<Arm>>>,
    pub shutdown: watch::Receiver<bool>,
    pub receipts: mpsc::UnboundedSender<RawReceipt>,
    pub progress: Arc<AtomicUsize>,
}

/// Read notifications until shutdown or the stream ends, recording the first
/// match per round.
pub(crate) async fn run_client<S: Subscriber>(
    mut subscriber: S,
    handle: Arc<ClientHandle>,
    mut ctx: TaskContext,
) {
    let id = handle.id();
    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.changed() => break,
            next = subscriber.next_notification() => match next {
                Ok(Some(body)) => {
                    let at = Instant::now();
                    let arm = ctx.arm.borrow().clone();
                    let Some(arm) = arm else { continue };
                    if arm.matches(&body) && handle.record_receipt(arm.round, at) {
                        let received = ctx.progress.fetch_add(1, Ordering::AcqRel) + 1;
                        debug!(client = id, round = arm.round, received, "notification received");
                        let _ = ctx.receipts.send(RawReceipt {
                            client: id,
                            round: arm.round,
                            at,
                        });
                    }
                }
                Ok(None) => {
                    debug!(client = id, "server closed the stream");
                    break;
                }
                Err(e) => {
                    warn!(client = id, error = %e, "subscriber failed");
                    break;
                }
            }
        }
    }

    handle.set_status(ClientStatus::Disconnected);
    if let Err(e) = subscriber.close().await {
        debug!(client = id, error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let handle = ClientHandle::new(7);
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.status(), ClientStatus::Pending);
        handle.set_status(ClientStatus::Connected);
        assert!(handle.is_connected());
        handle.set_status(ClientStatus::Disconnected);
        assert_eq!(handle.status(), ClientStatus::Disconnected);
    }

    #[test]
    fn test_first_receipt_is_never_overwritten() {
        let handle = ClientHandle::new(0);
        let first = Instant::now();
        let later = first + std::time::Duration::from_millis(5);

        assert!(handle.record_receipt(1, first));
        assert!(!handle.record_receipt(1, later));
        assert_eq!(handle.first_receipt(1), Some(first));
        assert_eq!(handle.first_receipt(2), None);
    }

    #[test]
    fn test_reset_clears_slot() {
        let handle = ClientHandle::new(0);
        let at = Instant::now();
        assert!(handle.record_receipt(1, at));
        handle.reset_receipt();
        assert_eq!(handle.first_receipt(1), None);
        assert!(handle.record_receipt(2, at));
        assert_eq!(handle.first_receipt(2), Some(at));
    }

    #[test]
    fn test_arm_matching() {
        let marker = Arm {
            round: 1,
            marker: Some("abc123".into()),
        };
        assert!(marker.matches(r#"{"name":"Gold abc123"}"#));
        assert!(!marker.matches(r#"{"name":"Gold ffff00"}"#));

        let any = Arm {
            round: 1,
            marker: None,
        };
        assert!(any.matches("anything"));
    }
}
