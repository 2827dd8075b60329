//! Round lifecycle and results.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::harness::client::ClientId;
use crate::stats::{Summary, summarize};

/// Harness state machine:
/// `idle → connecting → triggered → awaiting → finalized`.
///
/// A further round re-enters `connecting` from `finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoundPhase {
    #[default]
    Idle,
    Connecting,
    Triggered,
    Awaiting,
    Finalized,
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Connecting => "connecting",
            RoundPhase::Triggered => "triggered",
            RoundPhase::Awaiting => "awaiting",
            RoundPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Final status of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundStatus {
    /// Every connected client reported.
    Complete,
    /// The propagation deadline passed with clients outstanding.
    Partial { missing: usize },
    /// The trigger request failed; nothing was measured.
    TriggerFailed { cause: String },
}

impl RoundStatus {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, RoundStatus::Complete)
    }
}

/// First matching notification of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub client: ClientId,
    /// Time from sending the trigger request to receipt.
    pub elapsed: Duration,
}

/// Outcome of one trigger/propagation cycle. Immutable once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRound {
    pub id: u64,
    /// Wall-clock time the trigger request was sent, `None` if the trigger
    /// failed.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Clients connected when the round was armed.
    pub connected: usize,
    /// Receipts in arrival order.
    pub receipts: Vec<Receipt>,
    /// Connected clients without a receipt.
    pub missing: Vec<ClientId>,
    /// Notifications stamped before the trigger was sent. They are not
    /// samples and their clients are listed in `missing`.
    pub early: usize,
    pub stats: Summary,
    pub status: RoundStatus,
}

impl MeasurementRound {
    pub(crate) fn finalize(
        id: u64,
        triggered_at: DateTime<Utc>,
        connected: usize,
        receipts: Vec<Receipt>,
        missing: Vec<ClientId>,
        early: usize,
    ) -> Self {
        let elapsed: Vec<f64> = receipts.iter().map(|r| duration_ms(r.elapsed)).collect();
        let status = if missing.is_empty() {
            RoundStatus::Complete
        } else {
            RoundStatus::Partial {
                missing: missing.len(),
            }
        };
        Self {
            id,
            triggered_at: Some(triggered_at),
            connected,
            receipts,
            missing,
            early,
            stats: summarize(&elapsed),
            status,
        }
    }

    pub(crate) fn trigger_failed(id: u64, connected: usize, cause: String) -> Self {
        Self {
            id,
            triggered_at: None,
            connected,
            receipts: Vec::new(),
            missing: Vec::new(),
            early: 0,
            stats: Summary::default(),
            status: RoundStatus::TriggerFailed { cause },
        }
    }

    /// Elapsed times in milliseconds, in arrival order.
    #[must_use]
    pub fn elapsed_ms(&self) -> Vec<f64> {
        self.receipts.iter().map(|r| duration_ms(r.elapsed)).collect()
    }

    /// Elapsed time for `client`, `None` if it never reported.
    #[must_use]
    pub fn elapsed_for(&self, client: ClientId) -> Option<Duration> {
        self.receipts
            .iter()
            .find(|r| r.client == client)
            .map(|r| r.elapsed)
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.receipts.len()
    }

    #[must_use]
    pub fn early_receipts(&self) -> usize {
        self.early
    }
}

pub(crate) fn duration_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(client: ClientId, ms: u64) -> Receipt {
        Receipt {
            client,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RoundPhase::Idle.to_string(), "idle");
        assert_eq!(RoundPhase::Awaiting.to_string(), "awaiting");
    }

    #[test]
    fn test_finalize_complete() {
        let round = MeasurementRound::finalize(
            1,
            Utc::now(),
            2,
            vec![receipt(1, 20), receipt(0, 10)],
            vec![],
            0,
        );
        assert_eq!(round.status, RoundStatus::Complete);
        assert_eq!(round.elapsed_ms(), vec![20.0, 10.0]);
        assert_eq!(round.stats.count, 2);
        assert_eq!(round.elapsed_for(0), Some(Duration::from_millis(10)));
        assert_eq!(round.elapsed_for(5), None);
    }

    #[test]
    fn test_finalize_partial() {
        let round = MeasurementRound::finalize(1, Utc::now(), 3, vec![receipt(0, 10)], vec![1, 2], 0);
        assert_eq!(round.status, RoundStatus::Partial { missing: 2 });
        assert_eq!(round.received(), 1);
    }

    #[test]
    fn test_early_notifications_are_not_samples() {
        let round =
            MeasurementRound::finalize(2, Utc::now(), 3, vec![receipt(0, 12)], vec![1, 2], 2);
        assert_eq!(round.early_receipts(), 2);
        assert_eq!(round.stats.count, 1);
        assert_eq!(round.elapsed_ms(), vec![12.0]);
        assert_eq!(round.status, RoundStatus::Partial { missing: 2 });
    }

    #[test]
    fn test_trigger_failed_has_no_stats() {
        let round = MeasurementRound::trigger_failed(3, 10, "HTTP 500".into());
        assert!(matches!(round.status, RoundStatus::TriggerFailed { .. }));
        assert_eq!(round.stats.count, 0);
        assert!(round.stats.mean.is_none());
        assert!(round.triggered_at.is_none());
    }
}
