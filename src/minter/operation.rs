//! Mint operation state machine

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::LockEvent;

/// Lifecycle state of a mint operation.
///
/// ```text
/// queued -> submitting -> awaiting_confirmation -> confirmed
///                                 |
///                                 +-> retry_scheduled -> submitting ...
///                                 +-> failed_permanent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MintState {
    /// Waiting in the work queue
    Queued,
    /// Building and submitting the destination transaction
    Submitting,
    /// Transaction submitted, polling for its outcome
    AwaitingConfirmation,
    /// Waiting for `next_attempt_at` before the next submission
    RetryScheduled,
    /// Mint observed on the destination chain (terminal)
    Confirmed,
    /// Retries exhausted or conversion failed (terminal, needs manual intervention)
    FailedPermanent,
}

impl MintState {
    /// Returns true for `Confirmed` and `FailedPermanent`.
    pub fn is_terminal(self) -> bool {
        matches!(self, MintState::Confirmed | MintState::FailedPermanent)
    }
}

/// One mint, keyed by the lock id of the event that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct MintOperation {
    /// The accepted lock event
    pub event: LockEvent,
    /// Current state
    pub state: MintState,
    /// Submissions started so far
    pub attempts: u32,
    /// Amount in destination base units, computed at the first submission
    pub converted_amount: Option<u128>,
    /// Hash of the latest destination transaction
    pub destination_tx_hash: Option<String>,
    /// Signer sequence observed before the latest submission
    pub sequence: Option<u64>,
    /// Reason of the latest failure
    pub last_error: Option<String>,
    /// When a scheduled retry becomes due
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Time the operation was created
    pub created_at: DateTime<Utc>,
    /// Time of the last state change
    pub updated_at: DateTime<Utc>,
}

impl MintOperation {
    /// Creates a queued operation for an accepted event.
    pub fn new(event: LockEvent) -> Self {
        let now = Utc::now();
        Self {
            event,
            state: MintState::Queued,
            attempts: 0,
            converted_amount: None,
            destination_tx_hash: None,
            sequence: None,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lock id of the underlying event.
    pub fn lock_id(&self) -> u64 {
        self.event.lock_id
    }

    /// Moves the operation to `state` and stamps `updated_at`.
    pub fn transition(&mut self, state: MintState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
