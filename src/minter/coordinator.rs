//! Mint Coordinator
//!
//! Consumes accepted lock events, deduplicates them by lock id and drives each
//! through the mint state machine against the destination chain. Submissions are
//! strictly serialized: the signer's sequence number is shared by every mint, so
//! at most one operation is in flight at a time.
//!
//! Flow per operation:
//! 1. **queued -> submitting**: convert the amount once, load the signer
//!    sequence, submit the mint
//! 2. **submitting -> awaiting_confirmation**: poll the transaction until it is
//!    final or `confirmation_timeout_ms` elapses
//! 3. **confirmed** on success; otherwise **retry_scheduled** while attempts
//!    remain, then **failed_permanent**
//!
//! Retries wait in the PendingSet with a wake time and are moved back to the
//! FIFO queue by the same loop once due.
//!
//! On stop, queued operations keep being processed until the queue is empty or
//! `shutdown_drain_timeout_ms` has passed. Anything left is logged per lock at
//! error level for replay; the watcher's cursor has already moved past it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decimals::convert_amount;
use super::generic::{MintClient, MintError, MintRequest, TxStatus};
use super::operation::{MintOperation, MintState};
use crate::config::{Config, MinterConfig};
use crate::monitor::LockEvent;

// ============================================================================
// STATUS
// ============================================================================

/// Snapshot of the coordinator, readable by the supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStatus {
    /// Whether the processing loop is running
    pub running: bool,
    /// Operations waiting in the FIFO queue
    pub queue_length: usize,
    /// Non-terminal operations (queued, in flight or waiting for a retry)
    pub pending_mints: usize,
    /// Lock id of the operation currently being submitted or confirmed
    pub in_flight: Option<u64>,
    /// Events received from the lock watcher, duplicates included
    pub total_received: u64,
    /// Operations that reached a terminal state
    pub total_processed: u64,
    /// Operations confirmed on the destination chain
    pub total_confirmed: u64,
    /// Operations that failed permanently
    pub total_failed: u64,
    /// Re-delivered events discarded by lock id
    pub total_duplicates: u64,
    /// Retries scheduled
    pub total_retries: u64,
    /// Failed submission attempts
    pub total_errors: u64,
    /// Time of the last confirmation
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

/// Result of waiting for a submitted transaction.
enum Confirmation {
    Success,
    Failed(String),
    TimedOut,
}

// ============================================================================
// MINT COORDINATOR
// ============================================================================

/// Serializes mint submissions for accepted lock events.
pub struct MintCoordinator {
    config: MinterConfig,
    source_decimals: u32,
    dest_decimals: u32,
    client: Arc<dyn MintClient>,
    receiver: mpsc::UnboundedReceiver<LockEvent>,
    channel_closed: bool,
    /// PendingSet: non-terminal operations keyed by lock id
    pending: HashMap<u64, MintOperation>,
    /// FIFO work queue of lock ids in `Queued` state
    queue: VecDeque<u64>,
    /// Lock ids that reached `Confirmed` or `FailedPermanent`
    settled_ids: HashSet<u64>,
    /// Most recent settled operations, oldest first, capped at `settled_history_limit`
    history: VecDeque<MintOperation>,
    stats: CoordinatorStatus,
    status: Arc<RwLock<CoordinatorStatus>>,
}

impl MintCoordinator {
    /// Creates a new mint coordinator.
    ///
    /// # Arguments
    ///
    /// * `config` - Bridge configuration (minter settings and both chains' decimals)
    /// * `client` - Destination chain client
    /// * `receiver` - Receiving half of the channel fed by the lock watcher
    /// * `status` - Shared status snapshot
    pub fn new(
        config: &Config,
        client: Arc<dyn MintClient>,
        receiver: mpsc::UnboundedReceiver<LockEvent>,
        status: Arc<RwLock<CoordinatorStatus>>,
    ) -> Self {
        Self {
            config: config.minter.clone(),
            source_decimals: config.source_chain.decimals,
            dest_decimals: config.destination_chain.decimals,
            client,
            receiver,
            channel_closed: false,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            settled_ids: HashSet::new(),
            history: VecDeque::new(),
            stats: CoordinatorStatus::default(),
            status,
        }
    }

    /// Number of operations waiting in the FIFO queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of non-terminal operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Looks up an operation by lock id: pending, or settled and still in the history.
    pub fn operation(&self, lock_id: u64) -> Option<&MintOperation> {
        self.pending
            .get(&lock_id)
            .or_else(|| self.history.iter().rev().find(|op| op.lock_id() == lock_id))
    }

    /// Whether `lock_id` reached a terminal state.
    pub fn is_settled(&self, lock_id: u64) -> bool {
        self.settled_ids.contains(&lock_id)
    }

    /// Current counters.
    pub fn stats(&self) -> &CoordinatorStatus {
        &self.stats
    }

    /// Accepts one event from the lock watcher.
    ///
    /// # Returns
    ///
    /// * `true` - A new operation was queued
    /// * `false` - The lock id is already pending or settled; the event was discarded
    pub fn enqueue(&mut self, event: LockEvent) -> bool {
        self.stats.total_received += 1;
        let lock_id = event.lock_id;

        if self.pending.contains_key(&lock_id) || self.settled_ids.contains(&lock_id) {
            self.stats.total_duplicates += 1;
            debug!("Discarding duplicate lock event: lock_id={}", lock_id);
            return false;
        }

        self.pending.insert(lock_id, MintOperation::new(event));
        self.queue.push_back(lock_id);
        debug!(
            "Queued mint: lock_id={}, queue_length={}",
            lock_id,
            self.queue.len()
        );
        true
    }

    /// Moves every event buffered in the channel into the PendingSet.
    ///
    /// # Returns
    ///
    /// Number of events taken from the channel.
    pub fn drain_channel(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    drained += 1;
                    self.enqueue(event);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.channel_closed = true;
                    break;
                }
            }
        }
        drained
    }

    /// Re-enqueues scheduled retries whose wake time has passed, earliest first.
    pub fn promote_due_retries(&mut self) {
        let now = Utc::now();
        let mut due: Vec<(DateTime<Utc>, u64)> = self
            .pending
            .values()
            .filter(|op| op.state == MintState::RetryScheduled)
            .filter_map(|op| op.next_attempt_at.map(|at| (at, op.lock_id())))
            .filter(|(at, _)| *at <= now)
            .collect();
        due.sort();

        for (_, lock_id) in due {
            if let Some(op) = self.pending.get_mut(&lock_id) {
                op.next_attempt_at = None;
                op.transition(MintState::Queued);
                self.queue.push_back(lock_id);
                debug!("Retry due: lock_id={}, attempts={}", lock_id, op.attempts);
            }
        }
    }

    /// Processes the operation at the head of the queue.
    ///
    /// The operation runs to the end of its current attempt: confirmed, failed
    /// permanently, or scheduled for a retry.
    ///
    /// # Returns
    ///
    /// * `Some((lock_id, state))` - The operation and the state it ended in
    /// * `None` - The queue was empty
    pub async fn process_next(&mut self) -> Option<(u64, MintState)> {
        let lock_id = self.queue.pop_front()?;
        let mut op = self.pending.get(&lock_id).cloned()?;

        self.stats.in_flight = Some(lock_id);
        self.publish_status().await;

        op.transition(MintState::Submitting);
        self.attempt(&mut op).await;
        let state = op.state;

        if state.is_terminal() {
            self.pending.remove(&lock_id);
            self.settle(op);
        } else {
            self.pending.insert(lock_id, op);
        }

        self.stats.in_flight = None;
        self.publish_status().await;
        Some((lock_id, state))
    }

    /// Runs the processing loop until `cancel` fires.
    ///
    /// `ready` is signalled once the loop is consuming, so the producer can be
    /// started without losing events. On stop, events still buffered in the
    /// channel are moved into the PendingSet and the unprocessed remainder is logged.
    pub async fn run(mut self, cancel: CancellationToken, ready: oneshot::Sender<()>) {
        info!(
            "Starting mint coordinator: retry_attempts={}, retry_delay={}ms, confirmation_timeout={}ms",
            self.config.retry_attempts, self.config.retry_delay_ms, self.config.confirmation_timeout_ms
        );
        self.stats.running = true;
        self.publish_status().await;
        // The receiver may already be gone if the supervisor aborted startup
        let _ = ready.send(());

        while !cancel.is_cancelled() {
            self.drain_channel();
            self.promote_due_retries();

            if self.process_next().await.is_some() {
                continue;
            }

            let wait = self.idle_wait();
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.receiver.recv(), if !self.channel_closed => match event {
                    Some(event) => {
                        self.enqueue(event);
                    }
                    None => self.channel_closed = true,
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.drain_channel();
        self.finish_queue().await;
        self.report_unprocessed();
        self.stats.running = false;
        self.publish_status().await;
        info!(
            "Mint coordinator stopped: confirmed={}, failed={}, duplicates={}",
            self.stats.total_confirmed, self.stats.total_failed, self.stats.total_duplicates
        );
    }

    // ========================================================================
    // STATE MACHINE
    // ========================================================================

    /// Runs one attempt of an operation in `Submitting` state.
    async fn attempt(&mut self, op: &mut MintOperation) {
        if let Some(previous) = op.destination_tx_hash.clone() {
            match self.client.transaction_status(&previous).await {
                Ok(TxStatus::Success) => {
                    info!(
                        "Previous mint transaction {} for lock_id={} succeeded",
                        previous,
                        op.lock_id()
                    );
                    op.transition(MintState::AwaitingConfirmation);
                    self.confirm(op);
                    return;
                }
                Ok(status) => debug!(
                    "Previous mint transaction {} for lock_id={} is {:?}, resubmitting",
                    previous,
                    op.lock_id(),
                    status
                ),
                Err(e) => warn!(
                    "Failed to query previous mint transaction {} for lock_id={}: {:#}",
                    previous,
                    op.lock_id(),
                    e
                ),
            }
        }

        let amount = match op.converted_amount {
            Some(amount) => amount,
            None => match convert_amount(op.event.amount, self.source_decimals, self.dest_decimals) {
                Ok(amount) => {
                    op.converted_amount = Some(amount);
                    amount
                }
                Err(e) => {
                    op.last_error = Some(e.to_string());
                    self.fail_permanently(op);
                    return;
                }
            },
        };

        op.attempts += 1;

        // Recorded for audit; the submission does not depend on it
        let sequence = match self.client.load_sequence().await {
            Ok(sequence) => Some(sequence),
            Err(e) => {
                warn!(
                    "Failed to load signer sequence for lock_id={}: {:#}",
                    op.lock_id(),
                    e
                );
                None
            }
        };
        op.sequence = sequence;

        let request = MintRequest {
            lock_id: op.lock_id(),
            destination_address: op.event.destination_address.clone(),
            amount,
            sequence,
        };
        info!(
            "Submitting mint: lock_id={}, to={}, amount={}, sequence={:?}, attempt={}/{}",
            request.lock_id,
            request.destination_address,
            request.amount,
            sequence,
            op.attempts,
            self.config.retry_attempts
        );

        let tx_hash = match self.client.submit_mint(&request).await {
            Ok(hash) => hash,
            Err(MintError::AlreadyMinted) => {
                info!("Lock {} already minted on destination chain", op.lock_id());
                op.transition(MintState::AwaitingConfirmation);
                self.confirm(op);
                return;
            }
            Err(e) => {
                self.attempt_failed(op, e.to_string());
                return;
            }
        };

        op.destination_tx_hash = Some(tx_hash.clone());
        op.transition(MintState::AwaitingConfirmation);

        match self.await_confirmation(&tx_hash).await {
            Confirmation::Success => self.confirm(op),
            Confirmation::Failed(reason) => {
                self.attempt_failed(op, format!("transaction {} failed: {}", tx_hash, reason))
            }
            Confirmation::TimedOut => self.attempt_failed(
                op,
                format!(
                    "transaction {} not confirmed within {}ms",
                    tx_hash, self.config.confirmation_timeout_ms
                ),
            ),
        }
    }

    /// Polls the transaction status until it is final or the timeout elapses.
    async fn await_confirmation(&self, tx_hash: &str) -> Confirmation {
        let timeout = Duration::from_millis(self.config.confirmation_timeout_ms);
        let poll_interval = Duration::from_millis(self.config.confirmation_poll_interval_ms);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.client.transaction_status(tx_hash).await {
                Ok(TxStatus::Success) => return Confirmation::Success,
                Ok(TxStatus::Failed { reason }) => return Confirmation::Failed(reason),
                Ok(TxStatus::NotFound) => debug!("Transaction {} not found yet", tx_hash),
                Err(e) => warn!("Failed to query transaction {}: {:#}", tx_hash, e),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Confirmation::TimedOut;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn confirm(&mut self, op: &mut MintOperation) {
        op.next_attempt_at = None;
        op.transition(MintState::Confirmed);
        self.stats.total_confirmed += 1;
        self.stats.total_processed += 1;
        self.stats.last_confirmed_at = Some(op.updated_at);
        info!(
            "Mint confirmed: lock_id={}, amount={:?}, to={}, tx={:?}, attempts={}",
            op.lock_id(),
            op.converted_amount,
            op.event.destination_address,
            op.destination_tx_hash,
            op.attempts
        );
    }

    fn attempt_failed(&mut self, op: &mut MintOperation, reason: String) {
        self.stats.total_errors += 1;
        op.last_error = Some(reason);

        if op.attempts < self.config.retry_attempts {
            let now = Utc::now();
            let wake_at = chrono::Duration::from_std(Duration::from_millis(self.config.retry_delay_ms))
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .unwrap_or(now);
            op.next_attempt_at = Some(wake_at);
            op.transition(MintState::RetryScheduled);
            self.stats.total_retries += 1;
            warn!(
                "Mint attempt {}/{} failed for lock_id={}: {}; retrying in {}ms",
                op.attempts,
                self.config.retry_attempts,
                op.lock_id(),
                op.last_error.as_deref().unwrap_or_default(),
                self.config.retry_delay_ms
            );
        } else {
            self.fail_permanently(op);
        }
    }

    fn fail_permanently(&mut self, op: &mut MintOperation) {
        op.next_attempt_at = None;
        op.transition(MintState::FailedPermanent);
        self.stats.total_failed += 1;
        self.stats.total_processed += 1;
        error!(
            "ALERT: mint permanently failed, manual intervention required: lock_id={}, amount={}, to={}, source_tx={}, attempts={}, last_error={}",
            op.lock_id(),
            op.event.amount,
            op.event.destination_address,
            op.event.source_tx_hash,
            op.attempts,
            op.last_error.as_deref().unwrap_or_default()
        );
    }

    // ========================================================================
    // HELPER FUNCTIONS
    // ========================================================================

    /// Records a terminal operation: its id for deduplication, its details in the capped history.
    fn settle(&mut self, op: MintOperation) {
        self.settled_ids.insert(op.lock_id());
        if self.config.settled_history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.settled_history_limit {
            self.history.pop_front();
        }
        self.history.push_back(op);
    }

    /// Processes queued operations until the queue is empty or the drain timeout passes.
    ///
    /// The deadline is checked between operations; an attempt is never cut short.
    async fn finish_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.shutdown_drain_timeout_ms);
        info!(
            "Finishing {} queued mints before stopping (up to {}ms)",
            self.queue.len(),
            self.config.shutdown_drain_timeout_ms
        );

        while tokio::time::Instant::now() < deadline {
            if self.process_next().await.is_none() {
                break;
            }
        }
    }

    /// Logs every operation left in the PendingSet so it can be replayed.
    fn report_unprocessed(&self) {
        if self.pending.is_empty() {
            return;
        }
        let mut remaining: Vec<&MintOperation> = self.pending.values().collect();
        remaining.sort_by_key(|op| (op.event.source_block, op.event.log_index));
        for op in &remaining {
            error!(
                "ALERT: mint left unprocessed at shutdown: lock_id={}, state={:?}, source_tx={}, source_block={}, amount={}, to={}, attempts={}",
                op.lock_id(),
                op.state,
                op.event.source_tx_hash,
                op.event.source_block,
                op.event.amount,
                op.event.destination_address,
                op.attempts
            );
        }
        warn!(
            "Mint coordinator stopping with {} unprocessed operations ({} queued)",
            remaining.len(),
            self.queue.len()
        );
    }

    /// Time to sleep when idle: `idle_wait_ms`, or less if a retry falls due sooner.
    fn idle_wait(&self) -> Duration {
        let idle = Duration::from_millis(self.config.idle_wait_ms);
        let now = Utc::now();
        self.pending
            .values()
            .filter_map(|op| op.next_attempt_at)
            .min()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO).min(idle))
            .unwrap_or(idle)
    }

    async fn publish_status(&mut self) {
        self.stats.queue_length = self.queue.len();
        self.stats.pending_mints = self.pending.len();
        *self.status.write().await = self.stats.clone();
    }
}
