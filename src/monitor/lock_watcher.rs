//! Lock Watcher
//!
//! Advances a monotonic block cursor over the source chain, fetches confirmed
//! blocks in bounded batches, validates every lock log and publishes accepted
//! events to the mint coordinator.
//!
//! Per tick:
//! 1. Read the current height
//! 2. `safe = current - confirmations`; nothing to do while `safe <= cursor`
//! 3. `to = min(safe, cursor + max_batch_size)`
//! 4. Fetch `[cursor + 1, to]`, validate, publish accepted events
//! 5. Move the cursor to `to` only if the whole batch was processed
//!
//! A fetch error leaves the cursor where it was; the same range is retried on
//! the next tick.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::generic::{ChainReader, LockEvent, RawLockEvent};
use crate::config::{StartBlock, WatcherConfig};
use crate::validator::{EventValidator, RejectReason};

// ============================================================================
// STATUS
// ============================================================================

/// Snapshot of the watcher, readable by the supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherStatus {
    /// Whether the watch loop is running
    pub running: bool,
    /// Cursor: last block whose events were fully processed (None before the first tick)
    pub last_processed_block: Option<u64>,
    /// Height reported at the last successful height query
    pub current_height: Option<u64>,
    /// Events published to the mint coordinator
    pub events_accepted: u64,
    /// Events rejected by the validator
    pub events_rejected: u64,
    /// Ticks that ended early because of an RPC or publication error
    pub total_errors: u64,
    /// Completion time of the last tick
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not enough confirmed blocks beyond the cursor
    Idle {
        /// Height minus confirmations
        safe_height: u64,
    },
    /// A range was scanned and the cursor moved to `to_block`
    Processed {
        from_block: u64,
        to_block: u64,
        accepted: usize,
        rejected: usize,
    },
}

// ============================================================================
// LOCK WATCHER
// ============================================================================

/// Watches the source chain for lock events.
pub struct LockWatcher {
    config: WatcherConfig,
    start_block: StartBlock,
    reader: Arc<dyn ChainReader>,
    validator: EventValidator,
    publisher: mpsc::UnboundedSender<LockEvent>,
    /// Last fully processed block; `None` until resolved from `start_block`
    cursor: Option<u64>,
    status: Arc<RwLock<WatcherStatus>>,
}

impl LockWatcher {
    /// Creates a new lock watcher.
    ///
    /// # Arguments
    ///
    /// * `config` - Watcher configuration
    /// * `reader` - Source chain reader
    /// * `validator` - Event validator
    /// * `publisher` - Sending half of the channel consumed by the mint coordinator
    /// * `status` - Shared status snapshot
    ///
    /// # Returns
    ///
    /// * `Ok(LockWatcher)` - Successfully created watcher
    /// * `Err(anyhow::Error)` - `start_block` could not be parsed
    pub fn new(
        config: WatcherConfig,
        reader: Arc<dyn ChainReader>,
        validator: EventValidator,
        publisher: mpsc::UnboundedSender<LockEvent>,
        status: Arc<RwLock<WatcherStatus>>,
    ) -> Result<Self> {
        let start_block = config.start_block()?;
        let cursor = match start_block {
            StartBlock::Height(height) => Some(height.saturating_sub(1)),
            StartBlock::Latest => None,
        };

        Ok(Self {
            config,
            start_block,
            reader,
            validator,
            publisher,
            cursor,
            status,
        })
    }

    /// Returns the cursor (last fully processed block), if resolved.
    pub fn last_processed_block(&self) -> Option<u64> {
        self.cursor
    }

    /// Runs the watch loop until `cancel` fires.
    ///
    /// Errors inside a tick are logged and counted; they never end the loop.
    /// Cancellation is checked between ticks only.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Starting lock watcher: start_block={:?}, confirmations={}, max_batch_size={}, polling_interval={}ms",
            self.start_block,
            self.config.confirmations,
            self.config.max_batch_size,
            self.config.polling_interval_ms
        );
        self.status.write().await.running = true;

        let interval = Duration::from_millis(self.config.polling_interval_ms);

        while !cancel.is_cancelled() {
            if let Err(e) = self.tick().await {
                error!("Error polling lock events: {:#}", e);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.status.write().await.running = false;
        info!("Lock watcher stopped at block {:?}", self.cursor);
    }

    /// Runs one poll tick.
    ///
    /// # Returns
    ///
    /// * `Ok(TickOutcome)` - What the tick did
    /// * `Err(anyhow::Error)` - RPC or publication failure; the cursor is unchanged
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let result = self.scan().await;

        let mut status = self.status.write().await;
        status.last_processed_block = self.cursor;
        status.last_tick_at = Some(Utc::now());
        match &result {
            Ok(TickOutcome::Processed {
                accepted, rejected, ..
            }) => {
                status.events_accepted += *accepted as u64;
                status.events_rejected += *rejected as u64;
            }
            Ok(TickOutcome::Idle { .. }) => {}
            Err(_) => status.total_errors += 1,
        }

        result
    }

    async fn scan(&mut self) -> Result<TickOutcome> {
        let current_height = self
            .reader
            .current_height()
            .await
            .context("Failed to read source chain height")?;
        self.status.write().await.current_height = Some(current_height);

        let safe_height = current_height.saturating_sub(self.config.confirmations);

        let last = match self.cursor {
            Some(last) => last,
            None => {
                // `latest`: only blocks confirmed after startup are scanned
                info!("Resolved start_block=latest to safe height {}", safe_height);
                self.cursor = Some(safe_height);
                return Ok(TickOutcome::Idle { safe_height });
            }
        };

        let from_block = last + 1;
        if safe_height < from_block {
            debug!(
                "No new confirmed blocks: height={}, safe={}, cursor={}",
                current_height, safe_height, last
            );
            return Ok(TickOutcome::Idle { safe_height });
        }

        let to_block = safe_height.min(last + self.config.max_batch_size);

        let raw_events = self
            .reader
            .get_lock_events(from_block, to_block)
            .await
            .with_context(|| format!("Failed to fetch lock events for blocks {}..={}", from_block, to_block))?;

        let mut accepted = Vec::new();
        let mut rejected = 0usize;
        for raw in &raw_events {
            match self.check_event(raw).await? {
                Ok(event) => accepted.push(event),
                Err(reason) => {
                    rejected += 1;
                    warn!(
                        "Rejected lock event: lock_id={:?}, tx={:?}, block={:?}, reason={}",
                        raw.lock_id, raw.source_tx_hash, raw.source_block, reason
                    );
                }
            }
        }

        for event in &accepted {
            self.publisher
                .send(event.clone())
                .map_err(|_| anyhow::anyhow!("Mint coordinator channel closed"))?;
            info!(
                "Accepted lock event: lock_id={}, amount={}, destination={}, block={}, tx={}",
                event.lock_id,
                event.amount,
                event.destination_address,
                event.source_block,
                event.source_tx_hash
            );
        }

        self.cursor = Some(to_block);

        Ok(TickOutcome::Processed {
            from_block,
            to_block,
            accepted: accepted.len(),
            rejected,
        })
    }

    /// Validates one event, and when enabled cross-checks its receipt.
    ///
    /// The outer `Result` carries RPC failures (the tick aborts); the inner one is
    /// the validation verdict.
    async fn check_event(&self, raw: &RawLockEvent) -> Result<Result<LockEvent, RejectReason>> {
        let event = match self.validator.validate(raw) {
            Ok(event) => event,
            Err(reason) => return Ok(Err(reason)),
        };

        if !self.config.verify_receipts {
            return Ok(Ok(event));
        }

        let receipt = self
            .reader
            .get_transaction_receipt(&event.source_tx_hash)
            .await
            .with_context(|| format!("Failed to fetch receipt for {}", event.source_tx_hash))?;

        let verdict = match receipt {
            None => Err(RejectReason::ReceiptMismatch("receipt not found".to_string())),
            Some(r) if !r.success => Err(RejectReason::ReceiptMismatch(
                "transaction reverted".to_string(),
            )),
            Some(r) if r.block_number != event.source_block => Err(RejectReason::ReceiptMismatch(
                format!("receipt block {} != log block {}", r.block_number, event.source_block),
            )),
            Some(_) => Ok(event),
        };
        Ok(verdict)
    }
}
