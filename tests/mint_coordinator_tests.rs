//! Unit tests for the mint coordinator
//!
//! These tests drive the mint state machine against an in-memory destination
//! client and verify idempotency, retries, confirmation handling and
//! serialized submission.

use lock_mint_bridge::config::Config;
use lock_mint_bridge::minter::{CoordinatorStatus, MintCoordinator, MintState, TxStatus};
use lock_mint_bridge::monitor::LockEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    build_test_config, create_default_lock_event, drive_until_settled, MintScript, MockMintClient,
    DUMMY_STELLAR_ACCOUNT,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Harness {
    coordinator: MintCoordinator,
    client: Arc<MockMintClient>,
    sender: mpsc::UnboundedSender<LockEvent>,
    status: Arc<RwLock<CoordinatorStatus>>,
}

fn build_coordinator(config: &Config, client: MockMintClient) -> Harness {
    let client = Arc::new(client);
    let (sender, receiver) = mpsc::unbounded_channel();
    let status = Arc::new(RwLock::new(CoordinatorStatus::default()));
    let coordinator = MintCoordinator::new(config, client.clone(), receiver, status.clone());
    Harness {
        coordinator,
        client,
        sender,
        status,
    }
}

// ============================================================================
// TESTS
// ============================================================================

/// What is tested: A valid lock is converted to 7 decimals, submitted and confirmed
/// Why: This is the bridge's happy path
#[tokio::test]
async fn test_valid_lock_confirmed() {
    let mut h = build_coordinator(&build_test_config(), MockMintClient::default());
    assert!(h.coordinator.enqueue(create_default_lock_event(7)));

    let result = h.coordinator.process_next().await;

    assert_eq!(result, Some((7, MintState::Confirmed)));
    let submissions = h.client.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].lock_id, 7);
    assert_eq!(submissions[0].amount, 10_000);
    assert_eq!(submissions[0].destination_address, DUMMY_STELLAR_ACCOUNT);
    assert_eq!(submissions[0].sequence, Some(100));

    let op = h.coordinator.operation(7).unwrap();
    assert_eq!(op.converted_amount, Some(10_000));
    assert_eq!(op.attempts, 1);
    assert_eq!(op.destination_tx_hash.as_deref(), Some("tx-7-1"));
    assert_eq!(h.coordinator.pending_count(), 0);
    assert_eq!(h.coordinator.stats().total_confirmed, 1);
}

/// What is tested: The same lock id delivered twice yields one submission and one confirmation
/// Why: At most one mint may ever be confirmed per lock
#[tokio::test]
async fn test_duplicate_lock_discarded() {
    let mut h = build_coordinator(&build_test_config(), MockMintClient::default());

    assert!(h.coordinator.enqueue(create_default_lock_event(7)));
    assert!(!h.coordinator.enqueue(create_default_lock_event(7)));
    drive_until_settled(&mut h.coordinator).await;

    // Re-delivery after confirmation is discarded as well
    assert!(!h.coordinator.enqueue(create_default_lock_event(7)));

    assert_eq!(h.client.submissions().len(), 1);
    assert_eq!(h.coordinator.stats().total_confirmed, 1);
    assert_eq!(h.coordinator.stats().total_duplicates, 2);
    assert_eq!(h.coordinator.queue_len(), 0);
}

/// What is tested: Fail, fail, succeed with retry_attempts = 3 ends confirmed after 3 attempts
/// Why: Transient destination failures are retried up to the bound
#[tokio::test]
async fn test_retry_then_confirm() {
    let client = MockMintClient::with_script(vec![
        MintScript::Reject("tx_bad_seq".to_string()),
        MintScript::FailOnChain("resource limit exceeded".to_string()),
        MintScript::Confirm,
    ]);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(7));

    assert_eq!(
        h.coordinator.process_next().await,
        Some((7, MintState::RetryScheduled))
    );
    assert!(h.coordinator.operation(7).unwrap().next_attempt_at.is_some());

    drive_until_settled(&mut h.coordinator).await;

    let op = h.coordinator.operation(7).unwrap();
    assert_eq!(op.state, MintState::Confirmed);
    assert_eq!(op.attempts, 3);
    assert_eq!(h.client.submissions().len(), 3);
    assert_eq!(h.coordinator.stats().total_retries, 2);
    assert_eq!(h.coordinator.stats().total_errors, 2);
}

/// What is tested: Persistent failures stop at retry_attempts and end failed_permanent
/// Why: Retries are bounded; the operation leaves the PendingSet for manual handling
#[tokio::test]
async fn test_retry_bound_failed_permanent() {
    let client = MockMintClient::with_script(vec![
        MintScript::Reject("one".to_string()),
        MintScript::Reject("two".to_string()),
        MintScript::Reject("three".to_string()),
        MintScript::Confirm,
    ]);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(9));

    drive_until_settled(&mut h.coordinator).await;

    let op = h.coordinator.operation(9).unwrap();
    assert_eq!(op.state, MintState::FailedPermanent);
    assert_eq!(op.attempts, 3);
    assert!(op.last_error.as_deref().unwrap().contains("three"));
    assert_eq!(h.client.submissions().len(), 3);
    assert_eq!(h.coordinator.pending_count(), 0);
    assert_eq!(h.coordinator.stats().total_failed, 1);

    // A permanently failed lock is not retried on re-delivery
    assert!(!h.coordinator.enqueue(create_default_lock_event(9)));
}

/// What is tested: An "already minted" response confirms the operation
/// Why: On-chain deduplication means the mint happened
#[tokio::test]
async fn test_already_minted_is_confirmed() {
    let client = MockMintClient::with_script(vec![MintScript::AlreadyMinted]);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(11));

    assert_eq!(
        h.coordinator.process_next().await,
        Some((11, MintState::Confirmed))
    );
    assert_eq!(h.coordinator.operation(11).unwrap().attempts, 1);
    assert_eq!(h.coordinator.stats().total_failed, 0);
}

/// What is tested: An unconfirmed transaction times out, then its hash is checked before resubmitting
/// Why: A submitted transaction must not be replaced while it may still land
#[tokio::test]
async fn test_timeout_then_previous_hash_succeeds() {
    let client = MockMintClient::with_script(vec![MintScript::NeverConfirm]);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(12));

    assert_eq!(
        h.coordinator.process_next().await,
        Some((12, MintState::RetryScheduled))
    );
    let first_hash = h
        .coordinator
        .operation(12)
        .unwrap()
        .destination_tx_hash
        .clone()
        .unwrap();

    // The first transaction lands after the confirmation window
    h.client.set_status(&first_hash, TxStatus::Success);
    drive_until_settled(&mut h.coordinator).await;

    let op = h.coordinator.operation(12).unwrap();
    assert_eq!(op.state, MintState::Confirmed);
    assert_eq!(op.attempts, 1);
    assert_eq!(h.client.submissions().len(), 1);
}

/// What is tested: A previous hash that is still unknown leads to a new submission
/// Why: An expired envelope will never land and must be replaced
#[tokio::test]
async fn test_timeout_then_resubmit() {
    let client = MockMintClient::with_script(vec![MintScript::NeverConfirm, MintScript::Confirm]);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(13));

    drive_until_settled(&mut h.coordinator).await;

    let op = h.coordinator.operation(13).unwrap();
    assert_eq!(op.state, MintState::Confirmed);
    assert_eq!(op.attempts, 2);
    assert_eq!(op.destination_tx_hash.as_deref(), Some("tx-13-2"));
}

/// What is tested: An amount that converts to zero fails permanently without a submission
/// Why: Conversion is deterministic; retrying cannot help
#[tokio::test]
async fn test_conversion_failure_is_permanent() {
    let mut h = build_coordinator(&build_test_config(), MockMintClient::default());
    let mut event = create_default_lock_event(14);
    event.amount = 99_999_999_999;
    h.coordinator.enqueue(event);

    assert_eq!(
        h.coordinator.process_next().await,
        Some((14, MintState::FailedPermanent))
    );
    let op = h.coordinator.operation(14).unwrap();
    assert_eq!(op.attempts, 0);
    assert!(h.client.submissions().is_empty());
}

/// What is tested: The converted amount is computed once and reused on retries
/// Why: Every attempt must mint the same amount
#[tokio::test]
async fn test_converted_amount_reused_on_retry() {
    let client = MockMintClient::with_script(vec![MintScript::Reject("busy".to_string())]);
    let mut h = build_coordinator(&build_test_config(), client);
    let mut event = create_default_lock_event(15);
    event.amount = 123_456_789_000_000_000;
    h.coordinator.enqueue(event);

    drive_until_settled(&mut h.coordinator).await;

    let amounts: Vec<u128> = h.client.submissions().iter().map(|s| s.amount).collect();
    assert_eq!(amounts, vec![1_234_567_890, 1_234_567_890]);
}

/// What is tested: The run loop processes events FIFO with one submission in flight at a time
/// Why: The signer's sequence number forbids concurrent submissions
#[tokio::test]
async fn test_run_serializes_submissions() {
    let mut config = build_test_config();
    config.minter.idle_wait_ms = 2;
    let h = build_coordinator(&config, MockMintClient::default());
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = tokio::spawn(h.coordinator.run(cancel.clone(), ready_tx));
    ready_rx.await.expect("Coordinator should signal readiness");

    for lock_id in 1..=5 {
        h.sender.send(create_default_lock_event(lock_id)).unwrap();
    }

    let status = h.status.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while status.read().await.total_confirmed < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("All mints should confirm");

    cancel.cancel();
    handle.await.unwrap();

    let ids: Vec<u64> = h.client.submissions().iter().map(|s| s.lock_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(h.client.max_concurrent_submissions(), 1);
    let sequences: Vec<Option<u64>> = h.client.submissions().iter().map(|s| s.sequence).collect();
    assert_eq!(
        sequences,
        vec![Some(100), Some(101), Some(102), Some(103), Some(104)]
    );

    let status = h.status.read().await;
    assert!(!status.running);
    assert_eq!(status.total_processed, 5);
    assert_eq!(status.in_flight, None);
}

/// What is tested: On stop, buffered events are taken from the channel and every queued mint is finished
/// Why: The watcher's cursor is already past these locks; dropping them would lose them
#[tokio::test]
async fn test_stop_finishes_queued_mints() {
    let h = build_coordinator(&build_test_config(), MockMintClient::default());
    for lock_id in 1..=3 {
        h.sender.send(create_default_lock_event(lock_id)).unwrap();
    }
    h.sender.send(create_default_lock_event(2)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (ready_tx, _ready_rx) = oneshot::channel();
    h.coordinator.run(cancel, ready_tx).await;

    let status = h.status.read().await;
    assert!(!status.running);
    assert_eq!(status.total_received, 4);
    assert_eq!(status.total_duplicates, 1);
    assert_eq!(status.total_confirmed, 3);
    assert_eq!(status.pending_mints, 0);
    assert_eq!(status.queue_length, 0);
    let ids: Vec<u64> = h.client.submissions().iter().map(|s| s.lock_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

/// What is tested: With no drain time, queued mints are left pending and nothing is submitted
/// Why: The drain is bounded; leftovers are reported instead of blocking shutdown
#[tokio::test]
async fn test_stop_without_drain_time_leaves_queue() {
    let mut config = build_test_config();
    config.minter.shutdown_drain_timeout_ms = 0;
    let h = build_coordinator(&config, MockMintClient::default());
    for lock_id in 1..=3 {
        h.sender.send(create_default_lock_event(lock_id)).unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (ready_tx, _ready_rx) = oneshot::channel();
    h.coordinator.run(cancel, ready_tx).await;

    let status = h.status.read().await;
    assert_eq!(status.pending_mints, 3);
    assert_eq!(status.queue_length, 3);
    assert_eq!(status.total_processed, 0);
    assert!(h.client.submissions().is_empty());
}

/// What is tested: Only the most recent settled operations are kept; older lock ids still deduplicate
/// Why: A long-running bridge must not keep every settled operation in memory
#[tokio::test]
async fn test_settled_history_is_capped() {
    let mut config = build_test_config();
    config.minter.settled_history_limit = 2;
    let mut h = build_coordinator(&config, MockMintClient::default());
    for lock_id in 1..=3 {
        h.coordinator.enqueue(create_default_lock_event(lock_id));
    }

    drive_until_settled(&mut h.coordinator).await;

    assert!(h.coordinator.operation(1).is_none());
    assert!(h.coordinator.is_settled(1));
    assert_eq!(h.coordinator.operation(2).unwrap().state, MintState::Confirmed);
    assert_eq!(h.coordinator.operation(3).unwrap().state, MintState::Confirmed);

    assert!(!h.coordinator.enqueue(create_default_lock_event(1)));
    assert_eq!(h.client.submissions().len(), 3);
    assert_eq!(h.coordinator.stats().total_duplicates, 1);
}

/// What is tested: A failed signer sequence lookup does not stop the mint
/// Why: The sequence is only recorded; the submission builds its own envelope
#[tokio::test]
async fn test_sequence_lookup_failure_still_mints() {
    let client = MockMintClient::default();
    client.set_sequence_unavailable(true);
    let mut h = build_coordinator(&build_test_config(), client);
    h.coordinator.enqueue(create_default_lock_event(21));

    assert_eq!(
        h.coordinator.process_next().await,
        Some((21, MintState::Confirmed))
    );
    let op = h.coordinator.operation(21).unwrap();
    assert_eq!(op.sequence, None);
    assert_eq!(op.attempts, 1);
    assert_eq!(h.client.submissions()[0].sequence, None);
    assert_eq!(h.coordinator.stats().total_errors, 0);
}
