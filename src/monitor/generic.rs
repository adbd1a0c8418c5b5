//! Generic monitor structures and the ChainReader seam
//!
//! This module contains the lock event structures shared by the reader, the
//! validator, the lock watcher and the mint coordinator, plus the `ChainReader`
//! trait the lock watcher polls.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// EVENT DATA STRUCTURES
// ============================================================================

/// A lock log as decoded by the chain reader, before validation.
///
/// Every field is optional: the reader decodes best-effort and never drops a log,
/// so a malformed log still reaches the validator and is rejected there with a
/// reason instead of silently disappearing from the scanned range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLockEvent {
    /// Lock id assigned by the source contract
    pub lock_id: Option<u64>,
    /// Source-chain address that locked the asset
    pub source_user: Option<String>,
    /// Source-chain token address
    pub token: Option<String>,
    /// Locked amount in source base units
    pub amount: Option<u128>,
    /// Destination-chain account that receives the mint
    pub destination_address: Option<String>,
    /// Destination asset ticker
    pub destination_symbol: Option<String>,
    /// Source transaction hash
    pub source_tx_hash: Option<String>,
    /// Source block number
    pub source_block: Option<u64>,
    /// Position of the log inside its block
    pub log_index: Option<u64>,
}

/// An accepted lock event. Immutable once produced by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    /// Lock id assigned by the source contract (primary dedupe key)
    pub lock_id: u64,
    /// Source-chain address that locked the asset
    pub source_user: String,
    /// Source-chain token address
    pub token: String,
    /// Locked amount in source base units
    pub amount: u128,
    /// Destination-chain account that receives the mint
    pub destination_address: String,
    /// Destination asset ticker
    pub destination_symbol: String,
    /// Source transaction hash
    pub source_tx_hash: String,
    /// Source block number
    pub source_block: u64,
    /// Position of the log inside its block
    pub log_index: u64,
    /// Wall-clock time the event was detected (not consensus time)
    pub detected_at: DateTime<Utc>,
}

/// Subset of a source transaction receipt used for provenance cross-checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Block the transaction was included in
    pub block_number: u64,
    /// Whether execution succeeded
    pub success: bool,
}

// ============================================================================
// CHAIN READER
// ============================================================================

/// Read-only access to the source chain.
///
/// Implementations are stateless wrappers: no validation and no side effects.
/// RPC errors propagate to the caller unmodified, and a range query returns
/// either the full range or an error.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Returns the current block height.
    async fn current_height(&self) -> Result<u64>;

    /// Returns all lock events in `[from_block, to_block]`, ordered by `(block, log_index)`.
    async fn get_lock_events(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLockEvent>>;

    /// Returns the receipt for `tx_hash`, or `None` if the node does not know it.
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;
}
