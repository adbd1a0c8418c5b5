//! Destination chain seam used by the mint coordinator
//!
//! The coordinator only talks to the destination chain through [`MintClient`],
//! which keeps it testable with an in-memory client.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Parameters of one mint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Lock id, passed to the contract for on-chain deduplication
    pub lock_id: u64,
    /// Destination account receiving the minted asset
    pub destination_address: String,
    /// Amount in destination base units
    pub amount: u128,
    /// Signer sequence number read before the submission, if the lookup succeeded
    pub sequence: Option<u64>,
}

/// Outcome of a transaction status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Unknown to the node: not ingested yet, or dropped
    NotFound,
    /// Included and successful
    Success,
    /// Included and failed
    Failed { reason: String },
}

/// Why a mint submission failed.
#[derive(Debug, Error)]
pub enum MintError {
    /// The contract reports this lock id as already minted
    #[error("lock already minted")]
    AlreadyMinted,
    /// The destination rejected the transaction
    #[error("mint rejected: {0}")]
    Rejected(String),
    /// The destination asked to resubmit later
    #[error("destination busy, try again later: {0}")]
    TryAgainLater(String),
    /// Transport, CLI or decoding failure
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Write access to the destination chain.
#[async_trait]
pub trait MintClient: Send + Sync {
    /// Loads the signer's current sequence number.
    async fn load_sequence(&self) -> Result<u64>;

    /// Builds, signs and submits a mint transaction.
    ///
    /// Returns the destination transaction hash once the network accepted the
    /// transaction for inclusion.
    async fn submit_mint(&self, request: &MintRequest) -> Result<String, MintError>;

    /// Queries the outcome of a submitted transaction.
    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus>;
}
