//! EVM Chain Client
//!
//! JSON-RPC client for the source chain. Reads the block height, `TokensLocked`
//! logs of the lock contract, and transaction receipts. It implements
//! [`ChainReader`] and performs no validation: logs are decoded best-effort into
//! [`RawLockEvent`]s and handed to the caller.
//!
//! Event layout:
//!
//! ```text
//! TokensLocked(address indexed user, address indexed token, uint256 amount,
//!              string destinationAddress, string destinationSymbol, uint256 indexed lockId)
//! topics = [signature, user, token, lockId]
//! data   = abi.encode(amount, destinationAddress, destinationSymbol)
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::config::SourceChainConfig;
use crate::monitor::{ChainReader, RawLockEvent, TransactionReceipt};
use crate::rpc::{build_http_client, json_rpc};

/// Solidity signature of the lock event.
pub const LOCK_EVENT_SIGNATURE: &str = "TokensLocked(address,address,uint256,string,string,uint256)";

/// EVM event log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (hex)
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// Transaction hash
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    /// Log index within the block (hex)
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    /// Set by the node when the log was removed by a reorg
    #[serde(default)]
    pub removed: bool,
}

/// Client for the source EVM chain.
pub struct EvmClient {
    /// HTTP client for JSON-RPC calls
    http_client: Client,
    /// JSON-RPC endpoint
    rpc_url: String,
    /// Lock contract address
    contract_addr: String,
}

impl EvmClient {
    /// Creates a new EVM client.
    ///
    /// # Arguments
    ///
    /// * `config` - Source chain configuration
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create the HTTP client
    pub fn new(config: &SourceChainConfig) -> Result<Self> {
        let http_client = build_http_client()?;

        Ok(Self {
            http_client,
            rpc_url: config.rpc_url.clone(),
            contract_addr: config.contract_addr.clone(),
        })
    }

    async fn evm_json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        json_rpc(&self.http_client, &self.rpc_url, method, serde_json::Value::Array(params)).await
    }
}

#[async_trait]
impl ChainReader for EvmClient {
    async fn current_height(&self) -> Result<u64> {
        let block_hex: String = self
            .evm_json_rpc("eth_blockNumber", vec![])
            .await
            .context("eth_blockNumber failed")?;
        parse_hex_u64(&block_hex).context("Failed to parse block number")
    }

    async fn get_lock_events(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLockEvent>> {
        let filter = serde_json::json!({
            "address": self.contract_addr,
            "topics": [lock_event_topic()],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        let logs: Vec<EvmLog> = self
            .evm_json_rpc("eth_getLogs", vec![filter])
            .await
            .with_context(|| format!("eth_getLogs failed for blocks {}..={}", from_block, to_block))?;

        debug!(
            "eth_getLogs returned {} logs for blocks {}..={}",
            logs.len(),
            from_block,
            to_block
        );

        let mut events: Vec<RawLockEvent> = logs
            .iter()
            .filter(|log| !log.removed)
            .map(parse_lock_log)
            .collect();
        events.sort_by_key(|e| (e.source_block, e.log_index));
        Ok(events)
    }

    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let receipt: Option<serde_json::Value> = self
            .evm_json_rpc("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
            .with_context(|| format!("eth_getTransactionReceipt failed for {}", tx_hash))?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };

        let status = receipt
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("0x0");
        let block_number = receipt
            .get("blockNumber")
            .and_then(|b| b.as_str())
            .map(parse_hex_u64)
            .transpose()?
            .ok_or_else(|| anyhow::anyhow!("Receipt for {} has no blockNumber", tx_hash))?;

        Ok(Some(TransactionReceipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            success: status == "0x1",
        }))
    }
}

// ============================================================================
// LOG DECODING
// ============================================================================

/// Returns topic0 of the lock event: keccak256 of its signature, 0x-prefixed.
pub fn lock_event_topic() -> String {
    let mut hasher = Keccak256::new();
    hasher.update(LOCK_EVENT_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Decodes a `TokensLocked` log into a [`RawLockEvent`].
///
/// Decoding is best-effort: a field that cannot be decoded is left `None`
/// and the validator rejects the event.
///
/// topics[1] = user, topics[2] = token, topics[3] = lockId (all indexed);
/// data = (uint256 amount, string destinationAddress, string destinationSymbol).
pub fn parse_lock_log(log: &EvmLog) -> RawLockEvent {
    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);

    RawLockEvent {
        lock_id: log
            .topics
            .get(3)
            .and_then(|t| decode_uint_word(t))
            .and_then(|v| u64::try_from(v).ok()),
        source_user: log.topics.get(1).and_then(|t| decode_address_word(t)),
        token: log.topics.get(2).and_then(|t| decode_address_word(t)),
        amount: data.get(0..64).and_then(decode_uint_word),
        destination_address: decode_abi_string(data, 1),
        destination_symbol: decode_abi_string(data, 2),
        source_tx_hash: log.transaction_hash.as_ref().map(|h| h.to_lowercase()),
        source_block: log.block_number.as_deref().and_then(|b| parse_hex_u64(b).ok()),
        log_index: log.log_index.as_deref().and_then(|i| parse_hex_u64(i).ok()),
    }
}

/// Parses a 0x-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Result<u64> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    if clean.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(clean, 16).with_context(|| format!("Invalid hex quantity '{}'", value))
}

/// Strips the 0x prefix of a 32-byte word. `None` unless exactly 64 ASCII hex digits.
fn hex_word(word: &str) -> Option<&str> {
    let clean = word.strip_prefix("0x").unwrap_or(word);
    if clean.len() != 64 || !clean.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(clean)
}

/// Decodes a 32-byte word as an unsigned integer. Returns `None` above `u128::MAX`.
fn decode_uint_word(word: &str) -> Option<u128> {
    let (high, low) = hex_word(word)?.split_at(32);
    if high.chars().any(|c| c != '0') {
        return None;
    }
    u128::from_str_radix(low, 16).ok()
}

/// Decodes a 32-byte word holding a left-padded 20-byte address.
fn decode_address_word(word: &str) -> Option<String> {
    let clean = hex_word(word)?;
    let (padding, addr) = clean.split_at(24);
    if padding.bytes().any(|b| b != b'0') {
        return None;
    }
    Some(format!("0x{}", addr.to_lowercase()))
}

/// Decodes the dynamic `string` whose offset sits in head word `head_index`.
fn decode_abi_string(data: &str, head_index: usize) -> Option<String> {
    let head = data.get(head_index * 64..(head_index + 1) * 64)?;
    let offset = usize::try_from(decode_uint_word(head)?).ok()?;

    // Offsets and lengths are in bytes; two hex chars per byte
    let len_start = offset.checked_mul(2)?;
    let len_word = data.get(len_start..len_start.checked_add(64)?)?;
    let len = usize::try_from(decode_uint_word(len_word)?).ok()?;

    let body_start = len_start + 64;
    let body = data.get(body_start..body_start.checked_add(len.checked_mul(2)?)?)?;
    let bytes = hex::decode(body).ok()?;
    String::from_utf8(bytes).ok()
}
