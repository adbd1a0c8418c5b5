//! Shared test helpers for unit tests
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy addresses, hashes and amounts
//! - **Configuration Builders**: Test configurations with fast timers
//! - **Default Event Creators**: Raw and accepted lock events
//! - **Mock Chains**: In-memory `ChainReader` and `MintClient` implementations

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use lock_mint_bridge::config::{
    Config, DestinationChainConfig, MinterConfig, SourceChainConfig, SupervisorConfig,
    ValidationConfig, WatcherConfig,
};
use lock_mint_bridge::minter::{MintClient, MintCoordinator, MintError, MintRequest, TxStatus};
use lock_mint_bridge::monitor::{ChainReader, LockEvent, RawLockEvent, TransactionReceipt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

// ------------------------- TOKENS AND CONTRACTS -------------------------

/// Dummy lock contract address (EVM format, 20 bytes)
pub const DUMMY_LOCK_CONTRACT_ADDR: &str = "0x0000000000000000000000000000000000000010";

/// Dummy token address (EVM format, 20 bytes)
pub const DUMMY_TOKEN_ADDR: &str = "0x00000000000000000000000000000000000000aa";

/// Dummy destination contract id (Soroban strkey)
pub const DUMMY_CONTRACT_ID: &str = "CDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC";

// -------------------------------- USERS ---------------------------------

/// Dummy locking user (EVM format, 20 bytes)
pub const DUMMY_USER_ADDR: &str = "0x0000000000000000000000000000000000000006";

/// Dummy mint recipient (Stellar account, 56 characters)
pub const DUMMY_STELLAR_ACCOUNT: &str = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";

/// Dummy destination signer account (Stellar account, 56 characters)
pub const DUMMY_SIGNER_ACCOUNT: &str = "GAIH3ULLFQ4DGSECF2AR555KZ4KNDGEKN4AFI4SU2M7B43MGK3QJZNSR";

// ------------------------------- HASHES ---------------------------------

/// Dummy source transaction hash (32 bytes)
pub const DUMMY_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000abc";

// ------------------------------- AMOUNTS --------------------------------

/// Minimum accepted amount in test configs (0.001 of an 18-decimal token)
pub const DUMMY_MIN_AMOUNT: u128 = 1_000_000_000_000_000;

/// Maximum accepted amount in test configs (1000 of an 18-decimal token)
pub const DUMMY_MAX_AMOUNT: u128 = 1_000_000_000_000_000_000_000;

/// Default lock amount (equal to the minimum; converts to 10_000 at 7 decimals)
pub const DUMMY_AMOUNT: u128 = 1_000_000_000_000_000;

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build a valid test configuration with millisecond timers.
pub fn build_test_config() -> Config {
    build_test_config_with_rpc("http://127.0.0.1:8545", "http://127.0.0.1:8000")
}

/// Build a valid test configuration pointing at the given source RPC and
/// destination base URL (used for both Soroban RPC and Horizon).
pub fn build_test_config_with_rpc(source_rpc_url: &str, destination_url: &str) -> Config {
    Config {
        source_chain: SourceChainConfig {
            name: "Source Test Chain".to_string(),
            rpc_url: source_rpc_url.to_string(),
            contract_addr: DUMMY_LOCK_CONTRACT_ADDR.to_string(),
            chain_id: 31337,
            decimals: 18,
            signing_key_env: None,
        },
        destination_chain: DestinationChainConfig {
            name: "Destination Test Chain".to_string(),
            rpc_url: destination_url.to_string(),
            horizon_url: destination_url.to_string(),
            network_passphrase: "Standalone Network ; February 2017".to_string(),
            contract_id: DUMMY_CONTRACT_ID.to_string(),
            source_account: DUMMY_SIGNER_ACCOUNT.to_string(),
            signing_secret_env: "BRIDGE_TEST_DESTINATION_SECRET".to_string(),
            decimals: 7,
            cli_path: "stellar".to_string(),
            already_minted_error_code: Some(3),
        },
        watcher: WatcherConfig {
            start_block: "1".to_string(),
            confirmations: 0,
            polling_interval_ms: 10,
            max_batch_size: 100,
            verify_receipts: false,
        },
        minter: MinterConfig {
            retry_attempts: 3,
            retry_delay_ms: 1,
            confirmation_timeout_ms: 100,
            confirmation_poll_interval_ms: 5,
            idle_wait_ms: 5,
            shutdown_drain_timeout_ms: 1_000,
            settled_history_limit: 16,
        },
        validation: ValidationConfig {
            min_amount: DUMMY_MIN_AMOUNT,
            max_amount: DUMMY_MAX_AMOUNT,
            whitelist_enabled: false,
            whitelisted_tokens: Vec::new(),
        },
        supervisor: SupervisorConfig {
            health_check_interval_ms: 20,
            stats_interval_ms: 20,
        },
    }
}

// ============================================================================
// DEFAULT EVENT CREATORS
// ============================================================================

/// Create a fully populated raw lock event in `block`.
pub fn create_default_raw_event(lock_id: u64, block: u64) -> RawLockEvent {
    RawLockEvent {
        lock_id: Some(lock_id),
        source_user: Some(DUMMY_USER_ADDR.to_string()),
        token: Some(DUMMY_TOKEN_ADDR.to_string()),
        amount: Some(DUMMY_AMOUNT),
        destination_address: Some(DUMMY_STELLAR_ACCOUNT.to_string()),
        destination_symbol: Some("WETH".to_string()),
        source_tx_hash: Some(format!("0x{:064x}", lock_id + 0xabc)),
        source_block: Some(block),
        log_index: Some(0),
    }
}

/// Create an accepted lock event.
pub fn create_default_lock_event(lock_id: u64) -> LockEvent {
    LockEvent {
        lock_id,
        source_user: DUMMY_USER_ADDR.to_string(),
        token: DUMMY_TOKEN_ADDR.to_string(),
        amount: DUMMY_AMOUNT,
        destination_address: DUMMY_STELLAR_ACCOUNT.to_string(),
        destination_symbol: "WETH".to_string(),
        source_tx_hash: DUMMY_TX_HASH.to_string(),
        source_block: 100,
        log_index: 0,
        detected_at: Utc::now(),
    }
}

// ============================================================================
// MOCK CHAIN READER
// ============================================================================

#[derive(Default)]
struct ReaderState {
    height: u64,
    events: Vec<RawLockEvent>,
    receipts: HashMap<String, TransactionReceipt>,
    failing_fetches: usize,
    fetch_delay: Duration,
    fetched_ranges: Vec<(u64, u64)>,
}

/// In-memory source chain.
#[derive(Default)]
pub struct MockChainReader {
    state: Mutex<ReaderState>,
}

impl MockChainReader {
    pub fn with_height(height: u64) -> Self {
        let reader = Self::default();
        reader.set_height(height);
        reader
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn add_event(&self, event: RawLockEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn add_receipt(&self, receipt: TransactionReceipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.tx_hash.clone(), receipt);
    }

    /// Make the next `count` `get_lock_events` calls fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().unwrap().failing_fetches = count;
    }

    /// Make every `get_lock_events` call take `delay` before answering.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = delay;
    }

    /// Ranges passed to `get_lock_events`, including failed calls.
    pub fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().fetched_ranges.clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn get_lock_events(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLockEvent>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.fetched_ranges.push((from_block, to_block));
            state.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            anyhow::bail!("mock RPC unavailable");
        }

        let mut events: Vec<RawLockEvent> = state
            .events
            .iter()
            .filter(|e| {
                e.source_block
                    .map(|b| b >= from_block && b <= to_block)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.source_block, e.log_index));
        Ok(events)
    }

    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        Ok(self.state.lock().unwrap().receipts.get(tx_hash).cloned())
    }
}

// ============================================================================
// MOCK MINT CLIENT
// ============================================================================

/// Scripted outcome of one `submit_mint` call.
#[derive(Debug, Clone)]
pub enum MintScript {
    /// Submission accepted, transaction succeeds
    Confirm,
    /// Submission accepted, transaction fails on chain
    FailOnChain(String),
    /// Submission accepted, transaction never shows up
    NeverConfirm,
    /// Submission rejected before inclusion
    Reject(String),
    /// Contract reports the lock as already minted
    AlreadyMinted,
}

#[derive(Default)]
struct MintLedger {
    script: VecDeque<MintScript>,
    submissions: Vec<MintRequest>,
    statuses: HashMap<String, TxStatus>,
}

/// In-memory destination chain. Unscripted submissions confirm.
pub struct MockMintClient {
    state: Mutex<MintLedger>,
    sequence: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    sequence_unavailable: AtomicBool,
    submit_delay: Duration,
}

impl Default for MockMintClient {
    fn default() -> Self {
        Self {
            state: Mutex::new(MintLedger::default()),
            sequence: AtomicU64::new(100),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            sequence_unavailable: AtomicBool::new(false),
            submit_delay: Duration::from_millis(1),
        }
    }
}

impl MockMintClient {
    pub fn with_script(script: Vec<MintScript>) -> Self {
        let client = Self::default();
        client.state.lock().unwrap().script = script.into();
        client
    }

    pub fn submissions(&self) -> Vec<MintRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Overrides the status reported for `tx_hash`.
    pub fn set_status(&self, tx_hash: &str, status: TxStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(tx_hash.to_string(), status);
    }

    /// Make `load_sequence` fail, as when Horizon is unreachable.
    pub fn set_sequence_unavailable(&self, unavailable: bool) {
        self.sequence_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Highest number of submissions observed in flight at once.
    pub fn max_concurrent_submissions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MintClient for MockMintClient {
    async fn load_sequence(&self) -> Result<u64> {
        if self.sequence_unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("mock Horizon unavailable");
        }
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<String, MintError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.submit_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.submissions.push(request.clone());
        let tx_hash = format!("tx-{}-{}", request.lock_id, state.submissions.len());

        let status = match state.script.pop_front().unwrap_or(MintScript::Confirm) {
            MintScript::Confirm => TxStatus::Success,
            MintScript::FailOnChain(reason) => TxStatus::Failed { reason },
            MintScript::NeverConfirm => TxStatus::NotFound,
            MintScript::Reject(reason) => return Err(MintError::Rejected(reason)),
            MintScript::AlreadyMinted => return Err(MintError::AlreadyMinted),
        };
        state.statuses.insert(tx_hash.clone(), status);
        self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(tx_hash)
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(tx_hash)
            .cloned()
            .unwrap_or(TxStatus::NotFound))
    }
}

// ============================================================================
// DRIVERS
// ============================================================================

/// Process the coordinator's queue, waiting for scheduled retries, until no
/// operation is pending.
pub async fn drive_until_settled(coordinator: &mut MintCoordinator) {
    for _ in 0..1_000 {
        coordinator.promote_due_retries();
        if coordinator.process_next().await.is_some() {
            continue;
        }
        if coordinator.pending_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("coordinator did not settle");
}
