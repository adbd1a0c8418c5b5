//! Lock-and-Mint Bridge Library
//!
//! This crate watches an EVM source chain for `TokensLocked` events and mints the
//! equivalent amount on a Stellar/Soroban destination chain. The lock watcher
//! publishes validated events to the mint coordinator, which submits one mint at a
//! time; the bridge supervisor wires and runs both.

pub mod config;
pub mod evm_client;
pub mod minter;
pub mod monitor;
pub mod rpc;
pub mod soroban_client;
pub mod supervisor;
pub mod validator;

// Re-export commonly used types
pub use config::{
    Config, DestinationChainConfig, MinterConfig, SourceChainConfig, StartBlock, SupervisorConfig,
    ValidationConfig, WatcherConfig,
};
pub use evm_client::EvmClient;
pub use minter::{
    convert_amount, ConversionError, CoordinatorStatus, MintClient, MintCoordinator, MintError,
    MintOperation, MintRequest, MintState, TxStatus,
};
pub use monitor::{
    ChainReader, LockEvent, LockWatcher, RawLockEvent, TickOutcome, TransactionReceipt,
    WatcherStatus,
};
pub use soroban_client::SorobanClient;
pub use supervisor::{BridgeStatus, BridgeSupervisor, HealthReport};
pub use validator::{EventValidator, RejectReason};
