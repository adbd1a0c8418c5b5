//! Source chain monitoring module
//!
//! The lock watcher polls a [`ChainReader`] for confirmed lock events, validates
//! them and publishes accepted events to the mint coordinator.

pub mod generic;
pub mod lock_watcher;

pub use generic::{ChainReader, LockEvent, RawLockEvent, TransactionReceipt};
pub use lock_watcher::{LockWatcher, TickOutcome, WatcherStatus};
