//! Destination chain minting module
//!
//! The mint coordinator turns accepted lock events into mint transactions on the
//! destination chain through a [`MintClient`].

pub mod coordinator;
pub mod decimals;
pub mod generic;
pub mod operation;

pub use coordinator::{CoordinatorStatus, MintCoordinator};
pub use decimals::{convert_amount, ConversionError};
pub use generic::{MintClient, MintError, MintRequest, TxStatus};
pub use operation::{MintOperation, MintState};
