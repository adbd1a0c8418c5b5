//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_test_config, build_test_config_with_rpc, create_default_lock_event,
    create_default_raw_event, drive_until_settled, MintScript, MockChainReader, MockMintClient,
    DUMMY_AMOUNT, DUMMY_CONTRACT_ID, DUMMY_LOCK_CONTRACT_ADDR, DUMMY_MAX_AMOUNT, DUMMY_MIN_AMOUNT,
    DUMMY_SIGNER_ACCOUNT, DUMMY_STELLAR_ACCOUNT, DUMMY_TOKEN_ADDR, DUMMY_TX_HASH, DUMMY_USER_ADDR,
};
