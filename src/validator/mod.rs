//! Event Validator Module
//!
//! Pure validation of decoded lock logs. Checks run in a fixed order and stop at
//! the first failure:
//!
//! 1. Required fields present and well-formed
//! 2. Amount within `[min_amount, max_amount]` (inclusive)
//! 3. Token whitelisted (only when whitelisting is enabled; case-insensitive)
//! 4. Destination address matches the Stellar account grammar
//!
//! A rejection is terminal for that log: it is logged with its reason and never retried.

use chrono::Utc;
use std::collections::HashSet;
use thiserror::Error;

use crate::config::ValidationConfig;
use crate::monitor::{LockEvent, RawLockEvent};

/// Length of a Stellar account id (strkey).
pub const STELLAR_ACCOUNT_LEN: usize = 56;

/// Maximum length of a Stellar asset code.
pub const MAX_SYMBOL_LEN: usize = 12;

/// Why a lock log was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// A required field is absent from the decoded log
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A field is present but malformed
    #[error("malformed field {field}: {detail}")]
    MalformedField {
        field: &'static str,
        detail: String,
    },
    /// Amount below the configured minimum
    #[error("amount {amount} below minimum {min}")]
    AmountBelowMinimum { amount: u128, min: u128 },
    /// Amount above the configured maximum
    #[error("amount {amount} above maximum {max}")]
    AmountAboveMaximum { amount: u128, max: u128 },
    /// Token is not on the whitelist
    #[error("token {0} is not whitelisted")]
    TokenNotWhitelisted(String),
    /// Destination address does not match the destination chain's grammar
    #[error("invalid address format")]
    InvalidAddressFormat,
    /// Source receipt missing, failed, or in a different block than the log
    #[error("receipt mismatch: {0}")]
    ReceiptMismatch(String),
}

/// Validates decoded lock logs against the configured bounds and whitelist.
#[derive(Debug, Clone)]
pub struct EventValidator {
    min_amount: u128,
    max_amount: u128,
    whitelist_enabled: bool,
    /// Lowercased whitelisted token addresses
    whitelist: HashSet<String>,
}

impl EventValidator {
    /// Creates a validator from the validation configuration.
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            whitelist_enabled: config.whitelist_enabled,
            whitelist: config
                .whitelisted_tokens
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// Validates one decoded lock log.
    ///
    /// # Arguments
    ///
    /// * `raw` - Log as decoded by the chain reader
    ///
    /// # Returns
    ///
    /// * `Ok(LockEvent)` - The accepted event, stamped with the detection time
    /// * `Err(RejectReason)` - The first check that failed
    pub fn validate(&self, raw: &RawLockEvent) -> Result<LockEvent, RejectReason> {
        // (a) required fields present and well-formed
        let lock_id = raw.lock_id.ok_or(RejectReason::MissingField("lock_id"))?;
        let amount = raw.amount.ok_or(RejectReason::MissingField("amount"))?;
        let source_user = require(&raw.source_user, "source_user")?;
        let token = require(&raw.token, "token")?;
        let destination_address = require(&raw.destination_address, "destination_address")?;
        let destination_symbol = require(&raw.destination_symbol, "destination_symbol")?;
        let source_tx_hash = require(&raw.source_tx_hash, "source_tx_hash")?;
        let source_block = raw.source_block.ok_or(RejectReason::MissingField("source_block"))?;
        let log_index = raw.log_index.ok_or(RejectReason::MissingField("log_index"))?;

        check_hex(source_user, 20, "source_user")?;
        check_hex(token, 20, "token")?;
        check_hex(source_tx_hash, 32, "source_tx_hash")?;
        check_symbol(destination_symbol)?;

        // (b) amount bounds, closed interval
        if amount < self.min_amount {
            return Err(RejectReason::AmountBelowMinimum {
                amount,
                min: self.min_amount,
            });
        }
        if amount > self.max_amount {
            return Err(RejectReason::AmountAboveMaximum {
                amount,
                max: self.max_amount,
            });
        }

        // (c) whitelist
        if self.whitelist_enabled && !self.whitelist.contains(&token.to_lowercase()) {
            return Err(RejectReason::TokenNotWhitelisted(token.to_string()));
        }

        // (d) destination address grammar
        if !is_valid_stellar_account(destination_address) {
            return Err(RejectReason::InvalidAddressFormat);
        }

        Ok(LockEvent {
            lock_id,
            source_user: source_user.to_string(),
            token: token.to_string(),
            amount,
            destination_address: destination_address.to_string(),
            destination_symbol: destination_symbol.to_string(),
            source_tx_hash: source_tx_hash.to_string(),
            source_block,
            log_index,
            detected_at: Utc::now(),
        })
    }
}

/// Checks a Stellar account id: 56 characters, leading `G`, RFC 4648 base32 alphabet.
///
/// # Arguments
///
/// * `address` - Candidate account id
///
/// # Returns
///
/// * `true` if the address matches the grammar
pub fn is_valid_stellar_account(address: &str) -> bool {
    address.len() == STELLAR_ACCOUNT_LEN
        && address.starts_with('G')
        && address
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
}

fn require<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, RejectReason> {
    match field.as_deref() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RejectReason::MissingField(name)),
    }
}

fn check_hex(value: &str, expected_len: usize, field: &'static str) -> Result<(), RejectReason> {
    let malformed = |detail: String| RejectReason::MalformedField { field, detail };
    let stripped = value
        .strip_prefix("0x")
        .ok_or_else(|| malformed("expected 0x-prefixed hex".to_string()))?;
    let bytes = hex::decode(stripped).map_err(|_| malformed("invalid hex".to_string()))?;
    if bytes.len() != expected_len {
        return Err(malformed(format!(
            "expected {} bytes, got {}",
            expected_len,
            bytes.len()
        )));
    }
    Ok(())
}

fn check_symbol(symbol: &str) -> Result<(), RejectReason> {
    if symbol.len() > MAX_SYMBOL_LEN || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RejectReason::MalformedField {
            field: "destination_symbol",
            detail: format!("expected 1-{} alphanumeric characters", MAX_SYMBOL_LEN),
        });
    }
    Ok(())
}
