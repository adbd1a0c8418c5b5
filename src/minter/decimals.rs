//! Decimal conversion between source and destination base units.

use thiserror::Error;

/// Largest exponent whose power of ten fits in a `u128` (10^38 < 2^128 < 10^39).
const MAX_POW10: u32 = 38;

/// Why an amount could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Precision difference does not fit in `u128`
    #[error("decimal difference {0} exceeds u128 range")]
    ScaleOutOfRange(u32),
    /// Scaling up overflowed the destination amount
    #[error("amount {amount} overflows when scaled up by 10^{scale}")]
    Overflow { amount: u128, scale: u32 },
    /// Scaling down truncated the whole amount
    #[error("amount {amount} converts to zero at {dest_decimals} decimals")]
    ZeroAmount { amount: u128, dest_decimals: u32 },
}

/// Converts an amount from `source_decimals` to `dest_decimals` base units.
///
/// Scaling down floors (`amount / 10^(S-D)`): the dust below destination precision
/// stays locked on the source chain. Scaling up multiplies with an overflow check.
///
/// # Arguments
///
/// * `amount` - Amount in source base units
/// * `source_decimals` - Source token precision (S)
/// * `dest_decimals` - Destination token precision (D)
///
/// # Returns
///
/// * `Ok(u128)` - Amount in destination base units, never zero
/// * `Err(ConversionError)` - Overflow or a zero result
pub fn convert_amount(
    amount: u128,
    source_decimals: u32,
    dest_decimals: u32,
) -> Result<u128, ConversionError> {
    let converted = if source_decimals >= dest_decimals {
        let scale = source_decimals - dest_decimals;
        if scale > MAX_POW10 {
            // Every u128 is below 10^39, so the floor is zero
            0
        } else {
            amount / 10u128.pow(scale)
        }
    } else {
        let scale = dest_decimals - source_decimals;
        if scale > MAX_POW10 {
            return Err(ConversionError::ScaleOutOfRange(scale));
        }
        amount
            .checked_mul(10u128.pow(scale))
            .ok_or(ConversionError::Overflow { amount, scale })?
    };

    if converted == 0 {
        return Err(ConversionError::ZeroAmount {
            amount,
            dest_decimals,
        });
    }
    Ok(converted)
}
