//! Exact decimal money math.
//!
//! All monetary values are [`rust_decimal::Decimal`]; floats never touch
//! amounts. Token amounts round to 6 decimal places, the minor-unit
//! granularity of the supported settlement token.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of the settlement token's minor unit.
pub const AMOUNT_SCALE: u32 = 6;

/// Errors from parsing or converting monetary amounts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AmountError {
    /// The amount string was not a valid decimal number.
    #[error("invalid amount: {0}")]
    Invalid(String),

    /// The amount was negative.
    #[error("negative amount: {0}")]
    Negative(Decimal),

    /// The amount has more precision than the token's base unit can carry.
    #[error("amount {0} is finer than {1} decimal places")]
    ExcessPrecision(Decimal, u32),

    /// The amount does not fit into base units.
    #[error("amount {0} overflows base units")]
    Overflow(Decimal),
}

/// Parses a non-negative decimal amount from its wire string form.
///
/// # Errors
///
/// Returns [`AmountError`] if the string is not a decimal or is negative.
pub fn parse_amount(raw: &str) -> Result<Decimal, AmountError> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| AmountError::Invalid(raw.to_owned()))?;
    if value.is_sign_negative() {
        return Err(AmountError::Negative(value));
    }
    Ok(value)
}

/// Rounds to 6 decimal places, half away from zero.
#[must_use]
pub fn round6(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a decimal amount into integer base units for a token with the
/// given number of decimals.
///
/// # Errors
///
/// Returns [`AmountError`] if the amount is negative, carries more precision
/// than the token supports, or overflows `u128`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, AmountError> {
    if amount.is_sign_negative() {
        return Err(AmountError::Negative(amount));
    }
    let scale = Decimal::from(10u64.pow(decimals.min(19)));
    let scaled = amount
        .checked_mul(scale)
        .ok_or(AmountError::Overflow(amount))?;
    if !scaled.fract().is_zero() {
        return Err(AmountError::ExcessPrecision(amount, decimals));
    }
    scaled.to_u128().ok_or(AmountError::Overflow(amount))
}

/// Converts integer base units back into a decimal amount.
///
/// # Errors
///
/// Returns [`AmountError`] if the unit count exceeds decimal range.
pub fn from_base_units(units: u128, decimals: u32) -> Result<Decimal, AmountError> {
    let mut value =
        Decimal::from_u128(units).ok_or_else(|| AmountError::Invalid(units.to_string()))?;
    value
        .set_scale(decimals)
        .map_err(|_| AmountError::Invalid(units.to_string()))?;
    Ok(value.normalize())
}
