//! Pricing and fee validation.
//!
//! Two fee policies are supported. The fixed policy charges the buyer the
//! listed amount and carves the fee out of the merchant's cut. The quoted
//! policy asks the on-chain checkout contract for its fee rate and split,
//! deriving the base amount from the gross without search: candidate bases
//! are `gross*10000/(10000+feeBps)` and that value plus one; the first
//! candidate whose quoted gross matches the submitted gross exactly wins.
//! No candidate matching means a rounding-based underpayment, so the check
//! fails closed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::{AmountError, from_base_units, parse_amount, round6, to_base_units};
use crate::chain::{ChainError, CheckoutQuoter};

/// Upper bound on the marketplace fee rate (25%).
pub const MAX_FEE_BPS: u32 = 2_500;

const BPS_DENOMINATOR: u128 = 10_000;

/// Listing pricing as submitted with a purchase request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    /// Currency symbol, e.g. `USDC`.
    pub currency: String,
    /// Chain name, e.g. `base-sepolia`.
    pub chain: String,
    /// Listed amount in decimal token units.
    pub amount: String,
}

/// The single chain/currency pair this deployment accepts.
#[derive(Debug, Clone)]
pub struct SupportedPair {
    /// Supported chain name.
    pub chain: String,
    /// Supported currency symbol.
    pub currency: String,
}

/// Errors from pricing validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PricingError {
    /// Chain or currency is not the supported pair.
    #[error("unsupported pricing: {0}")]
    Unsupported(String),

    /// Configured fee basis points are outside `0..=MAX_FEE_BPS`. Fatal
    /// misconfiguration; rejected without retry.
    #[error("configured fee of {0} bps is outside the allowed range")]
    FeeBpsConfigInvalid(u32),

    /// Caller-declared fee bps differ from the effective rate.
    #[error("declared fee of {declared} bps does not match effective {effective} bps")]
    FeeBpsMismatch {
        /// Fee bps the caller declared.
        declared: u32,
        /// Fee bps actually in effect.
        effective: u32,
    },

    /// Paid amount does not equal the listed amount.
    #[error("paid amount does not match listed amount")]
    AmountMismatch {
        /// Amount the buyer was expected to pay.
        expected: Decimal,
        /// Amount the proof carries, if any.
        paid: Option<Decimal>,
    },

    /// No quoted candidate base reproduced the submitted gross exactly.
    #[error("checkout quote mismatch for gross amount {0}")]
    QuoteMismatch(Decimal),

    /// A listed or paid amount failed to parse or convert.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// The checkout contract could not be read.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// A validated gross/fee/net split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSplit {
    /// Amount the buyer pays.
    pub gross: Decimal,
    /// Fee carved out of the gross.
    pub fee: Decimal,
    /// Merchant's net proceeds.
    pub merchant_net: Decimal,
    /// Effective fee rate in basis points.
    pub fee_bps: u32,
    /// Whether the split came from the on-chain checkout quote.
    pub quoted_onchain: bool,
}

/// Fee for a base amount at a bps rate, rounded to token granularity.
#[must_use]
pub fn compute_fee_amount(base: Decimal, fee_bps: u32) -> Decimal {
    round6(base * Decimal::from(fee_bps) / Decimal::from(BPS_DENOMINATOR as u64))
}

/// Checks the configured fee rate is inside the allowed range.
///
/// # Errors
///
/// Returns [`PricingError::FeeBpsConfigInvalid`] when out of range.
pub const fn validate_fee_bps_config(fee_bps: u32) -> Result<(), PricingError> {
    if fee_bps > MAX_FEE_BPS {
        return Err(PricingError::FeeBpsConfigInvalid(fee_bps));
    }
    Ok(())
}

fn check_supported(pricing: &Pricing, supported: &SupportedPair) -> Result<(), PricingError> {
    if !pricing.chain.eq_ignore_ascii_case(&supported.chain) {
        return Err(PricingError::Unsupported(format!(
            "only chain {} is supported",
            supported.chain
        )));
    }
    if !pricing.currency.eq_ignore_ascii_case(&supported.currency) {
        return Err(PricingError::Unsupported(format!(
            "only currency {} is supported",
            supported.currency
        )));
    }
    Ok(())
}

/// Validates a paid amount against the listed price under the fixed-bps
/// policy. The buyer pays exactly the listed amount; the fee comes out of
/// the merchant's cut, not on top.
///
/// # Errors
///
/// Returns [`PricingError`] on unsupported pair, fee mismatch, or amount
/// mismatch.
pub fn validate_fixed(
    pricing: &Pricing,
    declared_fee_bps: u32,
    paid_amount: Option<&str>,
    configured_fee_bps: u32,
    supported: &SupportedPair,
) -> Result<PriceSplit, PricingError> {
    check_supported(pricing, supported)?;
    validate_fee_bps_config(configured_fee_bps)?;
    if declared_fee_bps != configured_fee_bps {
        return Err(PricingError::FeeBpsMismatch {
            declared: declared_fee_bps,
            effective: configured_fee_bps,
        });
    }

    let listed = round6(parse_amount(&pricing.amount)?);
    let paid = paid_amount.map(parse_amount).transpose()?;
    match paid {
        Some(paid) if paid == listed => {}
        other => {
            return Err(PricingError::AmountMismatch {
                expected: listed,
                paid: other,
            });
        }
    }

    let fee = compute_fee_amount(listed, configured_fee_bps);
    Ok(PriceSplit {
        gross: listed,
        fee,
        merchant_net: round6(listed - fee),
        fee_bps: configured_fee_bps,
        quoted_onchain: false,
    })
}

/// Validates a paid amount against the checkout contract's quoted split.
///
/// # Errors
///
/// Returns [`PricingError::QuoteMismatch`] when no candidate base reproduces
/// the submitted gross, plus the same validation errors as the fixed policy.
pub async fn validate_quoted(
    pricing: &Pricing,
    declared_fee_bps: u32,
    paid_amount: Option<&str>,
    quoter: &dyn CheckoutQuoter,
    supported: &SupportedPair,
    token_decimals: u32,
) -> Result<PriceSplit, PricingError> {
    check_supported(pricing, supported)?;

    let listed = round6(parse_amount(&pricing.amount)?);
    let paid = paid_amount.map(parse_amount).transpose()?;
    match paid {
        Some(paid) if paid == listed => {}
        other => {
            return Err(PricingError::AmountMismatch {
                expected: listed,
                paid: other,
            });
        }
    }

    let effective = quoter.fee_bps().await?;
    validate_fee_bps_config(effective)?;
    if declared_fee_bps != effective {
        return Err(PricingError::FeeBpsMismatch {
            declared: declared_fee_bps,
            effective,
        });
    }

    let gross_units = to_base_units(listed, token_decimals)?;
    let base = gross_units * BPS_DENOMINATOR / (BPS_DENOMINATOR + u128::from(effective));
    for candidate in [base, base + 1] {
        if candidate == 0 {
            continue;
        }
        let quote = quoter.quote_split(candidate).await?;
        if quote.gross_units != gross_units {
            continue;
        }
        return Ok(PriceSplit {
            gross: listed,
            fee: from_base_units(quote.fee_units, token_decimals)?,
            merchant_net: from_base_units(quote.merchant_net_units, token_decimals)?,
            fee_bps: effective,
            quoted_onchain: true,
        });
    }

    Err(PricingError::QuoteMismatch(listed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SplitQuote;
    use async_trait::async_trait;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn pricing(amount: &str) -> Pricing {
        Pricing {
            currency: "USDC".into(),
            chain: "base-sepolia".into(),
            amount: amount.into(),
        }
    }

    fn supported() -> SupportedPair {
        SupportedPair {
            chain: "base-sepolia".into(),
            currency: "USDC".into(),
        }
    }

    #[test]
    fn test_fixed_split_carves_fee_from_merchant() {
        let split =
            validate_fixed(&pricing("100.00"), 100, Some("100.00"), 100, &supported()).unwrap();
        assert_eq!(split.gross, d("100.00"));
        assert_eq!(split.fee, d("1.00"));
        assert_eq!(split.merchant_net, d("99.00"));
        assert!(!split.quoted_onchain);
    }

    #[test]
    fn test_fixed_rejects_underpayment() {
        let err = validate_fixed(&pricing("100.00"), 100, Some("99.999999"), 100, &supported())
            .unwrap_err();
        match err {
            PricingError::AmountMismatch { expected, paid } => {
                assert_eq!(expected, d("100.00"));
                assert_eq!(paid, Some(d("99.999999")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fixed_rejects_missing_paid_amount() {
        let err = validate_fixed(&pricing("10"), 100, None, 100, &supported()).unwrap_err();
        assert!(matches!(
            err,
            PricingError::AmountMismatch { paid: None, .. }
        ));
    }

    #[test]
    fn test_fixed_rejects_declared_bps_mismatch() {
        let err = validate_fixed(&pricing("10"), 250, Some("10"), 100, &supported()).unwrap_err();
        assert!(matches!(
            err,
            PricingError::FeeBpsMismatch {
                declared: 250,
                effective: 100
            }
        ));
    }

    #[test]
    fn test_fixed_rejects_unsupported_chain() {
        let mut p = pricing("10");
        p.chain = "mainnet".into();
        let err = validate_fixed(&p, 100, Some("10"), 100, &supported()).unwrap_err();
        assert!(matches!(err, PricingError::Unsupported(_)));
    }

    #[test]
    fn test_config_bps_range() {
        assert!(validate_fee_bps_config(0).is_ok());
        assert!(validate_fee_bps_config(2_500).is_ok());
        assert!(matches!(
            validate_fee_bps_config(2_501),
            Err(PricingError::FeeBpsConfigInvalid(2_501))
        ));
    }

    /// Quoter that splits with integer floor division, the way the checkout
    /// contract computes `quoteSplit(base) = (base + fee, fee, base)`.
    struct FloorQuoter {
        fee_bps: u32,
    }

    #[async_trait]
    impl CheckoutQuoter for FloorQuoter {
        async fn fee_bps(&self) -> Result<u32, ChainError> {
            Ok(self.fee_bps)
        }

        async fn quote_split(&self, base_units: u128) -> Result<SplitQuote, ChainError> {
            let fee = base_units * u128::from(self.fee_bps) / 10_000;
            Ok(SplitQuote {
                gross_units: base_units + fee,
                fee_units: fee,
                merchant_net_units: base_units,
            })
        }
    }

    #[tokio::test]
    async fn test_quoted_split_matches_exact_gross() {
        let quoter = FloorQuoter { fee_bps: 100 };
        // gross 101.00 => base 100.00, fee 1.00
        let split = validate_quoted(
            &pricing("101.00"),
            100,
            Some("101.00"),
            &quoter,
            &supported(),
            6,
        )
        .await
        .unwrap();
        assert_eq!(split.gross, d("101.00"));
        assert_eq!(split.fee, d("1.00"));
        assert_eq!(split.merchant_net, d("100.00"));
        assert!(split.quoted_onchain);
    }

    #[tokio::test]
    async fn test_quoted_fails_closed_on_unreproducible_gross() {
        let quoter = FloorQuoter { fee_bps: 100 };
        // 100 base units: base 99 quotes gross 99, base 100 quotes gross 101,
        // so a gross of exactly 100 units is unreachable.
        let err = validate_quoted(
            &pricing("0.0001"),
            100,
            Some("0.0001"),
            &quoter,
            &supported(),
            6,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PricingError::QuoteMismatch(_)));
    }
}
