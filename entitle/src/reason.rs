//! Stable reason codes and the caller-facing response envelope.
//!
//! Reason codes are part of the wire contract: compatible reimplementations
//! and clients match on these strings verbatim, so variants may be added but
//! never renamed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable outcome code carried on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Purchase committed: entitlement granted, payout queued.
    PurchaseSuccess,
    /// Idempotent replay: this purchase was already committed.
    PurchaseAlreadyRecorded,
    /// Same buyer and product paid again with a different transaction;
    /// the extra payment needs a manual refund, not settlement.
    RefundEligibleDuplicatePurchase,
    /// Paid amount does not match the listed amount and fee policy.
    FeeMismatch,
    /// Caller-declared fee basis points differ from the effective rate.
    FeeBpsMismatch,
    /// Configured fee basis points are outside the allowed range.
    FeeBpsConfigInvalid,
    /// Proof pays a wallet other than the configured settlement wallet.
    PayeeMismatch,
    /// Chain or currency is not the supported pair.
    PricingUnsupported,
    /// Payment proof matched no accepted schema or had malformed fields.
    InvalidProof,
    /// On-chain entitlement write failed; nothing was recorded off-chain.
    ChainWriteFailed,
    /// On-chain write succeeded but the off-chain commit failed; the system
    /// needs out-of-band reconciliation.
    CommitPersistenceFailed,
    /// Settlement recorded; queue item is now SETTLED.
    SettlementRecorded,
    /// No PENDING settlement queue item matched.
    SettlementNotFound,
    /// Supplied settlement hash equals the buyer's payment hash.
    SettlementSelfPayment,
    /// The queue item's mode does not allow this settlement path.
    SettlementModeRestricted,
    /// Proof normalized successfully (verify-only flow).
    VerifyOk,
    /// Buyer holds the entitlement mirror record; restore may proceed.
    RestoreAllowed,
    /// Buyer does not own the product.
    NotOwned,
    /// Refund request accepted for manual review.
    RefundEligibleReview,
    /// Refund auto-rejected while the entitlement is active.
    RefundRejectedEntitlementActive,
    /// The off-chain store was unreachable after bounded retries.
    StoreUnavailable,
}

impl ReasonCode {
    /// The stable wire string for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PurchaseSuccess => "PURCHASE_SUCCESS",
            Self::PurchaseAlreadyRecorded => "PURCHASE_ALREADY_RECORDED",
            Self::RefundEligibleDuplicatePurchase => "REFUND_ELIGIBLE_DUPLICATE_PURCHASE",
            Self::FeeMismatch => "FEE_MISMATCH",
            Self::FeeBpsMismatch => "FEE_BPS_MISMATCH",
            Self::FeeBpsConfigInvalid => "FEE_BPS_CONFIG_INVALID",
            Self::PayeeMismatch => "PAYEE_MISMATCH",
            Self::PricingUnsupported => "PRICING_UNSUPPORTED",
            Self::InvalidProof => "INVALID_PROOF",
            Self::ChainWriteFailed => "CHAIN_WRITE_FAILED",
            Self::CommitPersistenceFailed => "COMMIT_PERSISTENCE_FAILED",
            Self::SettlementRecorded => "SETTLEMENT_RECORDED",
            Self::SettlementNotFound => "SETTLEMENT_NOT_FOUND",
            Self::SettlementSelfPayment => "SETTLEMENT_SELF_PAYMENT",
            Self::SettlementModeRestricted => "SETTLEMENT_MODE_RESTRICTED",
            Self::VerifyOk => "VERIFY_OK",
            Self::RestoreAllowed => "RESTORE_ALLOWED",
            Self::NotOwned => "NOT_OWNED",
            Self::RefundEligibleReview => "REFUND_ELIGIBLE_REVIEW",
            Self::RefundRejectedEntitlementActive => "REFUND_REJECTED_ENTITLEMENT_ACTIVE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform response envelope for every exposed operation.
///
/// Failures never leak stack traces; only the reason code, a human-readable
/// message, and minimal structured diagnostic data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    /// Whether the operation succeeded (idempotent no-ops count as failures
    /// or successes per their reason code, not as errors).
    pub ok: bool,
    /// Which operation produced this response.
    pub action: String,
    /// Stable machine-readable outcome.
    pub reason_code: ReasonCode,
    /// Human-readable summary.
    pub message: String,
    /// Optional structured diagnostic payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResponse {
    /// Builds a success envelope.
    #[must_use]
    pub fn ok(action: &str, reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            action: action.to_owned(),
            reason_code,
            message: message.into(),
            data: None,
        }
    }

    /// Builds a failure envelope.
    #[must_use]
    pub fn rejected(action: &str, reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            action: action.to_owned(),
            reason_code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured diagnostic data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_serialize_verbatim() {
        for (code, expected) in [
            (ReasonCode::PurchaseSuccess, "PURCHASE_SUCCESS"),
            (
                ReasonCode::PurchaseAlreadyRecorded,
                "PURCHASE_ALREADY_RECORDED",
            ),
            (
                ReasonCode::RefundEligibleDuplicatePurchase,
                "REFUND_ELIGIBLE_DUPLICATE_PURCHASE",
            ),
            (ReasonCode::FeeMismatch, "FEE_MISMATCH"),
            (ReasonCode::PayeeMismatch, "PAYEE_MISMATCH"),
            (ReasonCode::SettlementRecorded, "SETTLEMENT_RECORDED"),
            (ReasonCode::SettlementNotFound, "SETTLEMENT_NOT_FOUND"),
        ] {
            assert_eq!(
                serde_json::to_string(&code).unwrap(),
                format!("\"{expected}\"")
            );
            assert_eq!(code.as_str(), expected);
        }
    }

    #[test]
    fn test_envelope_shape() {
        let response = ActionResponse::ok("purchase", ReasonCode::PurchaseSuccess, "done")
            .with_data(serde_json::json!({ "fingerprint": "proof:tx:1:a:b:c:1:usdc" }));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["reasonCode"], "PURCHASE_SUCCESS");
        assert_eq!(value["data"]["fingerprint"], "proof:tx:1:a:b:c:1:usdc");
    }
}
