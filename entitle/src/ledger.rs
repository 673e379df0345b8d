//! Off-chain ledger record types.
//!
//! Every record here is created exactly once by the purchase-commit
//! coordinator (or the settlement state machine for settlement fields) and
//! never deleted. Mutation is limited to counter increments and one-way
//! status transitions; that additive discipline is what makes replays safe
//! without cross-collection transactions.

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::proof::ProofKind;

/// Current UTC time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One accepted payment-proof fingerprint. Insert-if-absent only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    /// Deduplication fingerprint (unique key).
    pub fingerprint: String,
    /// Purchase intent this fingerprint was first accepted under.
    pub intent_id: String,
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Shape of the accepted proof.
    pub proof_kind: ProofKind,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
}

/// Off-chain mirror of an on-chain entitlement grant.
///
/// Keyed by (buyer, productId); insert-if-absent only. The on-chain registry
/// stays authoritative for "owns" queries; this mirror only serves display
/// and restore flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Purchase intent that granted the entitlement.
    pub intent_id: String,
    /// On-chain entitlement transaction hash.
    pub tx_hash: String,
    /// Grant timestamp (ISO-8601 UTC).
    pub granted_at: String,
}

/// Audit-grade purchase log entry. Append-only; one row per accepted
/// purchase attempt, never per retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    /// Purchase intent identifier.
    pub intent_id: String,
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Proof fingerprint this purchase committed under.
    pub fingerprint: String,
    /// Shape of the accepted proof.
    pub proof_kind: ProofKind,
    /// Amount the buyer paid.
    pub gross_amount: Decimal,
    /// Marketplace fee carved out of the gross.
    pub fee_amount: Decimal,
    /// Merchant's net proceeds.
    pub merchant_net_amount: Decimal,
    /// Fee rate in basis points in effect at commit time.
    pub fee_bps: u32,
    /// Buyer payment transaction hash.
    pub payment_tx_hash: String,
    /// On-chain entitlement transaction hash.
    pub entitlement_tx_hash: String,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
}

/// Running accrual per merchant. Counters only increase via commit;
/// `net_settled_to_merchant` only increases via settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantLedger {
    /// Merchant address (unique key).
    pub merchant: String,
    /// Number of committed purchases.
    pub purchase_count: u64,
    /// Total gross collected across purchases.
    pub gross_collected: Decimal,
    /// Total fees collected across purchases.
    pub fee_collected: Decimal,
    /// Total net owed to the merchant.
    pub net_owed_to_merchant: Decimal,
    /// Total net already paid out to the merchant.
    pub net_settled_to_merchant: Decimal,
    /// Wallet the marketplace collects into.
    pub settlement_wallet: String,
    /// Last-update timestamp (ISO-8601 UTC).
    pub updated_at: String,
}

/// Settlement queue item status. Monotonic: PENDING -> SETTLED, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// Queued, payout not yet made.
    Pending,
    /// Paid out; terminal.
    Settled,
}

/// How a queued payout may be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementMode {
    /// Standard settlement; the automated checkout payout call is allowed.
    Standard,
    /// Restricted mode for protocol-verified proofs: only a direct token
    /// transfer (operator-supplied transaction hash) may settle the payout.
    TransferOnly,
}

impl SettlementMode {
    /// Derives the settlement mode from the proof shape that paid.
    #[must_use]
    pub const fn for_proof(kind: ProofKind) -> Self {
        match kind {
            ProofKind::Protocol => Self::TransferOnly,
            ProofKind::DirectTx => Self::Standard,
        }
    }
}

/// One payout obligation awaiting (or having completed) settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementQueueItem {
    /// Purchase intent identifier.
    pub intent_id: String,
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Amount the buyer paid.
    pub gross_amount: Decimal,
    /// Marketplace fee carved out of the gross.
    pub fee_amount: Decimal,
    /// Merchant's net proceeds to pay out.
    pub merchant_net_amount: Decimal,
    /// Fee rate in basis points in effect at commit time.
    pub fee_bps: u32,
    /// Queue status; transitions PENDING -> SETTLED exactly once.
    pub status: SettlementStatus,
    /// Allowed settlement execution mode.
    pub settlement_mode: SettlementMode,
    /// Payout transaction hash, once settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<String>,
    /// Who recorded the settlement, once settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_by: Option<String>,
    /// Settlement timestamp, once settled (ISO-8601 UTC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<String>,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
    /// Last-update timestamp (ISO-8601 UTC).
    pub updated_at: String,
}

/// Tracks suspicious repeat purchases for the same (buyer, productId) with a
/// different payment transaction. Created/incremented only on detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEligibilityRecord {
    /// Buyer address.
    pub buyer: String,
    /// Product identifier.
    pub product_id: String,
    /// Merchant address.
    pub merchant: String,
    /// How many duplicate attempts with distinct transactions were seen.
    pub duplicate_attempts: u64,
    /// Intent id of the most recent duplicate attempt.
    pub latest_intent_id: String,
    /// Fingerprint of the most recent duplicate attempt.
    pub latest_fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_mode_from_proof_kind() {
        assert_eq!(
            SettlementMode::for_proof(ProofKind::Protocol),
            SettlementMode::TransferOnly
        );
        assert_eq!(
            SettlementMode::for_proof(ProofKind::DirectTx),
            SettlementMode::Standard
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SettlementStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&SettlementMode::TransferOnly).unwrap(),
            "\"TRANSFER_ONLY\""
        );
    }

    #[test]
    fn test_queue_item_camel_case_wire() {
        let item = SettlementQueueItem {
            intent_id: "intent-1".into(),
            buyer: "0xb".into(),
            merchant: "0xm".into(),
            product_id: "prod-1".into(),
            gross_amount: "100".parse().unwrap(),
            fee_amount: "1".parse().unwrap(),
            merchant_net_amount: "99".parse().unwrap(),
            fee_bps: 100,
            status: SettlementStatus::Pending,
            settlement_mode: SettlementMode::Standard,
            settlement_tx_hash: None,
            settled_by: None,
            settled_at: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["intentId"], "intent-1");
        assert_eq!(value["merchantNetAmount"], "99");
        assert!(value.get("settlementTxHash").is_none());
    }
}
