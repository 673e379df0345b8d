//! Off-chain ledger store abstraction.
//!
//! The store holds the five purchase collections (replay store, entitlement
//! mirror, purchase records, merchant ledgers, settlement queue) plus the
//! refund-eligibility collection. It offers no multi-document transactions;
//! all cross-request coordination rides on atomic insert-if-absent and
//! increment primitives, which is why every operation here is additive.
//!
//! The production implementation (`entitle-store`) speaks to a database
//! bridge over HTTP; tests use an in-memory fake.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::ledger::{
    Entitlement, PurchaseRecord, ReplayRecord, SettlementMode, SettlementQueueItem,
};
use crate::proof::ProofKind;

/// Errors from the off-chain store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The bridge could not be reached at the transport level.
    #[error("store transport failed: {0}")]
    Transport(String),

    /// The bridge answered with a non-retryable error status.
    #[error("store returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated diagnostic).
        body: String,
    },

    /// The bridge kept failing with retryable statuses until attempts ran out.
    #[error("store {action} failed after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        /// Bridge action that failed.
        action: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        message: String,
    },

    /// The bridge response did not decode into the expected shape.
    #[error("unexpected store response: {0}")]
    Decode(String),
}

/// Input for the five-collection purchase commit.
#[derive(Debug, Clone)]
pub struct PurchaseCommit {
    /// Purchase intent identifier.
    pub intent_id: String,
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Proof fingerprint; unique key of the replay record.
    pub fingerprint: String,
    /// Shape of the accepted proof.
    pub proof_kind: ProofKind,
    /// Buyer payment transaction hash.
    pub payment_tx_hash: String,
    /// On-chain entitlement transaction hash.
    pub entitlement_tx_hash: String,
    /// Marketplace settlement wallet the payment landed in.
    pub agent_wallet: String,
    /// Amount the buyer paid.
    pub gross_amount: Decimal,
    /// Fee carved out of the gross.
    pub fee_amount: Decimal,
    /// Merchant's net proceeds.
    pub merchant_net_amount: Decimal,
    /// Fee rate in basis points in effect.
    pub fee_bps: u32,
    /// Payout mode for the queued settlement.
    pub settlement_mode: SettlementMode,
    /// Commit timestamp (ISO-8601 UTC).
    pub now_iso: String,
}

/// A detected duplicate purchase attempt with a different transaction hash.
#[derive(Debug, Clone)]
pub struct DuplicateAttempt {
    /// Buyer address.
    pub buyer: String,
    /// Product identifier.
    pub product_id: String,
    /// Merchant address.
    pub merchant: String,
    /// Intent id of the duplicate attempt.
    pub intent_id: String,
    /// Fingerprint of the duplicate attempt.
    pub fingerprint: String,
}

/// Fields recorded when a queue item transitions to SETTLED.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    /// Payout transaction hash.
    pub settlement_tx_hash: String,
    /// Operator or service that recorded the settlement.
    pub settled_by: String,
    /// Settlement timestamp (ISO-8601 UTC).
    pub settled_at: String,
}

/// The off-chain ledger store.
///
/// All write operations are insert-if-absent, increment, or one-way status
/// transitions. None may overwrite existing data.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Point lookup: has this fingerprint ever been accepted?
    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// Insert-if-absent of a replay record. A no-op when the fingerprint
    /// already exists; never overwrites.
    async fn store_fingerprint(&self, record: &ReplayRecord) -> Result<(), StoreError>;

    /// Entitlement-mirror lookup by (buyer, productId).
    async fn find_entitlement(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Option<Entitlement>, StoreError>;

    /// All purchase records for (buyer, productId).
    async fn find_purchases(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Vec<PurchaseRecord>, StoreError>;

    /// The purchase record committed under an intent id, if any.
    async fn find_purchase_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PurchaseRecord>, StoreError>;

    /// Creates or increments the refund-eligibility record for the attempt's
    /// (buyer, productId). Returns the duplicate-attempt count after the
    /// increment.
    async fn record_duplicate_attempt(&self, attempt: &DuplicateAttempt)
    -> Result<u64, StoreError>;

    /// The five-collection commit: replay record first, then entitlement
    /// mirror, purchase record, merchant accrual, settlement queue.
    ///
    /// Replay-store-first ordering keeps the sequence re-entrant: if a later
    /// write fails and the whole request retries, the replay check catches it
    /// before a second on-chain write.
    async fn purchase_commit(&self, commit: &PurchaseCommit) -> Result<(), StoreError>;

    /// The PENDING settlement queue item for an intent, if any.
    async fn find_pending_settlement(
        &self,
        intent_id: &str,
    ) -> Result<Option<SettlementQueueItem>, StoreError>;

    /// Transitions the PENDING queue item for `intent_id` to SETTLED.
    /// Returns `false` when no PENDING item matched (already settled or
    /// unknown) — the transition is one-way and never reverts.
    async fn mark_settled(
        &self,
        intent_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<bool, StoreError>;

    /// Increments the merchant ledger's `netSettledToMerchant` after a
    /// successful settlement.
    async fn record_merchant_settlement(
        &self,
        merchant: &str,
        merchant_net_amount: Decimal,
        intent_id: &str,
        settlement_tx_hash: &str,
    ) -> Result<(), StoreError>;
}

// One store instance backs both the purchase coordinator and the settlement
// service, so the trait delegates through Arc.
#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<T> {
    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        (**self).has_fingerprint(fingerprint).await
    }

    async fn store_fingerprint(&self, record: &ReplayRecord) -> Result<(), StoreError> {
        (**self).store_fingerprint(record).await
    }

    async fn find_entitlement(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Option<Entitlement>, StoreError> {
        (**self).find_entitlement(buyer, product_id).await
    }

    async fn find_purchases(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        (**self).find_purchases(buyer, product_id).await
    }

    async fn find_purchase_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PurchaseRecord>, StoreError> {
        (**self).find_purchase_by_intent(intent_id).await
    }

    async fn record_duplicate_attempt(
        &self,
        attempt: &DuplicateAttempt,
    ) -> Result<u64, StoreError> {
        (**self).record_duplicate_attempt(attempt).await
    }

    async fn purchase_commit(&self, commit: &PurchaseCommit) -> Result<(), StoreError> {
        (**self).purchase_commit(commit).await
    }

    async fn find_pending_settlement(
        &self,
        intent_id: &str,
    ) -> Result<Option<SettlementQueueItem>, StoreError> {
        (**self).find_pending_settlement(intent_id).await
    }

    async fn mark_settled(
        &self,
        intent_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<bool, StoreError> {
        (**self).mark_settled(intent_id, outcome).await
    }

    async fn record_merchant_settlement(
        &self,
        merchant: &str,
        merchant_net_amount: Decimal,
        intent_id: &str,
        settlement_tx_hash: &str,
    ) -> Result<(), StoreError> {
        (**self)
            .record_merchant_settlement(merchant, merchant_net_amount, intent_id, settlement_tx_hash)
            .await
    }
}
