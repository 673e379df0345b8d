//! Merchant settlement: the one-way `PENDING -> SETTLED` transition.
//!
//! Settlement pays the merchant their accrued net and records the payout
//! against the queue item committed at purchase time. The transition is
//! monotonic: the conditional store update matches only PENDING items, so a
//! second settle of the same intent reports `SETTLEMENT_NOT_FOUND` instead
//! of paying twice.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::ledger::{SettlementMode, now_iso};
use crate::reason::ReasonCode;
use crate::store::{LedgerStore, SettlementOutcome, StoreError};

/// A request to settle one queued purchase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Intent id of the purchase to settle.
    pub intent_id: String,
    /// Operator or service recording the settlement.
    pub settled_by: String,
    /// Payout transaction hash, when the payout was executed out-of-band.
    /// When absent, the configured executor performs the payout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<String>,
}

/// What an executor needs to pay a merchant.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    /// Intent id of the purchase being settled.
    pub intent_id: String,
    /// Product identifier.
    pub product_id: String,
    /// Merchant payout address.
    pub merchant: String,
    /// Buyer address.
    pub buyer: String,
    /// Net amount owed to the merchant.
    pub merchant_net_amount: Decimal,
}

/// Executes the actual on-chain payout for a settlement.
#[async_trait]
pub trait SettlementExecutor: Send + Sync {
    /// Pays the merchant and returns the payout transaction hash.
    async fn settle(&self, request: &ExecutorRequest) -> Result<String, SettleError>;
}

/// Record of a completed settlement.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    /// Intent id that was settled.
    pub intent_id: String,
    /// Merchant paid.
    pub merchant: String,
    /// Net amount credited to the merchant.
    pub merchant_net_amount: Decimal,
    /// Payout transaction hash.
    pub settlement_tx_hash: String,
}

/// Errors from the settlement flow.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    /// No PENDING queue item for the intent: unknown, or already settled.
    #[error("no pending settlement for intent {0}")]
    NotFound(String),

    /// The payout would transfer to the settlement wallet itself.
    #[error("settlement for intent {0} would pay the payment transaction back to itself")]
    SelfPayment(String),

    /// The queue item only permits recording an out-of-band transfer, but no
    /// payout hash was supplied.
    #[error("intent {0} is transfer-only; a settlement transaction hash is required")]
    ModeRestricted(String),

    /// No payout hash supplied and no executor configured.
    #[error("no settlement executor configured and no settlement transaction hash supplied")]
    ExecutorUnavailable,

    /// The executor failed to pay out.
    #[error("settlement execution failed: {0}")]
    Executor(String),

    /// The store was unreachable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SettleError {
    /// Stable reason code for this failure.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        match self {
            Self::NotFound(_) => ReasonCode::SettlementNotFound,
            Self::SelfPayment(_) => ReasonCode::SettlementSelfPayment,
            Self::ModeRestricted(_) => ReasonCode::SettlementModeRestricted,
            Self::ExecutorUnavailable | Self::Executor(_) => ReasonCode::ChainWriteFailed,
            Self::Store(_) => ReasonCode::StoreUnavailable,
        }
    }
}

/// Drives settlements against the ledger store, optionally executing payouts
/// through a [`SettlementExecutor`].
pub struct SettlementService<S> {
    store: S,
    executor: Option<Arc<dyn SettlementExecutor>>,
}

impl<S> std::fmt::Debug for SettlementService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementService")
            .field("has_executor", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> SettlementService<S>
where
    S: LedgerStore,
{
    /// Creates a record-only settlement service: payouts happen out-of-band
    /// and callers supply the payout hash.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            executor: None,
        }
    }

    /// Attaches an executor for payouts the service performs itself.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn SettlementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Settles one queued purchase.
    ///
    /// # Errors
    ///
    /// Returns [`SettleError`]; notably [`SettleError::NotFound`] on a
    /// double settle, which callers should treat as terminal rather than
    /// retry.
    pub async fn settle(&self, request: &SettleRequest) -> Result<SettlementReceipt, SettleError> {
        let Some(item) = self
            .store
            .find_pending_settlement(&request.intent_id)
            .await?
        else {
            return Err(SettleError::NotFound(request.intent_id.clone()));
        };

        let settlement_tx_hash = match (&request.settlement_tx_hash, &self.executor) {
            (Some(hash), _) => hash.clone(),
            (None, _) if item.settlement_mode == SettlementMode::TransferOnly => {
                // The buyer's payment already sits with the merchant's funds
                // intermingled; only an out-of-band transfer can settle it.
                return Err(SettleError::ModeRestricted(request.intent_id.clone()));
            }
            (None, Some(executor)) => {
                let hash = executor
                    .settle(&ExecutorRequest {
                        intent_id: item.intent_id.clone(),
                        product_id: item.product_id.clone(),
                        merchant: item.merchant.clone(),
                        buyer: item.buyer.clone(),
                        merchant_net_amount: item.merchant_net_amount,
                    })
                    .await?;
                tracing::info!(intent = %item.intent_id, tx = %hash, "payout executed");
                hash
            }
            (None, None) => return Err(SettleError::ExecutorUnavailable),
        };

        // A payout hash equal to the original payment hash means the caller
        // echoed the buyer's transaction back; that settles nothing.
        if let Some(purchase) = self.store.find_purchase_by_intent(&item.intent_id).await?
            && purchase
                .payment_tx_hash
                .eq_ignore_ascii_case(&settlement_tx_hash)
        {
            return Err(SettleError::SelfPayment(request.intent_id.clone()));
        }

        let outcome = SettlementOutcome {
            settlement_tx_hash: settlement_tx_hash.clone(),
            settled_by: request.settled_by.clone(),
            settled_at: now_iso(),
        };
        // Conditional on PENDING: a concurrent settle of the same intent
        // loses the race here and reports NotFound.
        if !self.store.mark_settled(&item.intent_id, &outcome).await? {
            return Err(SettleError::NotFound(request.intent_id.clone()));
        }

        self.store
            .record_merchant_settlement(
                &item.merchant,
                item.merchant_net_amount,
                &item.intent_id,
                &settlement_tx_hash,
            )
            .await?;
        tracing::info!(
            intent = %item.intent_id,
            merchant = %item.merchant,
            net = %item.merchant_net_amount,
            "settlement recorded"
        );

        Ok(SettlementReceipt {
            intent_id: item.intent_id,
            merchant: item.merchant,
            merchant_net_amount: item.merchant_net_amount,
            settlement_tx_hash,
        })
    }
}
