//! The idempotent purchase-commit coordinator.
//!
//! Sequences proof validation, pricing checks, duplicate detection, the
//! on-chain entitlement write, and the five-collection off-chain commit as
//! one idempotent unit:
//!
//! ```text
//! RECEIVED -> PROOF_VALIDATED -> PRICING_VALIDATED -> DUPLICATE_CHECKED
//!          -> ENTITLED_ONCHAIN -> COMMITTED
//! ```
//!
//! Replays of a logically-identical request short-circuit at the duplicate
//! checks and report `PURCHASE_ALREADY_RECORDED` — a success, not an error.
//! A duplicate purchase with a *different* payment transaction is the one
//! genuinely suspicious case; it increments the refund-eligibility counter
//! and rejects, because the extra payment needs a manual refund.
//!
//! Ordering is the safety argument: nothing is written off-chain before the
//! on-chain write succeeds, and the replay record is the first off-chain
//! write, so any partial failure leaves the request safely retriable from
//! the top.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::chain::{ChainError, CheckoutQuoter, EntitlementChain};
use crate::ledger::{Entitlement, SettlementMode, now_iso};
use crate::pricing::{self, PriceSplit, Pricing, PricingError, SupportedPair};
use crate::proof::{NormalizedProof, PaymentProof, ProofError};
use crate::reason::ReasonCode;
use crate::store::{DuplicateAttempt, LedgerStore, PurchaseCommit, StoreError};

/// Deployment-wide commerce configuration.
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    /// Supported chain name (e.g. `base-sepolia`).
    pub chain: String,
    /// Supported currency symbol (e.g. `USDC`).
    pub currency: String,
    /// Marketplace wallet all payments must land in. Compared
    /// case-insensitively against the proof's `payTo`.
    pub settlement_wallet: String,
    /// Fixed fee rate in basis points (used when no checkout quoter is
    /// configured).
    pub fee_bps: u32,
    /// Decimals of the settlement token's base unit.
    pub token_decimals: u32,
}

impl CommerceConfig {
    /// Validates the configuration at startup.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::FeeBpsConfigInvalid`] when the fee rate is out
    /// of range. Fatal; the process should refuse to start.
    pub const fn validate(&self) -> Result<(), PricingError> {
        pricing::validate_fee_bps_config(self.fee_bps)
    }

    fn supported_pair(&self) -> SupportedPair {
        SupportedPair {
            chain: self.chain.clone(),
            currency: self.currency.clone(),
        }
    }
}

/// An inbound purchase request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    /// Client-chosen intent identifier; retries reuse it.
    pub intent_id: String,
    /// Buyer address.
    pub buyer: String,
    /// Merchant address.
    pub merchant: String,
    /// Product identifier.
    pub product_id: String,
    /// Listing pricing the buyer paid against.
    pub pricing: Pricing,
    /// Fee rate the caller believes is in effect, in basis points.
    pub fee_bps: u32,
    /// Payment proof in any accepted shape.
    pub proof: Value,
}

/// Receipt for a freshly committed purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    /// Deduplication fingerprint the purchase committed under.
    pub fingerprint: String,
    /// On-chain entitlement transaction hash.
    pub entitlement_tx_hash: String,
    /// Validated gross/fee/net split.
    pub split: PriceSplit,
    /// Payout mode queued for settlement.
    pub settlement_mode: SettlementMode,
}

/// Outcome of a purchase request that did not fail.
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    /// First-time commit: entitlement granted, payout queued.
    Committed(PurchaseReceipt),
    /// Idempotent replay of an already-committed purchase.
    AlreadyRecorded {
        /// Fingerprint of the replayed proof.
        fingerprint: String,
    },
}

/// Errors from the purchase-commit sequence.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    /// Proof failed normalization (step 1).
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// Pricing or fee validation failed (step 2).
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Proof pays a wallet other than the settlement wallet (step 3).
    #[error("proof pays {received} but the settlement wallet is {expected}")]
    PayeeMismatch {
        /// Configured settlement wallet.
        expected: String,
        /// `payTo` the proof carried.
        received: String,
    },

    /// Same buyer/product paid again with a different transaction (step 4b).
    #[error("duplicate purchase attempt for buyer {buyer} and product {product_id}")]
    RefundEligibleDuplicate {
        /// Buyer address.
        buyer: String,
        /// Product identifier.
        product_id: String,
        /// Payment hash of the original committed purchase.
        prior_tx_hash: String,
        /// Duplicate-attempt count after recording this one.
        attempts: u64,
    },

    /// A chain read failed during duplicate checks.
    #[error("chain read failed: {0}")]
    ChainRead(ChainError),

    /// The on-chain entitlement write failed (step 5). Nothing was written
    /// off-chain.
    #[error("entitlement write failed: {0}")]
    ChainWrite(ChainError),

    /// On-chain write succeeded but the off-chain commit failed (step 6).
    /// Requires out-of-band reconciliation; the entitlement already exists
    /// on-chain.
    #[error("off-chain commit failed after entitlement write {entitlement_tx_hash}: {source}")]
    CommitPersistence {
        /// Hash of the on-chain write that did land.
        entitlement_tx_hash: String,
        /// The store failure.
        source: StoreError,
    },

    /// A store read failed before any write happened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PurchaseError {
    /// Stable reason code for this failure.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Proof(_) => ReasonCode::InvalidProof,
            Self::Pricing(e) => match e {
                PricingError::Unsupported(_) => ReasonCode::PricingUnsupported,
                PricingError::FeeBpsConfigInvalid(_) => ReasonCode::FeeBpsConfigInvalid,
                PricingError::FeeBpsMismatch { .. } => ReasonCode::FeeBpsMismatch,
                PricingError::AmountMismatch { .. }
                | PricingError::QuoteMismatch(_)
                | PricingError::Amount(_) => ReasonCode::FeeMismatch,
                PricingError::Chain(_) => ReasonCode::ChainWriteFailed,
            },
            Self::PayeeMismatch { .. } => ReasonCode::PayeeMismatch,
            Self::RefundEligibleDuplicate { .. } => ReasonCode::RefundEligibleDuplicatePurchase,
            Self::ChainRead(_) | Self::ChainWrite(_) => ReasonCode::ChainWriteFailed,
            Self::CommitPersistence { .. } => ReasonCode::CommitPersistenceFailed,
            Self::Store(_) => ReasonCode::StoreUnavailable,
        }
    }
}

/// Outcome of a restore lookup.
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    /// The buyer holds the entitlement mirror record.
    Owned(Entitlement),
    /// The buyer does not own the product.
    NotOwned,
}

/// Outcome of a refund-eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Entitlement is still active; refunds are not auto-approved.
    EntitlementActive,
    /// No active entitlement; eligible for manual review.
    EligibleReview,
}

/// Coordinates the purchase-commit sequence against a ledger store and an
/// entitlement chain.
pub struct PurchaseCoordinator<S, C> {
    store: S,
    chain: C,
    quoter: Option<Arc<dyn CheckoutQuoter>>,
    config: CommerceConfig,
}

impl<S, C> std::fmt::Debug for PurchaseCoordinator<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseCoordinator")
            .field("config", &self.config)
            .field("quoted_pricing", &self.quoter.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, C> PurchaseCoordinator<S, C>
where
    S: LedgerStore,
    C: EntitlementChain,
{
    /// Creates a coordinator with the fixed-bps fee policy.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::FeeBpsConfigInvalid`] for an out-of-range fee
    /// configuration.
    pub fn new(store: S, chain: C, config: CommerceConfig) -> Result<Self, PricingError> {
        config.validate()?;
        Ok(Self {
            store,
            chain,
            quoter: None,
            config,
        })
    }

    /// Switches pricing to the on-chain checkout-quoted policy.
    #[must_use]
    pub fn with_quoter(mut self, quoter: Arc<dyn CheckoutQuoter>) -> Self {
        self.quoter = Some(quoter);
        self
    }

    /// Runs the full purchase-commit sequence for one request.
    ///
    /// Safe to call any number of times with a logically-identical request:
    /// at most one entitlement, one purchase record, and one accrual update
    /// ever result.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError`]; see its variants for the failure taxonomy.
    pub async fn purchase(
        &self,
        request: &PurchaseRequest,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        // Steps 1-3: proof, pricing, payee.
        let (proof, split) = self.verify(request).await?;
        tracing::debug!(
            intent = %request.intent_id,
            kind = %proof.kind,
            fee_bps = split.fee_bps,
            "request validated"
        );

        // Step 4: duplicate detection, cheapest check first.
        if let Some(outcome) = self.check_duplicates(request, &proof).await? {
            return Ok(outcome);
        }
        tracing::debug!(intent = %request.intent_id, "duplicate checks passed");

        // Step 5: on-chain entitlement write. Any failure aborts with no
        // off-chain side effects; nothing has been written yet.
        let entitlement_tx_hash = self
            .chain
            .record_entitlement(&request.buyer, &request.product_id)
            .await
            .map_err(PurchaseError::ChainWrite)?;
        tracing::info!(
            intent = %request.intent_id,
            tx = %entitlement_tx_hash,
            "entitlement recorded on-chain"
        );

        // Step 6: the five-collection off-chain commit, replay record first.
        let settlement_mode = SettlementMode::for_proof(proof.kind);
        let commit = PurchaseCommit {
            intent_id: request.intent_id.clone(),
            buyer: request.buyer.clone(),
            merchant: request.merchant.clone(),
            product_id: request.product_id.clone(),
            fingerprint: proof.fingerprint.clone(),
            proof_kind: proof.kind,
            payment_tx_hash: proof.tx_hash.clone(),
            entitlement_tx_hash: entitlement_tx_hash.clone(),
            agent_wallet: self.config.settlement_wallet.clone(),
            gross_amount: split.gross,
            fee_amount: split.fee,
            merchant_net_amount: split.merchant_net,
            fee_bps: split.fee_bps,
            settlement_mode,
            now_iso: now_iso(),
        };
        self.store.purchase_commit(&commit).await.map_err(|source| {
            tracing::error!(
                intent = %request.intent_id,
                tx = %entitlement_tx_hash,
                error = %source,
                "off-chain commit failed after on-chain write; reconciliation required"
            );
            PurchaseError::CommitPersistence {
                entitlement_tx_hash: entitlement_tx_hash.clone(),
                source,
            }
        })?;
        tracing::info!(intent = %request.intent_id, "purchase committed");

        Ok(PurchaseOutcome::Committed(PurchaseReceipt {
            fingerprint: proof.fingerprint,
            entitlement_tx_hash,
            split,
            settlement_mode,
        }))
    }

    async fn validate_pricing(
        &self,
        request: &PurchaseRequest,
        proof: &NormalizedProof,
    ) -> Result<PriceSplit, PurchaseError> {
        let supported = self.config.supported_pair();
        let split = match &self.quoter {
            Some(quoter) => {
                pricing::validate_quoted(
                    &request.pricing,
                    request.fee_bps,
                    proof.amount.as_deref(),
                    quoter.as_ref(),
                    &supported,
                    self.config.token_decimals,
                )
                .await?
            }
            None => pricing::validate_fixed(
                &request.pricing,
                request.fee_bps,
                proof.amount.as_deref(),
                self.config.fee_bps,
                &supported,
            )?,
        };
        Ok(split)
    }

    /// Steps 4a-4d. Returns `Some` when the request is an idempotent replay.
    async fn check_duplicates(
        &self,
        request: &PurchaseRequest,
        proof: &NormalizedProof,
    ) -> Result<Option<PurchaseOutcome>, PurchaseError> {
        // 4a: identical proof already accepted.
        if self.store.has_fingerprint(&proof.fingerprint).await? {
            tracing::info!(intent = %request.intent_id, "replayed proof; already recorded");
            return Ok(Some(PurchaseOutcome::AlreadyRecorded {
                fingerprint: proof.fingerprint.clone(),
            }));
        }

        // 4b/4c: prior purchase records for this buyer and product.
        let prior = self
            .store
            .find_purchases(&request.buyer, &request.product_id)
            .await?;
        if let Some(other) = prior
            .iter()
            .find(|p| !p.payment_tx_hash.eq_ignore_ascii_case(&proof.tx_hash))
        {
            let attempts = self
                .store
                .record_duplicate_attempt(&DuplicateAttempt {
                    buyer: request.buyer.clone(),
                    product_id: request.product_id.clone(),
                    merchant: request.merchant.clone(),
                    intent_id: request.intent_id.clone(),
                    fingerprint: proof.fingerprint.clone(),
                })
                .await?;
            tracing::warn!(
                intent = %request.intent_id,
                buyer = %request.buyer,
                product = %request.product_id,
                attempts,
                "duplicate purchase with a different payment transaction"
            );
            return Err(PurchaseError::RefundEligibleDuplicate {
                buyer: request.buyer.clone(),
                product_id: request.product_id.clone(),
                prior_tx_hash: other.payment_tx_hash.clone(),
                attempts,
            });
        }
        if !prior.is_empty() {
            // Same transaction hash: an earlier attempt committed this exact
            // payment but the client retried with a fresh proof encoding.
            return Ok(Some(PurchaseOutcome::AlreadyRecorded {
                fingerprint: proof.fingerprint.clone(),
            }));
        }

        // 4d: the chain is authoritative. An on-chain grant with no local
        // record means a previous attempt died between step 5 and step 6;
        // do not re-issue.
        if self
            .chain
            .has_entitlement(&request.buyer, &request.product_id)
            .await
            .map_err(PurchaseError::ChainRead)?
        {
            tracing::warn!(
                intent = %request.intent_id,
                buyer = %request.buyer,
                product = %request.product_id,
                "entitlement exists on-chain with no local record"
            );
            return Ok(Some(PurchaseOutcome::AlreadyRecorded {
                fingerprint: proof.fingerprint.clone(),
            }));
        }

        Ok(None)
    }

    /// Validates a request without committing anything: proof normalization,
    /// pricing, and the payee check. No reads or writes beyond the optional
    /// on-chain quote.
    ///
    /// # Errors
    ///
    /// Returns the same validation errors as [`Self::purchase`].
    pub async fn verify(
        &self,
        request: &PurchaseRequest,
    ) -> Result<(NormalizedProof, PriceSplit), PurchaseError> {
        let proof = PaymentProof::from_value(request.proof.clone())?.normalize()?;
        let split = self.validate_pricing(request, &proof).await?;
        // An empty payTo means the protocol layer withheld it; the on-chain
        // proof itself was already verified there.
        if !proof.pay_to.is_empty()
            && !proof
                .pay_to
                .eq_ignore_ascii_case(&self.config.settlement_wallet)
        {
            return Err(PurchaseError::PayeeMismatch {
                expected: self.config.settlement_wallet.clone(),
                received: proof.pay_to.clone(),
            });
        }
        Ok((proof, split))
    }

    /// Restore lookup against the entitlement mirror.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unreachable.
    pub async fn restore(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<RestoreOutcome, StoreError> {
        Ok(self
            .store
            .find_entitlement(buyer, product_id)
            .await?
            .map_or(RestoreOutcome::NotOwned, RestoreOutcome::Owned))
    }

    /// Refund-eligibility check: refunds are never auto-approved while the
    /// entitlement is active.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unreachable.
    pub async fn refund_eligibility(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<RefundOutcome, StoreError> {
        Ok(
            if self
                .store
                .find_entitlement(buyer, product_id)
                .await?
                .is_some()
            {
                RefundOutcome::EntitlementActive
            } else {
                RefundOutcome::EligibleReview
            },
        )
    }
}
