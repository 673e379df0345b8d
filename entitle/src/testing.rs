//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::chain::{ChainError, EntitlementChain};
use crate::ledger::{
    Entitlement, MerchantLedger, PurchaseRecord, RefundEligibilityRecord, ReplayRecord,
    SettlementMode, SettlementQueueItem, SettlementStatus, now_iso,
};
use crate::proof::ProofKind;
use crate::store::{
    DuplicateAttempt, LedgerStore, PurchaseCommit, SettlementOutcome, StoreError,
};

fn key(buyer: &str, product_id: &str) -> String {
    format!("{buyer}:{product_id}")
}

/// Plain-struct view of everything a [`MemoryStore`] holds.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub replays: HashMap<String, ReplayRecord>,
    pub entitlements: HashMap<String, Entitlement>,
    pub purchases: Vec<PurchaseRecord>,
    pub merchants: HashMap<String, MerchantLedger>,
    pub queue: HashMap<String, SettlementQueueItem>,
    pub refunds: HashMap<String, RefundEligibilityRecord>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    data: Snapshot,
    fail_commits: bool,
}

/// HashMap-backed [`LedgerStore`] mirroring the bridge collections.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().unwrap().data.clone()
    }

    /// Makes every subsequent `purchase_commit` fail.
    pub fn fail_commits(&self) {
        self.inner.lock().unwrap().fail_commits = true;
    }

    /// Seeds a PENDING settlement queue item.
    pub fn seed_settlement(
        &self,
        intent_id: &str,
        merchant: &str,
        buyer: &str,
        merchant_net_amount: Decimal,
        settlement_mode: SettlementMode,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.data.queue.insert(
            intent_id.to_string(),
            SettlementQueueItem {
                intent_id: intent_id.to_string(),
                buyer: buyer.to_string(),
                merchant: merchant.to_string(),
                product_id: "prod-guide".to_string(),
                gross_amount: merchant_net_amount + Decimal::ONE,
                fee_amount: Decimal::ONE,
                merchant_net_amount,
                fee_bps: 100,
                status: SettlementStatus::Pending,
                settlement_mode,
                settlement_tx_hash: None,
                settled_by: None,
                settled_at: None,
                created_at: now_iso(),
                updated_at: now_iso(),
            },
        );
    }

    /// Seeds a committed purchase record.
    pub fn seed_purchase(&self, intent_id: &str, buyer: &str, product_id: &str, tx_hash: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.data.purchases.push(PurchaseRecord {
            intent_id: intent_id.to_string(),
            buyer: buyer.to_string(),
            merchant: "0xMERCHANT".to_string(),
            product_id: product_id.to_string(),
            fingerprint: format!("proof:tx:84532:{}::::", tx_hash.to_lowercase()),
            proof_kind: ProofKind::DirectTx,
            gross_amount: Decimal::new(100, 0),
            fee_amount: Decimal::ONE,
            merchant_net_amount: Decimal::new(99, 0),
            fee_bps: 100,
            payment_tx_hash: tx_hash.to_string(),
            entitlement_tx_hash: "0xENT".to_string(),
            created_at: now_iso(),
        });
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .data
            .replays
            .contains_key(fingerprint))
    }

    async fn store_fingerprint(&self, record: &ReplayRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .data
            .replays
            .entry(record.fingerprint.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find_entitlement(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Option<Entitlement>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .data
            .entitlements
            .get(&key(buyer, product_id))
            .cloned())
    }

    async fn find_purchases(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .data
            .purchases
            .iter()
            .filter(|p| p.buyer == buyer && p.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn find_purchase_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PurchaseRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .data
            .purchases
            .iter()
            .find(|p| p.intent_id == intent_id)
            .cloned())
    }

    async fn record_duplicate_attempt(
        &self,
        attempt: &DuplicateAttempt,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .data
            .refunds
            .entry(key(&attempt.buyer, &attempt.product_id))
            .or_insert_with(|| RefundEligibilityRecord {
                buyer: attempt.buyer.clone(),
                product_id: attempt.product_id.clone(),
                merchant: attempt.merchant.clone(),
                duplicate_attempts: 0,
                latest_intent_id: String::new(),
                latest_fingerprint: String::new(),
            });
        record.duplicate_attempts += 1;
        record.latest_intent_id = attempt.intent_id.clone();
        record.latest_fingerprint = attempt.fingerprint.clone();
        Ok(record.duplicate_attempts)
    }

    async fn purchase_commit(&self, commit: &PurchaseCommit) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_commits {
            return Err(StoreError::Status {
                status: 500,
                body: "bridge write failed".to_string(),
            });
        }
        let data = &mut inner.data;

        data.replays
            .entry(commit.fingerprint.clone())
            .or_insert_with(|| ReplayRecord {
                fingerprint: commit.fingerprint.clone(),
                intent_id: commit.intent_id.clone(),
                buyer: commit.buyer.clone(),
                merchant: commit.merchant.clone(),
                product_id: commit.product_id.clone(),
                proof_kind: commit.proof_kind,
                created_at: commit.now_iso.clone(),
            });

        data.entitlements
            .entry(key(&commit.buyer, &commit.product_id))
            .or_insert_with(|| Entitlement {
                buyer: commit.buyer.clone(),
                merchant: commit.merchant.clone(),
                product_id: commit.product_id.clone(),
                intent_id: commit.intent_id.clone(),
                tx_hash: commit.entitlement_tx_hash.clone(),
                granted_at: commit.now_iso.clone(),
            });

        data.purchases.push(PurchaseRecord {
            intent_id: commit.intent_id.clone(),
            buyer: commit.buyer.clone(),
            merchant: commit.merchant.clone(),
            product_id: commit.product_id.clone(),
            fingerprint: commit.fingerprint.clone(),
            proof_kind: commit.proof_kind,
            gross_amount: commit.gross_amount,
            fee_amount: commit.fee_amount,
            merchant_net_amount: commit.merchant_net_amount,
            fee_bps: commit.fee_bps,
            payment_tx_hash: commit.payment_tx_hash.clone(),
            entitlement_tx_hash: commit.entitlement_tx_hash.clone(),
            created_at: commit.now_iso.clone(),
        });

        let ledger = data
            .merchants
            .entry(commit.merchant.clone())
            .or_insert_with(|| MerchantLedger {
                merchant: commit.merchant.clone(),
                purchase_count: 0,
                gross_collected: Decimal::ZERO,
                fee_collected: Decimal::ZERO,
                net_owed_to_merchant: Decimal::ZERO,
                net_settled_to_merchant: Decimal::ZERO,
                settlement_wallet: commit.agent_wallet.clone(),
                updated_at: commit.now_iso.clone(),
            });
        ledger.purchase_count += 1;
        ledger.gross_collected += commit.gross_amount;
        ledger.fee_collected += commit.fee_amount;
        ledger.net_owed_to_merchant += commit.merchant_net_amount;
        ledger.updated_at = commit.now_iso.clone();

        data.queue.insert(
            commit.intent_id.clone(),
            SettlementQueueItem {
                intent_id: commit.intent_id.clone(),
                buyer: commit.buyer.clone(),
                merchant: commit.merchant.clone(),
                product_id: commit.product_id.clone(),
                gross_amount: commit.gross_amount,
                fee_amount: commit.fee_amount,
                merchant_net_amount: commit.merchant_net_amount,
                fee_bps: commit.fee_bps,
                status: SettlementStatus::Pending,
                settlement_mode: commit.settlement_mode,
                settlement_tx_hash: None,
                settled_by: None,
                settled_at: None,
                created_at: commit.now_iso.clone(),
                updated_at: commit.now_iso.clone(),
            },
        );

        Ok(())
    }

    async fn find_pending_settlement(
        &self,
        intent_id: &str,
    ) -> Result<Option<SettlementQueueItem>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .data
            .queue
            .get(intent_id)
            .filter(|item| item.status == SettlementStatus::Pending)
            .cloned())
    }

    async fn mark_settled(
        &self,
        intent_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(item) = inner.data.queue.get_mut(intent_id) else {
            return Ok(false);
        };
        if item.status != SettlementStatus::Pending {
            return Ok(false);
        }
        item.status = SettlementStatus::Settled;
        item.settlement_tx_hash = Some(outcome.settlement_tx_hash.clone());
        item.settled_by = Some(outcome.settled_by.clone());
        item.settled_at = Some(outcome.settled_at.clone());
        item.updated_at = outcome.settled_at.clone();
        Ok(true)
    }

    async fn record_merchant_settlement(
        &self,
        merchant: &str,
        merchant_net_amount: Decimal,
        _intent_id: &str,
        _settlement_tx_hash: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let ledger = inner
            .data
            .merchants
            .entry(merchant.to_string())
            .or_insert_with(|| MerchantLedger {
                merchant: merchant.to_string(),
                purchase_count: 0,
                gross_collected: Decimal::ZERO,
                fee_collected: Decimal::ZERO,
                net_owed_to_merchant: Decimal::ZERO,
                net_settled_to_merchant: Decimal::ZERO,
                settlement_wallet: String::new(),
                updated_at: now_iso(),
            });
        ledger.net_settled_to_merchant += merchant_net_amount;
        ledger.updated_at = now_iso();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryChainInner {
    grants: HashMap<String, u64>,
    writes: u64,
}

/// In-memory entitlement registry with a write counter.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryChain {
    inner: Arc<Mutex<MemoryChainInner>>,
}

impl MemoryChain {
    pub fn write_count(&self) -> u64 {
        self.inner.lock().unwrap().writes
    }

    pub fn has(&self, buyer: &str, product_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .grants
            .contains_key(&key(buyer, product_id))
    }

    /// Grants an entitlement directly, bypassing the write counter.
    pub fn grant(&self, buyer: &str, product_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .grants
            .insert(key(buyer, product_id), 0);
    }
}

#[async_trait]
impl EntitlementChain for MemoryChain {
    async fn has_entitlement(&self, buyer: &str, product_id: &str) -> Result<bool, ChainError> {
        Ok(self.has(buyer, product_id))
    }

    async fn record_entitlement(&self, buyer: &str, product_id: &str) -> Result<String, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        inner.writes += 1;
        let nonce = inner.writes;
        inner.grants.insert(key(buyer, product_id), nonce);
        Ok(format!("0xENT{nonce}"))
    }
}

/// Chain whose entitlement write always reverts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingChain;

impl FailingChain {
    pub const fn on_write() -> Self {
        Self
    }
}

#[async_trait]
impl EntitlementChain for FailingChain {
    async fn has_entitlement(&self, _buyer: &str, _product_id: &str) -> Result<bool, ChainError> {
        Ok(false)
    }

    async fn record_entitlement(
        &self,
        _buyer: &str,
        _product_id: &str,
    ) -> Result<String, ChainError> {
        Err(ChainError::WriteFailed {
            status: "0x0".to_string(),
            message: "execution reverted".to_string(),
        })
    }
}
