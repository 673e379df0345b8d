//! [`LedgerStore`] implementation over the database bridge.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};

use entitle::ledger::{Entitlement, PurchaseRecord, SettlementQueueItem};
use entitle::store::{
    DuplicateAttempt, LedgerStore, PurchaseCommit, SettlementOutcome, StoreError,
};

use crate::bridge::BridgeClient;

const REPLAY_STORE: &str = "replay_store";
const ENTITLEMENTS: &str = "entitlements";
const PURCHASES: &str = "purchases";
const MERCHANT_SETTLEMENTS: &str = "merchant_settlements";
const SETTLEMENT_QUEUE: &str = "settlement_queue";
const REFUND_ELIGIBILITY: &str = "refund_eligibility";

/// Renders a money amount as a JSON number, the representation the bridge's
/// `$inc` arithmetic operates on. Amounts are capped at six decimal places,
/// well inside f64 precision for realistic order sizes.
fn money(amount: Decimal) -> Value {
    amount
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| json!(amount.to_string()), Value::Number)
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, StoreError> {
    serde_json::from_value(document).map_err(|e| StoreError::Decode(e.to_string()))
}

/// The production ledger store, mapping each [`LedgerStore`] operation onto
/// one or more bridge actions.
///
/// Every write is an insert-if-absent upsert or an atomic increment; nothing
/// here overwrites committed data, so replaying any operation is harmless.
#[derive(Debug)]
pub struct BridgeStore {
    client: BridgeClient,
}

impl BridgeStore {
    /// Creates a store over an already-configured bridge client.
    #[must_use]
    pub const fn new(client: BridgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LedgerStore for BridgeStore {
    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self
            .client
            .find_one(REPLAY_STORE, json!({ "fingerprint": fingerprint }))
            .await?
            .is_some())
    }

    async fn store_fingerprint(
        &self,
        record: &entitle::ledger::ReplayRecord,
    ) -> Result<(), StoreError> {
        self.client
            .update_one(
                REPLAY_STORE,
                json!({ "fingerprint": record.fingerprint }),
                json!({ "$setOnInsert": {
                    "fingerprint": record.fingerprint,
                    "intentId": record.intent_id,
                    "buyer": record.buyer,
                    "merchant": record.merchant,
                    "productId": record.product_id,
                    "proofKind": record.proof_kind,
                    "createdAt": record.created_at,
                }}),
                true,
            )
            .await?;
        Ok(())
    }

    async fn find_entitlement(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Option<Entitlement>, StoreError> {
        self.client
            .find_one(ENTITLEMENTS, json!({ "buyer": buyer, "productId": product_id }))
            .await?
            .map(decode)
            .transpose()
    }

    async fn find_purchases(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.client
            .find(PURCHASES, json!({ "buyer": buyer, "productId": product_id }))
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn find_purchase_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PurchaseRecord>, StoreError> {
        self.client
            .find_one(PURCHASES, json!({ "intentId": intent_id }))
            .await?
            .map(decode)
            .transpose()
    }

    async fn record_duplicate_attempt(
        &self,
        attempt: &DuplicateAttempt,
    ) -> Result<u64, StoreError> {
        let filter = json!({ "buyer": attempt.buyer, "productId": attempt.product_id });
        self.client
            .update_one(
                REFUND_ELIGIBILITY,
                filter.clone(),
                json!({
                    "$inc": { "duplicateAttempts": 1 },
                    "$set": {
                        "latestIntentId": attempt.intent_id,
                        "latestFingerprint": attempt.fingerprint,
                    },
                    "$setOnInsert": {
                        "buyer": attempt.buyer,
                        "productId": attempt.product_id,
                        "merchant": attempt.merchant,
                    },
                }),
                true,
            )
            .await?;

        // Read back the post-increment count; the bridge does not return
        // modified documents.
        let record = self
            .client
            .find_one(REFUND_ELIGIBILITY, filter)
            .await?
            .ok_or_else(|| {
                StoreError::Decode("refund-eligibility record vanished after upsert".to_string())
            })?;
        Ok(record
            .get("duplicateAttempts")
            .and_then(Value::as_u64)
            .unwrap_or(1))
    }

    async fn purchase_commit(&self, commit: &PurchaseCommit) -> Result<(), StoreError> {
        // 1. Replay record first: once this lands, any retry of the whole
        //    request short-circuits before a second on-chain write.
        self.client
            .update_one(
                REPLAY_STORE,
                json!({ "fingerprint": commit.fingerprint }),
                json!({ "$setOnInsert": {
                    "fingerprint": commit.fingerprint,
                    "intentId": commit.intent_id,
                    "buyer": commit.buyer,
                    "merchant": commit.merchant,
                    "productId": commit.product_id,
                    "proofKind": commit.proof_kind,
                    "createdAt": commit.now_iso,
                }}),
                true,
            )
            .await?;

        // 2. Entitlement mirror.
        self.client
            .update_one(
                ENTITLEMENTS,
                json!({ "buyer": commit.buyer, "productId": commit.product_id }),
                json!({ "$setOnInsert": {
                    "buyer": commit.buyer,
                    "merchant": commit.merchant,
                    "productId": commit.product_id,
                    "intentId": commit.intent_id,
                    "txHash": commit.entitlement_tx_hash,
                    "grantedAt": commit.now_iso,
                }}),
                true,
            )
            .await?;

        // 3. Purchase record (append-only).
        self.client
            .insert_one(
                PURCHASES,
                json!({
                    "intentId": commit.intent_id,
                    "buyer": commit.buyer,
                    "merchant": commit.merchant,
                    "productId": commit.product_id,
                    "fingerprint": commit.fingerprint,
                    "proofKind": commit.proof_kind,
                    "grossAmount": money(commit.gross_amount),
                    "feeAmount": money(commit.fee_amount),
                    "merchantNetAmount": money(commit.merchant_net_amount),
                    "feeBps": commit.fee_bps,
                    "paymentTxHash": commit.payment_tx_hash,
                    "entitlementTxHash": commit.entitlement_tx_hash,
                    "createdAt": commit.now_iso,
                }),
            )
            .await?;

        // 4. Merchant accrual.
        self.client
            .update_one(
                MERCHANT_SETTLEMENTS,
                json!({ "merchant": commit.merchant }),
                json!({
                    "$inc": {
                        "purchaseCount": 1,
                        "grossCollected": money(commit.gross_amount),
                        "feeCollected": money(commit.fee_amount),
                        "netOwedToMerchant": money(commit.merchant_net_amount),
                    },
                    "$set": { "updatedAt": commit.now_iso },
                    "$setOnInsert": {
                        "merchant": commit.merchant,
                        "netSettledToMerchant": 0,
                        "settlementWallet": commit.agent_wallet,
                    },
                }),
                true,
            )
            .await?;

        // 5. Settlement queue.
        self.client
            .update_one(
                SETTLEMENT_QUEUE,
                json!({ "intentId": commit.intent_id }),
                json!({ "$setOnInsert": {
                    "intentId": commit.intent_id,
                    "buyer": commit.buyer,
                    "merchant": commit.merchant,
                    "productId": commit.product_id,
                    "grossAmount": money(commit.gross_amount),
                    "feeAmount": money(commit.fee_amount),
                    "merchantNetAmount": money(commit.merchant_net_amount),
                    "feeBps": commit.fee_bps,
                    "status": "PENDING",
                    "settlementMode": commit.settlement_mode,
                    "createdAt": commit.now_iso,
                    "updatedAt": commit.now_iso,
                }}),
                true,
            )
            .await?;

        Ok(())
    }

    async fn find_pending_settlement(
        &self,
        intent_id: &str,
    ) -> Result<Option<SettlementQueueItem>, StoreError> {
        self.client
            .find_one(
                SETTLEMENT_QUEUE,
                json!({ "intentId": intent_id, "status": "PENDING" }),
            )
            .await?
            .map(decode)
            .transpose()
    }

    async fn mark_settled(
        &self,
        intent_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<bool, StoreError> {
        // The PENDING filter makes the transition conditional: a racing
        // settle matches zero documents and reports failure, never a second
        // payout.
        let result = self
            .client
            .update_one(
                SETTLEMENT_QUEUE,
                json!({ "intentId": intent_id, "status": "PENDING" }),
                json!({ "$set": {
                    "status": "SETTLED",
                    "settlementTxHash": outcome.settlement_tx_hash,
                    "settledBy": outcome.settled_by,
                    "settledAt": outcome.settled_at,
                    "updatedAt": outcome.settled_at,
                }}),
                false,
            )
            .await?;
        Ok(result.matched > 0)
    }

    async fn record_merchant_settlement(
        &self,
        merchant: &str,
        merchant_net_amount: Decimal,
        intent_id: &str,
        settlement_tx_hash: &str,
    ) -> Result<(), StoreError> {
        self.client
            .update_one(
                MERCHANT_SETTLEMENTS,
                json!({ "merchant": merchant }),
                json!({
                    "$inc": { "netSettledToMerchant": money(merchant_net_amount) },
                    "$set": {
                        "lastSettlementIntentId": intent_id,
                        "lastSettlementTxHash": settlement_tx_hash,
                        "updatedAt": entitle::ledger::now_iso(),
                    },
                }),
                true,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> BridgeStore {
        let url = server.uri().parse().unwrap();
        BridgeStore::new(BridgeClient::new(
            BridgeConfig::new(url, "test-key").with_max_attempts(1),
        ))
    }

    #[tokio::test]
    async fn test_has_fingerprint_reads_via_find() {
        let server = MockServer::start().await;
        // The bridge only answers insertOne / find / updateOne; mounting
        // nothing else means any other action fails the call.
        Mock::given(method("POST"))
            .and(path("/find"))
            .and(body_partial_json(json!({
                "collection": "replay_store",
                "filter": { "fingerprint": "proof:tx:1:0xh:0xb:0xw:1:usdc" },
                "limit": 1,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{ "fingerprint": "proof:tx:1:0xh:0xb:0xw:1:usdc" }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert!(
            store
                .has_fingerprint("proof:tx:1:0xh:0xb:0xw:1:usdc")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_merchant_settlement_field_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/updateOne"))
            .and(body_partial_json(json!({
                "collection": "merchant_settlements",
                "filter": { "merchant": "0xM" },
                "update": { "$set": {
                    "lastSettlementIntentId": "i-1",
                    "lastSettlementTxHash": "0xPAYOUT",
                }},
                "upsert": true,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "matchedCount": 1, "modifiedCount": 1 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        store
            .record_merchant_settlement("0xM", "0.99".parse().unwrap(), "i-1", "0xPAYOUT")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_settled_filters_on_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/updateOne"))
            .and(body_partial_json(json!({
                "collection": "settlement_queue",
                "filter": { "intentId": "i-1", "status": "PENDING" },
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "matchedCount": 0, "modifiedCount": 0 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let outcome = SettlementOutcome {
            settlement_tx_hash: "0xPAYOUT".into(),
            settled_by: "ops".into(),
            settled_at: entitle::ledger::now_iso(),
        };
        let matched = store.mark_settled("i-1", &outcome).await.unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn test_duplicate_attempt_reads_back_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/updateOne"))
            .and(body_partial_json(json!({
                "collection": "refund_eligibility",
                "update": { "$inc": { "duplicateAttempts": 1 } },
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "matchedCount": 1, "modifiedCount": 1 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/find"))
            .and(body_partial_json(json!({ "limit": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{ "buyer": "0xB", "productId": "p-1", "duplicateAttempts": 3 }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let attempts = store
            .record_duplicate_attempt(&DuplicateAttempt {
                buyer: "0xB".into(),
                product_id: "p-1".into(),
                merchant: "0xM".into(),
                intent_id: "i-2".into(),
                fingerprint: "proof:tx:1:0xh:0xb:0xw:1:usdc".into(),
            })
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_purchase_commit_writes_replay_record_first() {
        let server = MockServer::start().await;
        // First bridge call of the commit must target the replay store; fail
        // everything else so an out-of-order sequence breaks the test.
        Mock::given(method("POST"))
            .and(path("/updateOne"))
            .and(body_partial_json(json!({ "collection": "replay_store" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "matchedCount": 0, "upsertedId": "r1" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/updateOne"))
            .and(body_partial_json(json!({ "collection": "entitlements" })))
            .respond_with(ResponseTemplate::new(400).set_body_string("stop here"))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let commit = PurchaseCommit {
            intent_id: "i-1".into(),
            buyer: "0xB".into(),
            merchant: "0xM".into(),
            product_id: "p-1".into(),
            fingerprint: "proof:tx:1:0xh:0xb:0xw:1:usdc".into(),
            proof_kind: entitle::proof::ProofKind::DirectTx,
            payment_tx_hash: "0xh".into(),
            entitlement_tx_hash: "0xe".into(),
            agent_wallet: "0xW".into(),
            gross_amount: "1".parse().unwrap(),
            fee_amount: "0.01".parse().unwrap(),
            merchant_net_amount: "0.99".parse().unwrap(),
            fee_bps: 100,
            settlement_mode: entitle::ledger::SettlementMode::Standard,
            now_iso: entitle::ledger::now_iso(),
        };
        let err = store.purchase_commit(&commit).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 400, .. }));
    }
}
