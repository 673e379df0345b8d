//! Axum route handlers.
//!
//! Every operation answers with the [`ActionResponse`] envelope: `ok`, the
//! action name, a stable `reasonCode`, a human-readable message, and
//! optional structured data. Rejections are HTTP 200 with `ok: false`;
//! clients dispatch on `reasonCode`, not on HTTP status.

use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use entitle::chain::EntitlementChain;
use entitle::purchase::{
    PurchaseCoordinator, PurchaseError, PurchaseOutcome, PurchaseRequest, RefundOutcome,
    RestoreOutcome,
};
use entitle::reason::{ActionResponse, ReasonCode};
use entitle::settle::{SettleRequest, SettlementService};
use entitle::store::LedgerStore;

/// Shared application state.
pub struct AppState<S, C> {
    /// The purchase-commit coordinator.
    pub coordinator: PurchaseCoordinator<Arc<S>, C>,
    /// The settlement service, sharing the coordinator's store.
    pub settlement: SettlementService<Arc<S>>,
}

impl<S, C> std::fmt::Debug for AppState<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// Lookup body shared by restore and refund-eligibility.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipQuery {
    /// Buyer address.
    pub buyer: String,
    /// Product identifier.
    pub product_id: String,
}

fn purchase_rejection(err: &PurchaseError) -> ActionResponse {
    let response = ActionResponse::rejected("purchase", err.reason_code(), err.to_string());
    match err {
        PurchaseError::RefundEligibleDuplicate {
            prior_tx_hash,
            attempts,
            ..
        } => response.with_data(json!({
            "priorTxHash": prior_tx_hash,
            "duplicateAttempts": attempts,
        })),
        PurchaseError::CommitPersistence {
            entitlement_tx_hash,
            ..
        } => response.with_data(json!({ "entitlementTxHash": entitlement_tx_hash })),
        _ => response,
    }
}

/// `POST /purchase` — runs the idempotent purchase-commit sequence.
pub async fn post_purchase<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(request): Json<PurchaseRequest>,
) -> Json<ActionResponse>
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    let response = match state.coordinator.purchase(&request).await {
        Ok(PurchaseOutcome::Committed(receipt)) => ActionResponse::ok(
            "purchase",
            ReasonCode::PurchaseSuccess,
            "purchase committed",
        )
        .with_data(json!({
            "fingerprint": receipt.fingerprint,
            "entitlementTxHash": receipt.entitlement_tx_hash,
            "grossAmount": receipt.split.gross,
            "feeAmount": receipt.split.fee,
            "merchantNetAmount": receipt.split.merchant_net,
            "feeBps": receipt.split.fee_bps,
            "settlementMode": receipt.settlement_mode,
        })),
        Ok(PurchaseOutcome::AlreadyRecorded { fingerprint }) => ActionResponse::ok(
            "purchase",
            ReasonCode::PurchaseAlreadyRecorded,
            "purchase already recorded",
        )
        .with_data(json!({ "fingerprint": fingerprint })),
        Err(err) => purchase_rejection(&err),
    };
    Json(response)
}

/// `POST /verify` — validates a request without committing.
pub async fn post_verify<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(request): Json<PurchaseRequest>,
) -> Json<ActionResponse>
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    let response = match state.coordinator.verify(&request).await {
        Ok((proof, split)) => {
            ActionResponse::ok("verify", ReasonCode::VerifyOk, "payment proof is acceptable")
                .with_data(json!({
                    "fingerprint": proof.fingerprint,
                    "grossAmount": split.gross,
                    "feeAmount": split.fee,
                    "merchantNetAmount": split.merchant_net,
                    "feeBps": split.fee_bps,
                }))
        }
        Err(err) => ActionResponse::rejected("verify", err.reason_code(), err.to_string()),
    };
    Json(response)
}

/// `POST /settle` — records (or executes) one merchant payout.
pub async fn post_settle<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(request): Json<SettleRequest>,
) -> Json<ActionResponse>
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    let response = match state.settlement.settle(&request).await {
        Ok(receipt) => ActionResponse::ok(
            "settle",
            ReasonCode::SettlementRecorded,
            "settlement recorded",
        )
        .with_data(json!({
            "intentId": receipt.intent_id,
            "merchant": receipt.merchant,
            "merchantNetAmount": receipt.merchant_net_amount,
            "settlementTxHash": receipt.settlement_tx_hash,
        })),
        Err(err) => ActionResponse::rejected("settle", err.reason_code(), err.to_string()),
    };
    Json(response)
}

/// `POST /restore` — entitlement mirror lookup for re-downloads.
pub async fn post_restore<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(query): Json<OwnershipQuery>,
) -> Json<ActionResponse>
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    let response = match state
        .coordinator
        .restore(&query.buyer, &query.product_id)
        .await
    {
        Ok(RestoreOutcome::Owned(entitlement)) => {
            ActionResponse::ok("restore", ReasonCode::RestoreAllowed, "entitlement found")
                .with_data(json!({
                    "intentId": entitlement.intent_id,
                    "txHash": entitlement.tx_hash,
                    "grantedAt": entitlement.granted_at,
                }))
        }
        Ok(RestoreOutcome::NotOwned) => ActionResponse::rejected(
            "restore",
            ReasonCode::NotOwned,
            "buyer does not own this product",
        ),
        Err(err) => {
            ActionResponse::rejected("restore", ReasonCode::StoreUnavailable, err.to_string())
        }
    };
    Json(response)
}

/// `POST /refund` — refund-eligibility check.
pub async fn post_refund<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(query): Json<OwnershipQuery>,
) -> Json<ActionResponse>
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    let response = match state
        .coordinator
        .refund_eligibility(&query.buyer, &query.product_id)
        .await
    {
        Ok(RefundOutcome::EligibleReview) => ActionResponse::ok(
            "refund",
            ReasonCode::RefundEligibleReview,
            "no active entitlement; eligible for manual review",
        ),
        Ok(RefundOutcome::EntitlementActive) => ActionResponse::rejected(
            "refund",
            ReasonCode::RefundRejectedEntitlementActive,
            "entitlement is active; refund not auto-approved",
        ),
        Err(err) => {
            ActionResponse::rejected("refund", ReasonCode::StoreUnavailable, err.to_string())
        }
    };
    Json(response)
}

/// Health check endpoint.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates an Axum [`Router`] with all marketplace endpoints.
///
/// Endpoints:
/// - `POST /purchase` — idempotent purchase commit
/// - `POST /verify` — validate without committing
/// - `POST /settle` — record or execute a merchant payout
/// - `POST /restore` — entitlement mirror lookup
/// - `POST /refund` — refund-eligibility check
/// - `GET /health` — liveness
pub fn app_router<S, C>(state: Arc<AppState<S, C>>) -> Router
where
    S: LedgerStore + 'static,
    C: EntitlementChain + 'static,
{
    Router::new()
        .route("/purchase", axum::routing::post(post_purchase))
        .route("/verify", axum::routing::post(post_verify))
        .route("/settle", axum::routing::post(post_settle))
        .route("/restore", axum::routing::post(post_restore))
        .route("/refund", axum::routing::post(post_refund))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}
