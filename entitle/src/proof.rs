//! Payment proof normalization and fingerprinting.
//!
//! Callers submit payment evidence in one of two shapes: a payment-protocol
//! envelope (an opaque requirement/signature pair plus a settlement
//! transaction descriptor) or a direct transaction proof. Both shapes, with
//! or without their `{ "x402": … }` / `{ "tx": … }` wrappers, normalize into
//! a single [`NormalizedProof`].
//!
//! The fingerprint is the deduplication key for the whole purchase-commit
//! protocol. Its field order and case folding are load-bearing: every replay
//! check downstream compares fingerprints byte-for-byte, so two semantically
//! identical proofs must always produce the identical string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::parse_amount;

/// Which proof shape a normalized proof came from.
///
/// The wire names double as fingerprint components and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofKind {
    /// Payment-protocol envelope carrying a settlement transaction.
    #[serde(rename = "x402")]
    Protocol,
    /// Direct transaction proof submitted by the buyer.
    #[serde(rename = "tx")]
    DirectTx,
}

impl ProofKind {
    /// Stable wire name, used in records and in the fingerprint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "x402",
            Self::DirectTx => "tx",
        }
    }
}

impl std::fmt::Display for ProofKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chain id or amount that arrives as either a JSON string or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// String form.
    Text(String),
    /// Numeric form; rendered with JSON number formatting.
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Settlement transaction descriptor inside a protocol envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTx {
    /// Transaction hash of the settled payment.
    pub tx_hash: String,
    /// Chain identifier (string or positive integer).
    pub chain_id: Scalar,
    /// Paying address, when the settlement layer reports it.
    #[serde(default)]
    pub from: Option<String>,
    /// Receiving address, when the settlement layer reports it.
    #[serde(default)]
    pub to: Option<String>,
    /// Paid amount in decimal token units.
    #[serde(default)]
    pub amount: Option<Scalar>,
    /// Token symbol or contract address.
    #[serde(default)]
    pub token: Option<String>,
}

/// Payment-protocol proof envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolProof {
    /// Opaque payment requirement the payer accepted.
    pub payment_required: Value,
    /// Opaque payment signature produced by the payer.
    pub payment_signature: Value,
    /// The settled transaction this envelope attests to.
    pub settlement_tx: SettlementTx,
    /// Optional network label from the protocol layer.
    #[serde(default)]
    pub network: Option<String>,
    /// Optional asset label from the protocol layer.
    #[serde(default)]
    pub asset: Option<String>,
}

/// Direct transaction proof.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxProof {
    /// Chain identifier (string or positive integer).
    pub chain_id: Scalar,
    /// Transaction hash of the payment.
    pub tx_hash: String,
    /// Paying address.
    pub payer: String,
    /// Receiving address.
    pub pay_to: String,
    /// Paid amount in decimal token units.
    pub amount: Scalar,
    /// Token symbol or contract address.
    pub token: String,
}

/// Raw caller-supplied payment proof, in any of the accepted shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PaymentProof {
    /// `{ "x402": { … } }`
    WrappedProtocol {
        /// The wrapped protocol envelope.
        x402: ProtocolProof,
    },
    /// `{ "tx": { … } }`
    WrappedTx {
        /// The wrapped direct transaction proof.
        tx: TxProof,
    },
    /// Bare protocol envelope.
    Protocol(ProtocolProof),
    /// Bare direct transaction proof.
    Tx(TxProof),
}

/// Errors from proof normalization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProofError {
    /// The proof matched neither accepted schema.
    #[error("payment proof matches no accepted schema")]
    UnrecognizedShape,

    /// A required field was missing or empty.
    #[error("payment proof is missing {0}")]
    MissingField(&'static str),

    /// The paid amount was not parseable as a non-negative decimal.
    #[error("payment proof carries an invalid amount: {0}")]
    InvalidAmount(String),
}

/// Canonical form of a payment proof.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProof {
    /// Proof shape discriminator.
    pub kind: ProofKind,
    /// Chain identifier, as a string.
    pub chain_id: String,
    /// Payment transaction hash.
    pub tx_hash: String,
    /// Paying address; empty when the protocol layer omitted it.
    pub payer: String,
    /// Receiving address; empty when the protocol layer omitted it.
    pub pay_to: String,
    /// Paid amount in its original string rendering, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Token symbol or contract address, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Deterministic deduplication digest.
    pub fingerprint: String,
}

/// Joins the identifying fields into the deduplication fingerprint.
///
/// Order and case folding must not change: all stored fingerprints depend on
/// this exact rendering.
fn fingerprint(
    kind: ProofKind,
    chain_id: &str,
    tx_hash: &str,
    payer: &str,
    pay_to: &str,
    amount: Option<&str>,
    token: Option<&str>,
) -> String {
    [
        "proof",
        kind.as_str(),
        &chain_id.to_lowercase(),
        &tx_hash.to_lowercase(),
        &payer.to_lowercase(),
        &pay_to.to_lowercase(),
        &amount.unwrap_or_default().to_lowercase(),
        &token.unwrap_or_default().to_lowercase(),
    ]
    .join(":")
}

fn require(value: &str, name: &'static str) -> Result<(), ProofError> {
    if value.trim().is_empty() {
        return Err(ProofError::MissingField(name));
    }
    Ok(())
}

impl PaymentProof {
    /// Parses a raw JSON value into one of the accepted proof shapes.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::UnrecognizedShape`] when the value matches
    /// neither schema.
    pub fn from_value(value: Value) -> Result<Self, ProofError> {
        serde_json::from_value(value).map_err(|_| ProofError::UnrecognizedShape)
    }

    /// Normalizes a raw proof into its canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError`] when required fields are missing or the amount
    /// is malformed. Pure; no side effects.
    pub fn normalize(&self) -> Result<NormalizedProof, ProofError> {
        match self {
            Self::WrappedProtocol { x402 } | Self::Protocol(x402) => normalize_protocol(x402),
            Self::WrappedTx { tx } | Self::Tx(tx) => normalize_tx(tx),
        }
    }
}

fn checked_amount(raw: Option<&Scalar>) -> Result<Option<String>, ProofError> {
    let Some(scalar) = raw else {
        return Ok(None);
    };
    let rendered = scalar.clone().into_string();
    parse_amount(&rendered).map_err(|_| ProofError::InvalidAmount(rendered.clone()))?;
    Ok(Some(rendered))
}

fn normalize_protocol(proof: &ProtocolProof) -> Result<NormalizedProof, ProofError> {
    let tx = &proof.settlement_tx;
    require(&tx.tx_hash, "settlementTx.txHash")?;
    let chain_id = tx.chain_id.clone().into_string();
    require(&chain_id, "settlementTx.chainId")?;

    let payer = tx.from.clone().unwrap_or_default();
    let pay_to = tx.to.clone().unwrap_or_default();
    let amount = checked_amount(tx.amount.as_ref())?;
    let token = tx.token.clone();

    Ok(NormalizedProof {
        fingerprint: fingerprint(
            ProofKind::Protocol,
            &chain_id,
            &tx.tx_hash,
            &payer,
            &pay_to,
            amount.as_deref(),
            token.as_deref(),
        ),
        kind: ProofKind::Protocol,
        chain_id,
        tx_hash: tx.tx_hash.clone(),
        payer,
        pay_to,
        amount,
        token,
    })
}

fn normalize_tx(proof: &TxProof) -> Result<NormalizedProof, ProofError> {
    require(&proof.tx_hash, "txHash")?;
    let chain_id = proof.chain_id.clone().into_string();
    require(&chain_id, "chainId")?;
    require(&proof.payer, "payer")?;
    require(&proof.pay_to, "payTo")?;
    require(&proof.token, "token")?;
    let amount = checked_amount(Some(&proof.amount))?.ok_or(ProofError::MissingField("amount"))?;

    Ok(NormalizedProof {
        fingerprint: fingerprint(
            ProofKind::DirectTx,
            &chain_id,
            &proof.tx_hash,
            &proof.payer,
            &proof.pay_to,
            Some(&amount),
            Some(&proof.token),
        ),
        kind: ProofKind::DirectTx,
        chain_id,
        tx_hash: proof.tx_hash.clone(),
        payer: proof.payer.clone(),
        pay_to: proof.pay_to.clone(),
        amount: Some(amount),
        token: Some(proof.token.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> PaymentProof {
        serde_json::from_value(value).unwrap()
    }

    fn tx_proof(payer: &str, tx_hash: &str) -> serde_json::Value {
        json!({
            "chainId": "84532",
            "txHash": tx_hash,
            "payer": payer,
            "payTo": "0xFEED",
            "amount": "1.50",
            "token": "USDC",
        })
    }

    #[test]
    fn test_direct_tx_normalizes() {
        let proof = parse(tx_proof("0xABC", "0xHASH")).normalize().unwrap();
        assert_eq!(proof.kind, ProofKind::DirectTx);
        assert_eq!(proof.chain_id, "84532");
        assert_eq!(proof.amount.as_deref(), Some("1.50"));
        assert_eq!(
            proof.fingerprint,
            "proof:tx:84532:0xhash:0xabc:0xfeed:1.50:usdc"
        );
    }

    #[test]
    fn test_fingerprint_stable_under_casing() {
        let a = parse(tx_proof("0xAbCd", "0xBEEF")).normalize().unwrap();
        let b = parse(tx_proof("0xABCD", "0xbeef")).normalize().unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_stable_under_wrapper() {
        let bare = parse(tx_proof("0xABC", "0xHASH")).normalize().unwrap();
        let wrapped = parse(json!({ "tx": tx_proof("0xABC", "0xHASH") }))
            .normalize()
            .unwrap();
        assert_eq!(bare.fingerprint, wrapped.fingerprint);
    }

    #[test]
    fn test_protocol_envelope_normalizes() {
        let proof = parse(json!({
            "paymentRequired": {},
            "paymentSignature": {},
            "settlementTx": {
                "txHash": "0xSETTLED",
                "chainId": 84532,
                "from": "0xPAYER",
                "to": "0xWALLET",
                "amount": 2.5,
                "token": "USDC",
            },
            "network": "base-sepolia",
        }))
        .normalize()
        .unwrap();
        assert_eq!(proof.kind, ProofKind::Protocol);
        assert_eq!(proof.chain_id, "84532");
        assert_eq!(proof.amount.as_deref(), Some("2.5"));
        assert_eq!(
            proof.fingerprint,
            "proof:x402:84532:0xsettled:0xpayer:0xwallet:2.5:usdc"
        );
    }

    #[test]
    fn test_protocol_envelope_optional_fields_default_empty() {
        let proof = parse(json!({
            "paymentRequired": {},
            "paymentSignature": {},
            "settlementTx": { "txHash": "0xS", "chainId": "1" },
        }))
        .normalize()
        .unwrap();
        assert_eq!(proof.payer, "");
        assert_eq!(proof.pay_to, "");
        assert_eq!(proof.fingerprint, "proof:x402:1:0xs::::");
    }

    #[test]
    fn test_rejects_malformed_amount() {
        let result = parse(json!({
            "chainId": "1",
            "txHash": "0xH",
            "payer": "0xA",
            "payTo": "0xB",
            "amount": "one-and-a-half",
            "token": "USDC",
        }))
        .normalize();
        assert!(matches!(result, Err(ProofError::InvalidAmount(_))));
    }

    #[test]
    fn test_rejects_missing_tx_hash() {
        let result: Result<PaymentProof, _> = serde_json::from_value(json!({
            "chainId": "1",
            "payer": "0xA",
            "payTo": "0xB",
            "amount": "1",
            "token": "USDC",
        }));
        assert!(result.is_err());
    }
}
