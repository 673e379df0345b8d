//! On-chain collaborator abstractions.
//!
//! The coordinator talks to the chain through these traits: an entitlement
//! registry (authoritative for "owns product") and an optional checkout
//! contract that quotes fee splits. Implementations live in `entitle-evm`.
//!
//! Write calls are never retried here or by implementations. A retried write
//! could double-submit an irreversible state change; the coordinator instead
//! makes entitlement issuance idempotent by checking on-chain existence
//! before every write.

use async_trait::async_trait;

/// Which block the gateway ultimately read against.
///
/// Reads target the last finalized block; when finalized state is
/// unavailable the gateway falls back to the latest block once. The fallback
/// accepts a weaker consistency guarantee, so it is surfaced rather than
/// silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Read served from the last finalized block.
    Finalized,
    /// Degraded read served from the latest (non-finalized) block.
    Latest,
}

/// A fee split quoted by the checkout contract, in token base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitQuote {
    /// Gross amount the buyer pays.
    pub gross_units: u128,
    /// Fee portion.
    pub fee_units: u128,
    /// Merchant's net portion.
    pub merchant_net_units: u128,
}

/// Errors from chain reads and writes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// A read call failed on both the finalized and latest block.
    #[error("chain read failed: {0}")]
    Read(String),

    /// A write transaction did not succeed. Never auto-retried.
    #[error("chain write failed with status {status}: {message}")]
    WriteFailed {
        /// Transaction status reported by the chain.
        status: String,
        /// Underlying error message.
        message: String,
    },

    /// An address could not be parsed for the target chain.
    #[error("invalid on-chain address: {0}")]
    InvalidAddress(String),

    /// The configured chain is not available to this gateway.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),
}

/// The on-chain entitlement registry.
#[async_trait]
pub trait EntitlementChain: Send + Sync {
    /// Whether the buyer already holds the entitlement on-chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Read`] when both read attempts fail.
    async fn has_entitlement(&self, buyer: &str, product_id: &str) -> Result<bool, ChainError>;

    /// Records the entitlement on-chain and returns the transaction hash.
    ///
    /// Submitted exactly once; any non-success status is
    /// [`ChainError::WriteFailed`] and the caller must abort its commit.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] on submission or receipt failure.
    async fn record_entitlement(&self, buyer: &str, product_id: &str)
    -> Result<String, ChainError>;
}

/// The optional checkout contract that quotes gross/fee/net splits.
#[async_trait]
pub trait CheckoutQuoter: Send + Sync {
    /// Current fee rate in basis points.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Read`] when the contract read fails.
    async fn fee_bps(&self) -> Result<u32, ChainError>;

    /// Quotes the split for a candidate base amount.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Read`] when the contract read fails.
    async fn quote_split(&self, base_units: u128) -> Result<SplitQuote, ChainError>;
}
