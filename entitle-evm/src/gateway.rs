//! Entitlement registry gateway.

use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_rpc_types_eth::BlockId;
use async_trait::async_trait;

use entitle::chain::{ChainError, EntitlementChain, ReadConsistency};

use crate::contract::IEntitlementRegistry;

/// Whether an RPC error means the node has pruned the queried historical
/// state, as opposed to the call itself failing.
pub(crate) fn is_historical_state_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("historical state") || lower.contains("missing trie node")
}

pub(crate) fn parse_address(value: &str) -> Result<Address, ChainError> {
    value
        .parse()
        .map_err(|_| ChainError::InvalidAddress(value.to_string()))
}

/// Gateway to the on-chain entitlement registry.
///
/// Reads target the last finalized block so a reorg can never un-grant an
/// entitlement the coordinator already acted on. Nodes that prune finalized
/// state get one degraded retry against the latest block, surfaced as
/// [`ReadConsistency::Latest`].
pub struct EvmGateway<P: Provider> {
    registry: IEntitlementRegistry::IEntitlementRegistryInstance<P>,
}

impl<P: Provider> std::fmt::Debug for EvmGateway<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmGateway")
            .field("registry", self.registry.address())
            .finish_non_exhaustive()
    }
}

impl<P: Provider> EvmGateway<P> {
    /// Creates a gateway for the registry deployed at `registry`.
    pub fn new(provider: P, registry: Address) -> Self {
        Self {
            registry: IEntitlementRegistry::new(registry, provider),
        }
    }

    async fn read_has_entitlement(
        &self,
        buyer: Address,
        product_id: &str,
    ) -> Result<(bool, ReadConsistency), ChainError> {
        let finalized = self
            .registry
            .hasEntitlement(buyer, product_id.to_string())
            .block(BlockId::finalized())
            .call()
            .await;
        match finalized {
            Ok(owned) => Ok((owned, ReadConsistency::Finalized)),
            Err(err) if is_historical_state_error(&err.to_string()) => {
                tracing::warn!(
                    %buyer,
                    product_id,
                    error = %err,
                    "finalized-state read unavailable; retrying against latest block"
                );
                let owned = self
                    .registry
                    .hasEntitlement(buyer, product_id.to_string())
                    .block(BlockId::latest())
                    .call()
                    .await
                    .map_err(|e| ChainError::Read(e.to_string()))?;
                Ok((owned, ReadConsistency::Latest))
            }
            Err(err) => Err(ChainError::Read(err.to_string())),
        }
    }
}

#[async_trait]
impl<P: Provider> EntitlementChain for EvmGateway<P> {
    async fn has_entitlement(&self, buyer: &str, product_id: &str) -> Result<bool, ChainError> {
        let buyer = parse_address(buyer)?;
        let (owned, consistency) = self.read_has_entitlement(buyer, product_id).await?;
        if consistency == ReadConsistency::Latest {
            tracing::warn!(%buyer, product_id, "entitlement read served from non-finalized state");
        }
        Ok(owned)
    }

    async fn record_entitlement(
        &self,
        buyer: &str,
        product_id: &str,
    ) -> Result<String, ChainError> {
        let buyer = parse_address(buyer)?;

        // Submit exactly once. The caller has already ruled out an existing
        // grant; a failure here must bubble up, never re-send.
        let pending = self
            .registry
            .recordEntitlement(buyer, product_id.to_string())
            .send()
            .await
            .map_err(|e| ChainError::WriteFailed {
                status: "not-submitted".to_string(),
                message: e.to_string(),
            })?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::WriteFailed {
                status: "unconfirmed".to_string(),
                message: e.to_string(),
            })?;

        if receipt.status() {
            Ok(receipt.transaction_hash.to_string())
        } else {
            Err(ChainError::WriteFailed {
                status: "0x0".to_string(),
                message: format!(
                    "entitlement write reverted in tx {}",
                    receipt.transaction_hash
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_state_error_classification() {
        assert!(is_historical_state_error(
            "server returned an error response: missing trie node 0xabc"
        ));
        assert!(is_historical_state_error(
            "no Historical State available for block 123"
        ));
        assert!(!is_historical_state_error("execution reverted"));
        assert!(!is_historical_state_error("connection refused"));
    }

    #[test]
    fn test_address_parsing() {
        assert!(parse_address("0x0000000000000000000000000000000000000001").is_ok());
        assert!(matches!(
            parse_address("not-an-address"),
            Err(ChainError::InvalidAddress(_))
        ));
    }
}
