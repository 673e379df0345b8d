//! Checkout-contract quoting and payout execution.

use alloy_primitives::{Address, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::BlockId;
use async_trait::async_trait;

use entitle::amount::to_base_units;
use entitle::chain::{ChainError, CheckoutQuoter, SplitQuote};
use entitle::settle::{ExecutorRequest, SettleError, SettlementExecutor};

use crate::contract::{ICommerceCheckout, IERC20};
use crate::gateway::{is_historical_state_error, parse_address};

fn to_u128(value: U256, what: &str) -> Result<u128, ChainError> {
    u128::try_from(value).map_err(|_| ChainError::Read(format!("{what} exceeds u128 range")))
}

/// Read-only view of the checkout contract's fee schedule.
pub struct EvmQuoter<P: Provider> {
    checkout: ICommerceCheckout::ICommerceCheckoutInstance<P>,
}

impl<P: Provider> std::fmt::Debug for EvmQuoter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmQuoter")
            .field("checkout", self.checkout.address())
            .finish_non_exhaustive()
    }
}

impl<P: Provider> EvmQuoter<P> {
    /// Creates a quoter for the checkout contract deployed at `checkout`.
    pub fn new(provider: P, checkout: Address) -> Self {
        Self {
            checkout: ICommerceCheckout::new(checkout, provider),
        }
    }
}

#[async_trait]
impl<P: Provider> CheckoutQuoter for EvmQuoter<P> {
    async fn fee_bps(&self) -> Result<u32, ChainError> {
        let raw = match self
            .checkout
            .feeBps()
            .block(BlockId::finalized())
            .call()
            .await
        {
            Ok(raw) => raw,
            Err(err) if is_historical_state_error(&err.to_string()) => {
                tracing::warn!(error = %err, "finalized-state feeBps read unavailable; retrying against latest block");
                self.checkout
                    .feeBps()
                    .block(BlockId::latest())
                    .call()
                    .await
                    .map_err(|e| ChainError::Read(e.to_string()))?
            }
            Err(err) => return Err(ChainError::Read(err.to_string())),
        };
        u32::try_from(to_u128(raw, "feeBps")?)
            .map_err(|_| ChainError::Read("feeBps exceeds u32 range".to_string()))
    }

    async fn quote_split(&self, base_units: u128) -> Result<SplitQuote, ChainError> {
        let base = U256::from(base_units);
        let quote = match self
            .checkout
            .quoteSplit(base)
            .block(BlockId::finalized())
            .call()
            .await
        {
            Ok(quote) => quote,
            Err(err) if is_historical_state_error(&err.to_string()) => {
                tracing::warn!(
                    base_units,
                    error = %err,
                    "finalized-state quoteSplit read unavailable; retrying against latest block"
                );
                self.checkout
                    .quoteSplit(base)
                    .block(BlockId::latest())
                    .call()
                    .await
                    .map_err(|e| ChainError::Read(e.to_string()))?
            }
            Err(err) => return Err(ChainError::Read(err.to_string())),
        };
        Ok(SplitQuote {
            gross_units: to_u128(quote.gross, "quoted gross")?,
            fee_units: to_u128(quote.fee, "quoted fee")?,
            merchant_net_units: to_u128(quote.merchantNet, "quoted net")?,
        })
    }
}

/// Executes merchant payouts through the checkout contract.
///
/// The settlement wallet must hold the merchant's net and have approved the
/// checkout contract to pull it; both are checked before the payout call so
/// an under-funded wallet fails loudly instead of reverting on-chain.
pub struct CheckoutSettler<P: Provider> {
    checkout: ICommerceCheckout::ICommerceCheckoutInstance<P>,
    token: IERC20::IERC20Instance<P>,
    settlement_wallet: Address,
    token_decimals: u32,
}

impl<P: Provider> std::fmt::Debug for CheckoutSettler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSettler")
            .field("checkout", self.checkout.address())
            .field("token", self.token.address())
            .field("settlement_wallet", &self.settlement_wallet)
            .finish_non_exhaustive()
    }
}

impl<P: Provider + Clone> CheckoutSettler<P> {
    /// Creates a settler paying out of `settlement_wallet` via the checkout
    /// contract at `checkout`, denominated in the ERC-20 at `token`.
    pub fn new(
        provider: P,
        checkout: Address,
        token: Address,
        settlement_wallet: Address,
        token_decimals: u32,
    ) -> Self {
        Self {
            checkout: ICommerceCheckout::new(checkout, provider.clone()),
            token: IERC20::new(token, provider),
            settlement_wallet,
            token_decimals,
        }
    }
}

#[async_trait]
impl<P: Provider + Clone> SettlementExecutor for CheckoutSettler<P> {
    async fn settle(&self, request: &ExecutorRequest) -> Result<String, SettleError> {
        let merchant = parse_address(&request.merchant)
            .map_err(|e| SettleError::Executor(e.to_string()))?;
        let net_units = to_base_units(request.merchant_net_amount, self.token_decimals)
            .map_err(|e| SettleError::Executor(format!("net amount not payable: {e}")))?;
        let net = U256::from(net_units);

        let balance = self
            .token
            .balanceOf(self.settlement_wallet)
            .call()
            .await
            .map_err(|e| SettleError::Executor(format!("balance check failed: {e}")))?;
        if balance < net {
            return Err(SettleError::Executor(format!(
                "settlement wallet holds {balance} but the payout needs {net}"
            )));
        }
        let allowance = self
            .token
            .allowance(self.settlement_wallet, *self.checkout.address())
            .call()
            .await
            .map_err(|e| SettleError::Executor(format!("allowance check failed: {e}")))?;
        if allowance < net {
            return Err(SettleError::Executor(format!(
                "checkout allowance {allowance} is below the payout of {net}"
            )));
        }

        let pending = self
            .checkout
            .purchase(request.intent_id.clone(), merchant, net)
            .from(self.settlement_wallet)
            .send()
            .await
            .map_err(|e| SettleError::Executor(format!("payout not submitted: {e}")))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| SettleError::Executor(format!("payout unconfirmed: {e}")))?;

        if receipt.status() {
            tracing::info!(
                intent = %request.intent_id,
                merchant = %merchant,
                tx = %receipt.transaction_hash,
                "checkout payout confirmed"
            );
            Ok(receipt.transaction_hash.to_string())
        } else {
            Err(SettleError::Executor(format!(
                "payout reverted in tx {}",
                receipt.transaction_hash
            )))
        }
    }
}
