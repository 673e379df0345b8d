//! Solidity interface definitions for on-chain interactions.
//!
//! Contains the minimal ABI surface the gateway needs:
//! - [`IEntitlementRegistry`] — entitlement grants and ownership queries
//! - [`ICommerceCheckout`] — fee rate, split quoting, and payout execution
//! - [`IERC20`] — allowance/balance checks before a payout call

use alloy_sol_types::sol;

sol! {
    /// Entitlement registry: one grant per (buyer, productId), idempotent
    /// on-chain but treated as submit-once here.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEntitlementRegistry {
        function hasEntitlement(address buyer, string productId) external view returns (bool);
        function recordEntitlement(address buyer, string productId) external;
    }
}

sol! {
    /// Commerce checkout contract: quotes gross/fee/net splits and executes
    /// merchant payouts from the marketplace settlement wallet.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ICommerceCheckout {
        function feeBps() external view returns (uint256);
        function quoteSplit(uint256 baseAmount) external view returns (uint256 gross, uint256 fee, uint256 merchantNet);
        function purchase(string intentId, address merchant, uint256 baseAmount) external;
    }
}

sol! {
    /// Minimal ERC-20 interface for allowance and balance checks.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }
}
