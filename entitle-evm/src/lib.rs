//! EVM implementations of the on-chain collaborators.
//!
//! [`EvmGateway`] drives the entitlement registry contract; [`EvmQuoter`]
//! and [`CheckoutSettler`] drive the commerce checkout contract. All reads
//! target the last finalized block and fall back once to the latest block
//! when an RPC node has pruned finalized state.

pub mod checkout;
pub mod contract;
pub mod gateway;

pub use checkout::{CheckoutSettler, EvmQuoter};
pub use gateway::EvmGateway;
