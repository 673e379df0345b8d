//! HTTP database-bridge implementation of the off-chain ledger store.
//!
//! All persistence goes through a thin document-database bridge service:
//! one POST per action (`find`, `insertOne`, `updateOne`),
//! authenticated with an API-key header. [`BridgeClient`] owns the wire
//! protocol and its bounded retry policy; [`BridgeStore`] maps the
//! [`entitle::store::LedgerStore`] operations onto bridge actions.

pub mod bridge;
pub mod store;

pub use bridge::{BridgeClient, BridgeConfig};
pub use store::BridgeStore;
