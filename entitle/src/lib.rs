//! Core logic for accepting cryptocurrency payment proofs and granting
//! entitlements exactly once per successful payment.
//!
//! The hard problem this crate solves is that the source of truth is split
//! across two independently-failing systems: a mutable off-chain record store
//! with no multi-document transactions, and an append-only on-chain registry.
//! The same purchase request may also arrive more than once (client retries,
//! duplicate proof submissions, network replays). The purchase-commit
//! protocol in [`purchase`] converges to exactly one entitlement, exactly one
//! purchase record, and correct merchant accrual regardless of how often a
//! logically-identical request is retried.
//!
//! # Modules
//!
//! - [`amount`] - Exact decimal money math and base-unit conversion
//! - [`chain`] - On-chain registry and checkout-contract abstractions
//! - [`ledger`] - Off-chain record types (replay store, entitlements, queues)
//! - [`pricing`] - Fee policy validation (fixed bps or contract-quoted split)
//! - [`proof`] - Payment proof normalization and fingerprinting
//! - [`purchase`] - The idempotent purchase-commit coordinator
//! - [`reason`] - Stable reason codes and the response envelope
//! - [`settle`] - The PENDING -> SETTLED payout state machine
//! - [`store`] - The off-chain ledger store abstraction
//!
//! Chain and store implementations live in companion crates; this crate is
//! I/O-free apart from the traits it defines at those seams.

pub mod amount;
pub mod chain;
pub mod ledger;
pub mod pricing;
pub mod proof;
pub mod purchase;
pub mod reason;
pub mod settle;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use proof::{NormalizedProof, PaymentProof, ProofKind};
pub use reason::{ActionResponse, ReasonCode};
