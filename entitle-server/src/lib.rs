//! Marketplace purchase-commit and settlement HTTP server.
//!
//! Wires the purchase coordinator and settlement service from `entitle` to
//! the database-bridge store (`entitle-store`) and the EVM gateway
//! (`entitle-evm`), and exposes them over a small JSON API.

pub mod config;
pub mod handlers;
