//! Marketplace purchase-commit and settlement server binary.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p entitle-server --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p entitle-server
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p entitle-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `4090`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_provider::ProviderBuilder;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::reqwest::Url;
use axum::http::Method;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use entitle::purchase::{CommerceConfig, PurchaseCoordinator};
use entitle::settle::SettlementService;
use entitle_evm::{CheckoutSettler, EvmGateway, EvmQuoter};
use entitle_server::config::ServerConfig;
use entitle_server::handlers::{AppState, app_router};
use entitle_store::{BridgeClient, BridgeConfig, BridgeStore};

#[tokio::main]
async fn main() {
    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

fn parse_address(value: &str, what: &str) -> Result<Address, Box<dyn std::error::Error>> {
    value
        .parse()
        .map_err(|e| format!("invalid {what} address {value}: {e}").into())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        chain = %config.commerce.chain,
        currency = %config.commerce.currency,
        "Loaded configuration"
    );

    // Ledger store over the database bridge.
    let bridge_url: url::Url = config.bridge.url.parse()?;
    let api_key = config.bridge.api_key.trim();
    if api_key.is_empty() || api_key.starts_with('$') {
        return Err("bridge api_key not resolved (missing env var?)".into());
    }
    let store = Arc::new(BridgeStore::new(BridgeClient::new(
        BridgeConfig::new(bridge_url, api_key)
            .with_timeout(Duration::from_secs(config.bridge.timeout_secs))
            .with_max_attempts(config.bridge.max_attempts),
    )));

    // Chain gateway with the settlement signer's wallet.
    let key_str = config.chain.signer_private_key.trim();
    if key_str.is_empty() || key_str.starts_with('$') {
        return Err("chain signer_private_key not resolved (missing env var?)".into());
    }
    let signer: PrivateKeySigner = key_str
        .parse()
        .map_err(|e| format!("invalid signer key: {e}"))?;
    tracing::info!(signer = %signer.address(), "Settlement signer loaded");

    let wallet = EthereumWallet::from(signer);
    let rpc_url: Url = config.chain.rpc_url.parse()?;
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(rpc_url);

    let registry = parse_address(&config.chain.registry_address, "registry")?;
    let gateway = EvmGateway::new(provider.clone(), registry);

    let commerce = CommerceConfig {
        chain: config.commerce.chain.clone(),
        currency: config.commerce.currency.clone(),
        settlement_wallet: config.commerce.settlement_wallet.clone(),
        fee_bps: config.commerce.fee_bps,
        token_decimals: config.chain.token_decimals,
    };

    let mut coordinator = PurchaseCoordinator::new(Arc::clone(&store), gateway, commerce)?;
    let mut settlement = SettlementService::new(Arc::clone(&store));

    // With a checkout contract configured, pricing is quoted on-chain and
    // the checkout executor pays merchants directly.
    if let Some(checkout_addr) = &config.chain.checkout_address {
        let token_addr = config
            .chain
            .token_address
            .as_deref()
            .ok_or("chain.token_address is required with chain.checkout_address")?;
        let checkout = parse_address(checkout_addr, "checkout")?;
        let token = parse_address(token_addr, "token")?;
        let settlement_wallet =
            parse_address(&config.commerce.settlement_wallet, "settlement wallet")?;

        coordinator =
            coordinator.with_quoter(Arc::new(EvmQuoter::new(provider.clone(), checkout)));
        settlement = settlement.with_executor(Arc::new(CheckoutSettler::new(
            provider,
            checkout,
            token,
            settlement_wallet,
            config.chain.token_decimals,
        )));
        tracing::info!(checkout = %checkout, "Checkout contract enabled for quoting and payouts");
    } else {
        tracing::info!(
            fee_bps = config.commerce.fee_bps,
            "Fixed-fee pricing; settlements recorded from supplied transaction hashes"
        );
    }

    let state = Arc::new(AppState {
        coordinator,
        settlement,
    });

    let app = app_router(state).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
