//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4090
//!
//! [bridge]
//! url = "https://db-bridge.internal/"
//! api_key = "$DB_BRIDGE_API_KEY"
//!
//! [chain]
//! rpc_url = "https://sepolia.base.org"
//! signer_private_key = "$SETTLEMENT_SIGNER_KEY"
//! registry_address = "0x..."
//! checkout_address = "0x..."
//! token_address = "0x..."
//! token_decimals = 6
//!
//! [commerce]
//! chain = "base-sepolia"
//! currency = "USDC"
//! settlement_wallet = "0x..."
//! fee_bps = 100
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4090`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database-bridge connection.
    pub bridge: BridgeSection,

    /// On-chain gateway configuration.
    pub chain: ChainSection,

    /// Commerce policy (chain/currency pair, fees, settlement wallet).
    pub commerce: CommerceSection,
}

/// `[bridge]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    /// Bridge base URL.
    pub url: String,

    /// API key; supports `$VAR` / `${VAR}` expansion.
    pub api_key: String,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_bridge_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per bridge action, including the first (default: 3).
    #[serde(default = "default_bridge_attempts")]
    pub max_attempts: u32,
}

/// `[chain]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,

    /// Private key for the settlement signer (hex, with or without `0x`).
    /// Supports `$VAR` / `${VAR}` expansion.
    pub signer_private_key: String,

    /// Entitlement registry contract address.
    pub registry_address: String,

    /// Commerce checkout contract address. When set, pricing is quoted
    /// on-chain and the checkout executor handles payouts.
    #[serde(default)]
    pub checkout_address: Option<String>,

    /// Settlement token contract address; required with `checkout_address`.
    #[serde(default)]
    pub token_address: Option<String>,

    /// Decimals of the settlement token (default: 6).
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

/// `[commerce]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CommerceSection {
    /// Supported chain name, matched against listing pricing.
    pub chain: String,

    /// Supported currency symbol, matched against listing pricing.
    pub currency: String,

    /// Marketplace wallet all payments must land in.
    pub settlement_wallet: String,

    /// Fixed fee rate in basis points (used when no checkout contract is
    /// configured).
    pub fee_bps: u32,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4090
}

fn default_bridge_timeout_secs() -> u64 {
    30
}

fn default_bridge_attempts() -> u32 {
    3
}

fn default_token_decimals() -> u32 {
    6
}

impl ServerConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if !Path::new(path).exists() {
            return Err(format!("config file not found: {path}").into());
        }
        let content = std::fs::read_to_string(path)?;

        // Expand environment variables in the raw TOML string
        let expanded = expand_env_vars(&content);

        let mut config: Self = toml::from_str(&expanded)?;

        // Allow HOST / PORT env overrides
        if let Ok(host) = std::env::var("HOST")
            && let Ok(addr) = host.parse()
        {
            config.host = addr;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next(); // consume '{'
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                // Leave unresolved variable as-is
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
