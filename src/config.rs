//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bot tokens) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Per-index trading parameters
//! (exchange segment, lot size, strike gap, master feed URL) live under
//! `[indices.<NAME>]` tables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::error::Error;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub store: StoreConfig,
    pub alerts: AlertsConfig,
    pub indices: HashMap<String, IndexConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    /// Index assigned to owners who have not picked one yet.
    pub default_index: String,
    pub quote_refresh_secs: u64,
    pub supervisor_poll_secs: u64,
    pub health_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    /// Fixed offset added to a stop-loss trigger to form the limit price.
    pub sl_slippage_points: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
}

/// Exchange parameters for one tradable index.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Exchange segment orders and quotes are routed to ("nse_fo", "bse_fo").
    pub exchange: String,
    /// Fixed quantity multiple per order.
    pub lot_size: i64,
    /// Spacing between adjacent listed strikes.
    pub strike_gap: i64,
    /// Vendor scrip-master CSV endpoint for this segment.
    pub master_url: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Look up the trading parameters for an index name.
    pub fn index(&self, name: &str) -> crate::error::Result<&IndexConfig> {
        self.indices
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("unknown index: {name}")))
    }
}
