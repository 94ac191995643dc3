//! Configuration loading and validation

use alloy::primitives::utils::{parse_ether, parse_units};
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::position::exit::ExitSettings;
use crate::position::monitor::MonitorSettings;
use crate::safety::default_blocked_patterns;
use crate::stream::pair_watcher::WatcherSettings;
use crate::trading::entry::EntrySettings;
use crate::trading::sequencer::RetryPolicy;

/// Environment variable holding the signing key when `wallet.private_key` is unset
pub const PRIVATE_KEY_ENV: &str = "ACCOUNT_PK";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub contracts: ContractsConfig,
    pub trading: TradingConfig,
    pub auto_sell: AutoSellConfig,
    pub monitor: MonitorConfig,
    pub watcher: WatcherConfig,
    pub safety: SafetyConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// WebSocket endpoint used for calls, broadcasts and log subscriptions
    pub ws_endpoint: String,
    pub connect_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "ws://127.0.0.1:8546".to_string(),
            connect_timeout_secs: 30,
            receipt_timeout_secs: 120,
            reconnect_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Hex private key; falls back to `ACCOUNT_PK`
    pub private_key: Option<String>,
}

/// DEX contracts (PancakeSwap V2 on BSC by default)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub factory: Address,
    pub router: Address,
    pub wrapped_native: Address,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            factory: default_address("0xca143ce32fe78f1f7019d7d551a6402fc5350c73"),
            router: default_address("0x10ed43c718714eb63d5aa57b78b54704e256024e"),
            wrapped_native: default_address("0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c"),
        }
    }
}

fn default_address(hex: &str) -> Address {
    Address::from_str(hex).unwrap_or_default()
}

/// Amounts are decimal strings in native units ("0.05")
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub buy_in_amount: String,
    pub gas_price_gwei: String,
    /// Buying pauses while the balance is at or below this
    pub min_balance: String,
    /// New pairs need more native liquidity than this
    pub min_reserve: String,
    pub deadline_secs: u64,
    pub max_nonce_resyncs: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_in_amount: "0.01".to_string(),
            gas_price_gwei: "5".to_string(),
            min_balance: "0.05".to_string(),
            min_reserve: "1".to_string(),
            deadline_secs: 30,
            max_nonce_resyncs: 3,
        }
    }
}

impl TradingConfig {
    pub fn buy_in(&self) -> Result<U256> {
        parse_amount("trading.buy_in_amount", &self.buy_in_amount)
    }

    pub fn min_balance(&self) -> Result<U256> {
        parse_amount("trading.min_balance", &self.min_balance)
    }

    pub fn min_reserve(&self) -> Result<U256> {
        parse_amount("trading.min_reserve", &self.min_reserve)
    }

    /// Gas price in wei
    pub fn gas_price(&self) -> Result<u128> {
        let wei: U256 = parse_units(self.gas_price_gwei.trim(), "gwei")
            .with_context(|| format!("Invalid trading.gas_price_gwei: {}", self.gas_price_gwei))?
            .into();
        u128::try_from(wei).context("trading.gas_price_gwei is too large")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoSellConfig {
    pub enabled: bool,
    /// Expected proceeds have to clear this before an automatic sale
    pub min_profit: String,
    /// Share of the remaining tokens sold per automatic sale
    pub sell_percentage: u8,
}

impl Default for AutoSellConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit: "0.01".to_string(),
            sell_percentage: 50,
        }
    }
}

impl AutoSellConfig {
    pub fn min_profit(&self) -> Result<U256> {
        parse_amount("auto_sell.min_profit", &self.min_profit)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 1_800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub balance_check_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            balance_check_secs: 60,
        }
    }
}

/// Source-code scanner settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub enabled: bool,
    pub allow_unverified: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Regexes matched against verified source code
    pub blocked_patterns: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_unverified: false,
            api_url: "https://api.bscscan.com/api".to_string(),
            api_key: None,
            timeout_secs: 10,
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "positions.json".to_string(),
        }
    }
}

fn parse_amount(field: &str, value: &str) -> Result<U256> {
    parse_ether(value.trim()).with_context(|| format!("Invalid {}: {}", field, value))
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix APE__)
            .add_source(
                config::Environment::with_prefix("APE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.rpc.ws_endpoint)
            .with_context(|| format!("Invalid rpc.ws_endpoint: {}", self.rpc.ws_endpoint))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!("rpc.ws_endpoint must be a ws:// or wss:// URL");
        }

        for (name, address) in [
            ("contracts.factory", self.contracts.factory),
            ("contracts.router", self.contracts.router),
            ("contracts.wrapped_native", self.contracts.wrapped_native),
        ] {
            if address == Address::ZERO {
                anyhow::bail!("{} must be set", name);
            }
        }

        if self.trading.buy_in()?.is_zero() {
            anyhow::bail!("trading.buy_in_amount must be positive");
        }
        if self.trading.gas_price()? == 0 {
            anyhow::bail!("trading.gas_price_gwei must be positive");
        }
        self.trading.min_balance()?;
        self.trading.min_reserve()?;
        self.auto_sell.min_profit()?;

        if !(1..=100).contains(&self.auto_sell.sell_percentage) {
            anyhow::bail!(
                "auto_sell.sell_percentage must be between 1 and 100, got {}",
                self.auto_sell.sell_percentage
            );
        }

        if self.monitor.interval_secs == 0 || self.watcher.balance_check_secs == 0 {
            anyhow::bail!("monitor.interval_secs and watcher.balance_check_secs must be positive");
        }

        for pattern in &self.safety.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked_pattern regex: {}", pattern))?;
        }
        if self.safety.enabled && self.safety.api_key.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("safety.api_key must be set while safety.enabled is true");
        }

        Ok(())
    }

    /// Signing key from the config file or `ACCOUNT_PK`
    pub fn signer(&self) -> Result<PrivateKeySigner> {
        let key = match &self.wallet.private_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => std::env::var(PRIVATE_KEY_ENV)
                .map_err(|_| Error::MissingEnvVar(PRIVATE_KEY_ENV.to_string()))?,
        };

        let signer = PrivateKeySigner::from_str(key.trim())
            .map_err(|e| Error::InvalidSigningKey(e.to_string()))?;
        Ok(signer)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.trading.max_nonce_resyncs)
    }

    pub fn entry_settings(&self) -> Result<EntrySettings> {
        Ok(EntrySettings {
            buy_in: self.trading.buy_in()?,
            allow_unverified: self.safety.allow_unverified,
        })
    }

    pub fn exit_settings(&self) -> Result<ExitSettings> {
        Ok(ExitSettings {
            auto_sell_enabled: self.auto_sell.enabled,
            min_profit: self.auto_sell.min_profit()?,
            sell_percentage: self.auto_sell.sell_percentage,
        })
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.monitor.interval_secs),
            stale_after: Duration::from_secs(self.monitor.stale_after_secs),
        }
    }

    pub fn watcher_settings(&self, auto_buy: bool) -> Result<WatcherSettings> {
        Ok(WatcherSettings {
            factory: self.contracts.factory,
            wrapped_native: self.contracts.wrapped_native,
            min_reserve: self.trading.min_reserve()?,
            auto_buy,
            reconnect_delay: Duration::from_millis(self.rpc.reconnect_delay_ms),
            balance_check: Duration::from_secs(self.watcher.balance_check_secs),
        })
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let key_source = match &self.wallet.private_key {
            Some(key) if !key.is_empty() => "config (***)",
            _ => PRIVATE_KEY_ENV,
        };

        format!(
            r#"Configuration:
  RPC:
    ws_endpoint: {}
    receipt_timeout: {}s
    reconnect_delay: {}ms
  Wallet:
    private_key: {}
  Contracts:
    factory: {}
    router: {}
    wrapped_native: {}
  Trading:
    buy_in: {}
    gas_price: {} gwei
    min_balance: {}
    min_reserve: {}
    deadline: {}s
    max_nonce_resyncs: {}
  Auto-Sell:
    enabled: {}
    min_profit: {}
    sell_percentage: {}%
  Monitor:
    interval: {}s
    stale_after: {}s
  Safety:
    enabled: {}
    allow_unverified: {}
    api_url: {}
    api_key: {}
    blocked_patterns: {}
  Store:
    path: {}
"#,
            mask_url(&self.rpc.ws_endpoint),
            self.rpc.receipt_timeout_secs,
            self.rpc.reconnect_delay_ms,
            key_source,
            self.contracts.factory,
            self.contracts.router,
            self.contracts.wrapped_native,
            self.trading.buy_in_amount,
            self.trading.gas_price_gwei,
            self.trading.min_balance,
            self.trading.min_reserve,
            self.trading.deadline_secs,
            self.trading.max_nonce_resyncs,
            self.auto_sell.enabled,
            self.auto_sell.min_profit,
            self.auto_sell.sell_percentage,
            self.monitor.interval_secs,
            self.monitor.stale_after_secs,
            self.safety.enabled,
            self.safety.allow_unverified,
            self.safety.api_url,
            if self.safety.api_key.as_deref().unwrap_or("").is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.safety.blocked_patterns.len(),
            self.store.path,
        )
    }
}

/// Mask URL for display (hide API keys in paths and query params)
fn mask_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let masked_query = parsed.query().is_some();
    let masked_path = parsed.path().len() > 1;

    if masked_query {
        parsed.set_query(None);
    }
    if masked_path {
        parsed.set_path("");
    }

    let mut out = parsed.to_string();
    if masked_path {
        out = format!("{}/***", out.trim_end_matches('/'));
    }
    if masked_query {
        out.push_str("?***");
    }
    out
}
