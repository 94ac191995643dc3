//! CLI command implementations

use alloy::primitives::utils::format_ether;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, RpcChainClient};
use crate::config::Config;
use crate::position::exit::{ExitEngine, SellOutcome};
use crate::position::locks::PairLocks;
use crate::position::model::Position;
use crate::position::monitor::PositionMonitor;
use crate::position::store::{JsonPositionStore, PositionStore};
use crate::safety::{BscScanOracle, SafetyVerdict, StaticOracle, TokenSafetyOracle};
use crate::stream::pair_watcher::{BalanceGate, PairWatcher};
use crate::trading::entry::EntryEngine;
use crate::trading::liquidator::{DumpReport, Liquidator};
use crate::trading::router::SwapBuilder;
use crate::trading::sequencer::TransactionSequencer;

/// Components shared by the trading commands
struct Runtime {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn PositionStore>,
    sequencer: Arc<TransactionSequencer>,
    locks: Arc<PairLocks>,
    exit: Arc<ExitEngine>,
}

impl Runtime {
    async fn connect(config: &Config) -> Result<Self> {
        let signer = config.signer()?;

        info!("Connecting to {}...", config.rpc.ws_endpoint);
        let client = RpcChainClient::connect_with_retry(
            &config.rpc.ws_endpoint,
            signer,
            Duration::from_secs(config.rpc.receipt_timeout_secs),
            Duration::from_secs(config.rpc.connect_timeout_secs),
        )
        .await
        .context("Failed to connect to RPC endpoint")?;
        let chain: Arc<dyn ChainClient> = Arc::new(client);

        let store: Arc<dyn PositionStore> = Arc::new(
            JsonPositionStore::open(&config.store.path)
                .await
                .with_context(|| format!("Failed to open position store {}", config.store.path))?,
        );

        let sequencer = Arc::new(TransactionSequencer::new(chain.clone(), config.retry_policy()));
        let nonce = sequencer.resync().await?;
        info!("Account {} starts at nonce {}", chain.account(), nonce);

        let swaps = SwapBuilder::new(
            config.contracts.router,
            config.contracts.wrapped_native,
            chain.account(),
            config.trading.gas_price()?,
            Duration::from_secs(config.trading.deadline_secs),
        );

        let exit = Arc::new(ExitEngine::new(
            chain.clone(),
            sequencer.clone(),
            store.clone(),
            swaps,
            config.exit_settings()?,
        ));

        Ok(Self {
            chain,
            store,
            sequencer,
            locks: Arc::new(PairLocks::new()),
            exit,
        })
    }
}

fn safety_oracle(config: &Config) -> Result<Arc<dyn TokenSafetyOracle>> {
    if config.safety.enabled {
        info!("Source-code safety check enabled ({})", config.safety.api_url);
        Ok(Arc::new(BscScanOracle::new(&config.safety)?))
    } else {
        warn!("Source-code safety check disabled - every token passes");
        Ok(Arc::new(StaticOracle(SafetyVerdict::Pass)))
    }
}

/// Start the sniper: monitor plus pair watcher until Ctrl-C
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Running in DRY-RUN mode - new pairs are logged, never bought");
    }

    info!("Starting pair sniper...");
    info!(
        "Buy-in: {}, gas price: {} gwei, auto-sell: {}",
        config.trading.buy_in_amount, config.trading.gas_price_gwei, config.auto_sell.enabled
    );

    let runtime = Runtime::connect(config).await?;
    let oracle = safety_oracle(config)?;

    let swaps = runtime.exit.swaps().clone();
    let entry = Arc::new(EntryEngine::new(
        runtime.sequencer.clone(),
        runtime.store.clone(),
        oracle,
        swaps,
        config.entry_settings()?,
    ));

    let monitor = Arc::new(PositionMonitor::new(
        runtime.chain.clone(),
        runtime.store.clone(),
        runtime.exit.clone(),
        runtime.locks.clone(),
        config.contracts.wrapped_native,
        config.monitor_settings(),
    ));

    let gate = Arc::new(BalanceGate::new(config.trading.min_balance()?));
    let watcher = Arc::new(PairWatcher::new(
        runtime.chain.clone(),
        entry,
        gate,
        config.watcher_settings(!dry_run)?,
    ));

    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };
    let watcher_task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    watcher.stop();
    monitor.stop();

    for (name, task) in [("watcher", watcher_task), ("monitor", monitor_task)] {
        if let Err(e) = task.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Sniper stopped");
    Ok(())
}

/// Force-sell open positions
pub async fn dump(config: &Config, single: Option<&str>, force: bool) -> Result<()> {
    let pair = single
        .map(|s| Address::from_str(s).with_context(|| format!("Invalid pair address: {}", s)))
        .transpose()?;

    if !force {
        let target = match pair {
            Some(pair) => format!("the position in {}", pair),
            None => "ALL open positions".to_string(),
        };
        let confirmed = Confirm::new()
            .with_prompt(format!("Sell {} at market? This cannot be undone.", target))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Dump cancelled by user");
            return Ok(());
        }
    }

    let runtime = Runtime::connect(config).await?;
    let liquidator = Liquidator::new(
        runtime.chain.clone(),
        runtime.store.clone(),
        runtime.exit.clone(),
        runtime.locks.clone(),
    );

    let report = match pair {
        Some(pair) => liquidator.dump_single(pair).await?,
        None => liquidator.dump_all().await?,
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &DumpReport) {
    println!("\n=== DUMP REPORT ===\n");

    for (pair, outcome) in &report.dumped {
        match outcome {
            SellOutcome::Sold {
                tokens, proceeds, ..
            } => println!("SOLD    {} {} tokens for {}", pair, tokens, format_ether(*proceeds)),
            SellOutcome::Failed(reason) => println!("FAILED  {} {}", pair, reason),
            other => println!("NOOP    {} {:?}", pair, other),
        }
    }
    for (pair, skip) in &report.skipped {
        println!("SKIPPED {} {}", pair, skip);
    }
    for (pair, reason) in &report.failed {
        println!("ERROR   {} {}", pair, reason);
    }

    println!(
        "\nDumped: {}, skipped: {}, errors: {}",
        report.dumped.len(),
        report.skipped.len(),
        report.failed.len()
    );
}

/// Print every stored position
pub async fn status(config: &Config) -> Result<()> {
    info!("Loading positions from {}...", config.store.path);
    let store = JsonPositionStore::open(&config.store.path).await?;
    let positions = store.all().await?;

    println!("\n=== SNIPER STATUS ===\n");
    println!("Positions: {}", positions.len());
    println!("Open: {}", positions.iter().filter(|p| p.is_open()).count());

    if positions.is_empty() {
        println!("\nNo positions.");
        return Ok(());
    }

    println!();
    for position in &positions {
        println!("{}", position_line(position));
    }

    Ok(())
}

fn position_line(position: &Position) -> String {
    let sold_for = position
        .sold_for
        .map(format_ether)
        .unwrap_or_else(|| "-".to_string());
    let profit_loss = position
        .profit_loss
        .map(format_ether)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} [{}] spent {} sold for {} P/L {} tokens left {}",
        position.pair,
        position.state(),
        format_ether(position.spent),
        sold_for,
        profit_loss,
        position.token_remaining
    )
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Create an empty position store
pub async fn init_store(config: &Config) -> Result<()> {
    if JsonPositionStore::init(&config.store.path).await? {
        info!("Created position store at {}", config.store.path);
    } else {
        info!("Position store {} already exists", config.store.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::model::fixtures;
    use chrono::Utc;

    #[test]
    fn test_position_line() {
        let position = fixtures::open_position(Utc::now());
        let line = position_line(&position);

        assert!(line.contains(&fixtures::pair().to_string()));
        assert!(line.contains("spent 1.000000000000000000"));
        assert!(line.contains("sold for -"));
    }

    #[tokio::test]
    async fn test_init_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir
            .path()
            .join("positions.json")
            .to_string_lossy()
            .into_owned();

        init_store(&config).await.unwrap();
        let store = JsonPositionStore::open(&config.store.path).await.unwrap();
        assert!(store.all().await.unwrap().is_empty());

        // second run leaves the file alone
        init_store(&config).await.unwrap();
    }
}
