//! Periodic repricing of open positions
//!
//! Every tick the monitor picks the open positions whose profit/loss is
//! stale, revalues each one against the live reserve, closes collapsed
//! pools as rugs and hands the rest to the exit engine. Positions are
//! checked concurrently; two checks of the same pair never overlap.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, I256, U256};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::exit::{ExitEngine, SellOutcome};
use super::locks::PairLocks;
use super::model::{CloseReason, Position};
use super::store::PositionStore;
use crate::amm::{get_amount_out, DEFAULT_FEE_MULTIPLIER};
use crate::chain::ChainClient;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Age of the last profit/loss check before a position is due again
    pub stale_after: Duration,
}

/// Result of checking one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Closed or gone by the time the lock was acquired
    Skipped,
    /// No tokens left on-chain; left open for inspection
    ZeroBalance,
    EmptyReserve,
    Rug {
        profit_loss: I256,
    },
    Repriced {
        profit_loss: I256,
        sell: Option<SellOutcome>,
    },
}

impl CheckOutcome {
    fn profit_loss(&self) -> Option<I256> {
        match self {
            CheckOutcome::Rug { profit_loss } | CheckOutcome::Repriced { profit_loss, .. } => {
                Some(*profit_loss)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub repriced: usize,
    pub rugs: usize,
    pub failed: usize,
    pub best_profit: Option<I256>,
}

/// Liquidity collapsed: native reserve at or below 0.5% of the entry reserve
pub fn liquidity_collapsed(native_reserve: U256, reserve_enter: U256) -> Result<bool> {
    let scaled = native_reserve
        .checked_mul(U256::from(200u64))
        .ok_or(Error::PriceOverflow)?;
    Ok(scaled <= reserve_enter)
}

/// Remaining share of the entry reserve in basis points
fn remaining_bps(native_reserve: U256, reserve_enter: U256) -> U256 {
    if reserve_enter.is_zero() {
        return U256::MAX;
    }
    native_reserve.saturating_mul(U256::from(10_000u64)) / reserve_enter
}

fn signed(value: U256) -> Result<I256> {
    I256::try_from(value).map_err(|_| Error::PriceOverflow)
}

pub struct PositionMonitor {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn PositionStore>,
    exit: Arc<ExitEngine>,
    locks: Arc<PairLocks>,
    wrapped_native: Address,
    settings: MonitorSettings,
    shutdown: broadcast::Sender<()>,
}

impl PositionMonitor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PositionStore>,
        exit: Arc<ExitEngine>,
        locks: Arc<PairLocks>,
        wrapped_native: Address,
        settings: MonitorSettings,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            chain,
            store,
            exit,
            locks,
            wrapped_native,
            settings,
            shutdown,
        }
    }

    /// Tick until [`stop`](Self::stop) is called
    pub async fn run(&self) {
        info!(
            "Monitoring positions every {}s (stale after {}s)",
            self.settings.interval.as_secs(),
            self.settings.stale_after.as_secs()
        );

        let mut ticker = interval(self.settings.interval);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Monitor tick failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Position monitor shutting down");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Check every due position once
    pub async fn tick(&self) -> Result<TickSummary> {
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .map_err(|e| Error::Config(format!("monitor.stale_after_secs: {}", e)))?;
        let cutoff = Utc::now() - stale_after;

        let due = self.store.open_positions_due(cutoff).await?;
        let mut summary = TickSummary {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!("No positions due for a check");
            return Ok(summary);
        }
        info!("Have {} positions to check", due.len());

        let results = join_all(due.into_iter().map(|p| self.check(p.pair))).await;

        for result in results {
            match result {
                Ok(outcome) => {
                    match outcome {
                        CheckOutcome::Rug { .. } => summary.rugs += 1,
                        CheckOutcome::Repriced { .. } => summary.repriced += 1,
                        _ => {}
                    }
                    if let Some(profit_loss) = outcome.profit_loss() {
                        if summary.best_profit.map_or(true, |best| profit_loss > best) {
                            summary.best_profit = Some(profit_loss);
                        }
                    }
                }
                Err(_) => summary.failed += 1,
            }
        }

        if let Some(best) = summary.best_profit {
            let sign = if best.is_negative() { "-" } else { "" };
            info!(
                "Best profit of all those: {}{}",
                sign,
                format_ether(best.unsigned_abs())
            );
        }

        Ok(summary)
    }

    /// Reprice one position under its pair lock
    pub async fn check(&self, pair: Address) -> Result<CheckOutcome> {
        let _guard = self.locks.lock(pair).await;

        let position = match self.store.find_by_pair(pair).await? {
            Some(position) if position.is_open() => position,
            _ => return Ok(CheckOutcome::Skipped),
        };

        let result = self.reprice(&position).await;
        if let Err(e) = &result {
            if e.is_programming_fault() {
                error!("Check of {} aborted: {}", pair, e);
            } else {
                warn!("Check of {} failed: {}", pair, e);
            }
        }
        result
    }

    async fn reprice(&self, position: &Position) -> Result<CheckOutcome> {
        let pair = position.pair;
        let side = position.native_side(self.wrapped_native)?;
        let token = side.target_token(position.token0, position.token1);

        let balance = self.chain.token_balance(token).await?;
        if balance.is_zero() {
            warn!("0 tokens remaining for {}", pair);
            return Ok(CheckOutcome::ZeroBalance);
        }

        let reserve = self.chain.get_reserves(pair).await?;
        if reserve.is_empty() {
            warn!("Reserve is zero for {}", pair);
            return Ok(CheckOutcome::EmptyReserve);
        }

        let native_reserve = side.native_reserve(&reserve);
        let value = get_amount_out(&reserve, side.sell_input(balance), DEFAULT_FEE_MULTIPLIER)?;
        let profit_loss = signed(value)?
            .checked_sub(signed(position.spent)?)
            .ok_or(Error::PriceOverflow)?;

        let collapsed = liquidity_collapsed(native_reserve, position.reserve_enter)?;
        let rug = collapsed && !profit_loss.is_positive();

        let now = Utc::now();
        let mut update = position.refresh_profit_loss(profit_loss, balance, now)?;
        if rug {
            update = update.merge(position.close(CloseReason::Rug, now)?);
        }
        let position = self.store.update(pair, update).await?;

        let bps: u64 = remaining_bps(native_reserve, position.reserve_enter).saturating_to();
        if rug {
            info!(
                "Marking {} as a rug (remainder of original native reserve: {}.{:02}%)",
                pair,
                bps / 100,
                bps % 100
            );
            return Ok(CheckOutcome::Rug { profit_loss });
        }

        debug!(
            "{}: value {} for {} tokens, profit/loss {}, reserve at {} bps of entry",
            pair,
            format_ether(value),
            balance,
            profit_loss,
            bps
        );

        if collapsed {
            return Ok(CheckOutcome::Repriced {
                profit_loss,
                sell: None,
            });
        }

        let sell = self.exit.sell_if_profitable(&position, false).await?;
        Ok(CheckOutcome::Repriced {
            profit_loss,
            sell: Some(sell),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amm::Reserve;
    use crate::position::exit::ExitSettings;
    use crate::position::model::{fixtures, PositionState};
    use crate::testutil::{ether, Harness};

    fn monitor(harness: &Harness, exit: ExitSettings) -> PositionMonitor {
        PositionMonitor::new(
            harness.chain.clone(),
            harness.store.clone(),
            Arc::new(harness.exit_engine(exit)),
            Arc::new(PairLocks::new()),
            fixtures::wrapped(),
            MonitorSettings {
                interval: Duration::from_secs(60),
                stale_after: Duration::from_secs(1800),
            },
        )
    }

    fn exit_settings() -> ExitSettings {
        ExitSettings {
            auto_sell_enabled: true,
            min_profit: U256::from(10u128.pow(17)),
            sell_percentage: 50,
        }
    }

    /// Open position (1 ether spent, 100 ether entry reserve) last checked an hour ago
    async fn due_position(harness: &Harness) -> Position {
        let position = fixtures::open_position(Utc::now() - chrono::Duration::hours(1));
        harness
            .chain
            .set_token_balance(fixtures::token(), U256::from(1_000u64));
        harness.store.create(position).await.unwrap()
    }

    #[test]
    fn test_liquidity_collapse_threshold() {
        let enter = ether(100);
        // exactly 0.5% counts as collapsed
        assert!(liquidity_collapsed(U256::from(5 * 10u128.pow(17)), enter).unwrap());
        assert!(liquidity_collapsed(U256::from(3 * 10u128.pow(17)), enter).unwrap());
        assert!(!liquidity_collapsed(U256::from(5 * 10u128.pow(17) + 1), enter).unwrap());
        assert!(!liquidity_collapsed(ether(2), enter).unwrap());
    }

    #[tokio::test]
    async fn test_collapsed_pool_is_a_rug() {
        let harness = Harness::new();
        let monitor = monitor(&harness, exit_settings());
        let position = due_position(&harness).await;

        // 0.3% of the entry reserve left
        harness.chain.set_reserves(
            position.pair,
            Reserve::new(U256::from(3 * 10u128.pow(17)), U256::from(10u128.pow(24))),
        );

        let outcome = monitor.check(position.pair).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Rug { profit_loss } if profit_loss.is_negative()));

        let stored = harness.store.find_by_pair(position.pair).await.unwrap().unwrap();
        assert_eq!(stored.state(), PositionState::Closed(CloseReason::Rug));
        assert!(stored.profit_loss.is_some());
        assert!(harness.chain.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_collapsed_pool_in_profit_is_not_sold() {
        let harness = Harness::new();
        let monitor = monitor(&harness, exit_settings());
        let mut position = fixtures::open_position(Utc::now() - chrono::Duration::hours(1));
        position.spent = U256::from(10u128.pow(17));
        harness
            .chain
            .set_token_balance(fixtures::token(), U256::from(1_000u64));
        let position = harness.store.create(position).await.unwrap();

        // 0.3% of the entry reserve left, thin token side: 1000 tokens are worth ~0.3 ether
        harness.chain.set_reserves(
            position.pair,
            Reserve::new(U256::from(3 * 10u128.pow(17)), U256::from(10u64)),
        );

        let outcome = monitor.check(position.pair).await.unwrap();
        match outcome {
            CheckOutcome::Repriced {
                profit_loss,
                sell: None,
            } => assert!(profit_loss.is_positive()),
            other => panic!("unexpected outcome {:?}", other),
        }

        let stored = harness.store.find_by_pair(position.pair).await.unwrap().unwrap();
        assert_eq!(stored.state(), PositionState::Open);
        assert!(stored.profit_loss.is_some_and(|pl| pl.is_positive()));
        assert!(harness.chain.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_profitable_position_triggers_sell() {
        let harness = Harness::new();
        let monitor = monitor(&harness, exit_settings());
        let position = due_position(&harness).await;

        // 2% of the entry reserve, thin token side: 1000 tokens are worth ~1.8 ether
        harness
            .chain
            .set_reserves(position.pair, Reserve::new(ether(2), U256::from(100u64)));
        harness.chain.push_swap_output(U256::from(9 * 10u128.pow(17)));
        harness
            .chain
            .set_balance_after_swap(fixtures::token(), U256::from(500u64));

        let outcome = monitor.check(position.pair).await.unwrap();
        match outcome {
            CheckOutcome::Repriced {
                profit_loss,
                sell: Some(SellOutcome::Sold { tokens, closed, .. }),
            } => {
                assert!(profit_loss.is_positive());
                assert_eq!(tokens, U256::from(500u64));
                assert_eq!(closed, None);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let stored = harness.store.find_by_pair(position.pair).await.unwrap().unwrap();
        assert!(stored.is_open());
        assert_eq!(stored.token_remaining, U256::from(500u64));
        assert!(stored.profit_loss_checked_at > position.profit_loss_checked_at);
    }

    #[tokio::test]
    async fn test_zero_balance_is_skipped() {
        let harness = Harness::new();
        let monitor = monitor(&harness, exit_settings());
        let position = due_position(&harness).await;
        harness.chain.set_token_balance(fixtures::token(), U256::ZERO);

        let outcome = monitor.check(position.pair).await.unwrap();
        assert_eq!(outcome, CheckOutcome::ZeroBalance);

        let stored = harness.store.find_by_pair(position.pair).await.unwrap().unwrap();
        assert!(stored.is_open());
        assert!(stored.profit_loss.is_none());
    }

    #[tokio::test]
    async fn test_tick_checks_only_due_positions() {
        let harness = Harness::new();
        let monitor = monitor(&harness, exit_settings());

        let due = due_position(&harness).await;
        harness.chain.set_reserves(
            due.pair,
            Reserve::new(U256::from(10u128.pow(17)), U256::from(10u128.pow(24))),
        );

        let mut fresh = fixtures::open_position(Utc::now());
        fresh.pair = Address::repeat_byte(0x55);
        harness.store.create(fresh).await.unwrap();

        let summary = monitor.tick().await.unwrap();
        assert_eq!(summary.due, 1);
        assert_eq!(summary.rugs, 1);
        assert!(summary.best_profit.is_some());

        let second = monitor.tick().await.unwrap();
        assert_eq!(second.due, 0);
    }
}
