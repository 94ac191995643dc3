//! Operator-invoked liquidation
//!
//! Force-sells open positions whose remaining tokens are still worth more
//! than the fees of getting out.

use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use tracing::{info, warn};

use crate::amm::{get_amount_out, DEFAULT_FEE_MULTIPLIER};
use crate::chain::ChainClient;
use crate::error::{Error, Result};
use crate::position::exit::{ExitEngine, SellOutcome};
use crate::position::locks::PairLocks;
use crate::position::model::Position;
use crate::position::store::PositionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSkip {
    EmptyReserve,
    /// Projected proceeds don't cover the fees
    NotWorthIt { native_out: U256 },
    NotOpen,
}

impl std::fmt::Display for DumpSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpSkip::EmptyReserve => write!(f, "reserve is zero"),
            DumpSkip::NotWorthIt { native_out } => {
                write!(f, "{} out does not cover fees", format_ether(*native_out))
            }
            DumpSkip::NotOpen => write!(f, "position is not open"),
        }
    }
}

#[derive(Debug, Default)]
pub struct DumpReport {
    pub dumped: Vec<(Address, SellOutcome)>,
    pub skipped: Vec<(Address, DumpSkip)>,
    pub failed: Vec<(Address, String)>,
}

impl DumpReport {
    fn record(&mut self, pair: Address, result: Result<std::result::Result<SellOutcome, DumpSkip>>) {
        match result {
            Ok(Ok(outcome)) => self.dumped.push((pair, outcome)),
            Ok(Err(skip)) => self.skipped.push((pair, skip)),
            Err(e) => self.failed.push((pair, e.to_string())),
        }
    }
}

pub struct Liquidator {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn PositionStore>,
    exit: Arc<ExitEngine>,
    locks: Arc<PairLocks>,
}

impl Liquidator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PositionStore>,
        exit: Arc<ExitEngine>,
        locks: Arc<PairLocks>,
    ) -> Self {
        Self {
            chain,
            store,
            exit,
            locks,
        }
    }

    /// Dump every open position that still holds tokens
    pub async fn dump_all(&self) -> Result<DumpReport> {
        let positions = self.store.open_positions_with_tokens().await?;
        info!("Dumping {} open positions", positions.len());

        let mut report = DumpReport::default();
        for position in positions {
            let result = self.dump(position.pair).await;
            report.record(position.pair, result);
        }
        Ok(report)
    }

    /// Dump a single position
    pub async fn dump_single(&self, pair: Address) -> Result<DumpReport> {
        if self.store.find_by_pair(pair).await?.is_none() {
            return Err(Error::PositionNotFound(pair));
        }

        let mut report = DumpReport::default();
        let result = self.dump(pair).await;
        if let Ok(Err(skip)) = &result {
            warn!("Failed to dump {}: {}", pair, skip);
        }
        report.record(pair, result);
        Ok(report)
    }

    async fn dump(&self, pair: Address) -> Result<std::result::Result<SellOutcome, DumpSkip>> {
        let _guard = self.locks.lock(pair).await;

        let position = match self.store.find_by_pair(pair).await? {
            Some(position) if position.is_open() => position,
            _ => return Ok(Err(DumpSkip::NotOpen)),
        };

        if let Some(skip) = self.worth_dumping(&position).await? {
            info!("Skipping {}: {}", pair, skip);
            return Ok(Err(skip));
        }

        info!("Dumping {}", pair);
        Ok(Ok(self.exit.sell_if_profitable(&position, true).await?))
    }

    async fn worth_dumping(&self, position: &Position) -> Result<Option<DumpSkip>> {
        let reserve = self.chain.get_reserves(position.pair).await?;
        if reserve.is_empty() {
            return Ok(Some(DumpSkip::EmptyReserve));
        }
        if position.token_remaining.is_zero() {
            return Ok(Some(DumpSkip::NotWorthIt {
                native_out: U256::ZERO,
            }));
        }

        let side = position.native_side(self.exit.swaps().wrapped_native())?;
        let native_out = get_amount_out(
            &reserve,
            side.sell_input(position.token_remaining),
            DEFAULT_FEE_MULTIPLIER,
        )?;

        if native_out <= self.exit.swaps().estimated_fees() {
            return Ok(Some(DumpSkip::NotWorthIt { native_out }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amm::Reserve;
    use crate::position::exit::ExitSettings;
    use crate::position::model::{fixtures, CloseReason, PositionState};
    use crate::testutil::{ether, Harness};
    use chrono::Utc;

    fn liquidator(harness: &Harness) -> Liquidator {
        let exit = harness.exit_engine(ExitSettings {
            auto_sell_enabled: false,
            min_profit: ether(100),
            sell_percentage: 10,
        });
        Liquidator::new(
            harness.chain.clone(),
            harness.store.clone(),
            Arc::new(exit),
            Arc::new(PairLocks::new()),
        )
    }

    async fn open_at(harness: &Harness, pair: Address, reserve: Reserve) {
        let mut position = fixtures::open_position(Utc::now());
        position.pair = pair;
        harness.store.create(position).await.unwrap();
        harness.chain.set_reserves(pair, reserve);
    }

    #[tokio::test]
    async fn test_dump_all_skips_worthless_positions() {
        let harness = Harness::new();
        let liquidator = liquidator(&harness);

        let healthy = Address::repeat_byte(0x01);
        let drained = Address::repeat_byte(0x02);
        let dust = Address::repeat_byte(0x03);
        open_at(&harness, healthy, Reserve::new(ether(10), U256::from(10_000u64))).await;
        open_at(&harness, drained, Reserve::new(U256::ZERO, U256::ZERO)).await;
        // 1000 tokens out of 10^24 are worth far less than the fees
        open_at(&harness, dust, Reserve::new(ether(1), U256::from(10u128.pow(24)))).await;

        let report = liquidator.dump_all().await.unwrap();

        assert_eq!(report.dumped.len(), 1);
        assert_eq!(report.dumped[0].0, healthy);
        assert!(report
            .skipped
            .contains(&(drained, DumpSkip::EmptyReserve)));
        assert!(report
            .skipped
            .iter()
            .any(|(pair, skip)| *pair == dust && matches!(skip, DumpSkip::NotWorthIt { .. })));

        let stored = harness.store.find_by_pair(healthy).await.unwrap().unwrap();
        assert_eq!(stored.state(), PositionState::Closed(CloseReason::DumpAll));
        let untouched = harness.store.find_by_pair(dust).await.unwrap().unwrap();
        assert!(untouched.is_open());
    }

    #[tokio::test]
    async fn test_dump_single() {
        let harness = Harness::new();
        let liquidator = liquidator(&harness);

        let pair = Address::repeat_byte(0x04);
        open_at(&harness, pair, Reserve::new(ether(10), U256::from(10_000u64))).await;

        let report = liquidator.dump_single(pair).await.unwrap();
        assert!(matches!(
            report.dumped.as_slice(),
            [(p, SellOutcome::Sold { closed: Some(CloseReason::DumpAll), .. })] if *p == pair
        ));

        let missing = liquidator.dump_single(Address::repeat_byte(0x05)).await;
        assert!(matches!(missing, Err(Error::PositionNotFound(_))));
    }
}
