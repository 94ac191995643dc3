//! Exit engine
//!
//! Decides whether selling a share of an open position clears the profit
//! bar and drives the approve/sell transactions through the sequencer.
//! Forced liquidation sells everything and skips the profitability test.

use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{I256, U256};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::model::{CloseReason, Position};
use super::store::PositionStore;
use crate::chain::abi::swapped_amount;
use crate::chain::ChainClient;
use crate::error::{Error, Result};
use crate::trading::router::SwapBuilder;
use crate::trading::sequencer::TransactionSequencer;

#[derive(Debug, Clone)]
pub struct ExitSettings {
    /// Automatic (non-forced) selling
    pub auto_sell_enabled: bool,
    /// Floor the expected proceeds have to clear
    pub min_profit: U256,
    /// Share of the remaining tokens sold per automatic sale, 1..=100
    pub sell_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SellOutcome {
    Sold {
        tokens: U256,
        proceeds: U256,
        closed: Option<CloseReason>,
    },
    BelowMinimum {
        expected: I256,
        required: I256,
    },
    /// Automatic selling is switched off
    Disabled,
    NothingToSell,
    /// Sell path failed; the position was closed as `error`
    Failed(String),
}

pub struct ExitEngine {
    chain: Arc<dyn ChainClient>,
    sequencer: Arc<TransactionSequencer>,
    store: Arc<dyn PositionStore>,
    swaps: SwapBuilder,
    settings: ExitSettings,
}

fn signed(value: U256) -> Result<I256> {
    I256::try_from(value).map_err(|_| Error::PriceOverflow)
}

impl ExitEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        sequencer: Arc<TransactionSequencer>,
        store: Arc<dyn PositionStore>,
        swaps: SwapBuilder,
        settings: ExitSettings,
    ) -> Self {
        Self {
            chain,
            sequencer,
            store,
            swaps,
            settings,
        }
    }

    pub fn swaps(&self) -> &SwapBuilder {
        &self.swaps
    }

    /// `profit_loss * pct / 100 - estimated fees`
    pub fn expected_proceeds(&self, position: &Position, pct: u8) -> Result<I256> {
        let profit_loss = position.profit_loss.unwrap_or(I256::ZERO);
        let fees = signed(self.swaps.estimated_fees())?;

        profit_loss
            .checked_mul(I256::from_raw(U256::from(pct)))
            .and_then(|v| v.checked_div(I256::from_raw(U256::from(100u64))))
            .and_then(|v| v.checked_sub(fees))
            .ok_or(Error::PriceOverflow)
    }

    /// The configured floor, raised to the best realized result so far
    pub fn required_minimum(&self, position: &Position) -> Result<I256> {
        let realized = position.sold_for.unwrap_or_default();
        signed(self.settings.min_profit.max(realized))
    }

    pub async fn sell_if_profitable(
        &self,
        position: &Position,
        liquidate_all: bool,
    ) -> Result<SellOutcome> {
        if !position.is_open() {
            return Err(Error::InvalidTransition {
                pair: position.pair,
                from: position.state().to_string(),
                to: "sell",
            });
        }
        if !liquidate_all && !self.settings.auto_sell_enabled {
            return Ok(SellOutcome::Disabled);
        }

        let pct = if liquidate_all {
            100
        } else {
            self.settings.sell_percentage
        };

        if !liquidate_all {
            let expected = self.expected_proceeds(position, pct)?;
            let required = self.required_minimum(position)?;
            if expected < required {
                debug!(
                    "Not selling {}: expected {} below required {}",
                    position.pair, expected, required
                );
                return Ok(SellOutcome::BelowMinimum { expected, required });
            }
        }

        let sell_tokens = position
            .token_remaining
            .checked_mul(U256::from(pct))
            .ok_or(Error::PriceOverflow)?
            / U256::from(100u64);
        if sell_tokens.is_zero() {
            debug!("Nothing to sell for {}", position.pair);
            return Ok(SellOutcome::NothingToSell);
        }

        match self.sell(position, sell_tokens, pct, liquidate_all).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_programming_fault() => {
                error!("Sell of {} aborted: {}", position.pair, e);
                Err(e)
            }
            Err(e) => {
                error!("Error while selling {}: {}", position.pair, e);
                let update = position.close(CloseReason::Error, Utc::now())?;
                self.store.update(position.pair, update).await?;
                Ok(SellOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn sell(
        &self,
        position: &Position,
        sell_tokens: U256,
        pct: u8,
        liquidate_all: bool,
    ) -> Result<SellOutcome> {
        let token = position.target_token(self.swaps.wrapped_native())?;

        if !position.approved {
            info!("Approving router to spend {}", token);
            self.sequencer
                .submit(&self.swaps.build_approve(token))
                .await?;
            self.store
                .update(position.pair, position.mark_approved()?)
                .await?;
        }

        let receipt = self
            .sequencer
            .submit(&self.swaps.build_sell(token, sell_tokens))
            .await?;
        let proceeds = swapped_amount(&receipt.logs)
            .ok_or_else(|| Error::SwapLogMissing(receipt.hash.to_string()))?;

        // Fee-on-transfer tokens make the computed remainder unreliable
        let remaining = match self.chain.token_balance(token).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Balance of {} unavailable after sale: {}", token, e);
                position.token_remaining.saturating_sub(sell_tokens)
            }
        };

        let closed = (pct == 100).then_some(if liquidate_all {
            CloseReason::DumpAll
        } else {
            CloseReason::SellAll
        });

        let update = position.record_sale(remaining, proceeds, closed, Utc::now())?;
        let stored = self.store.update(position.pair, update).await?;

        info!(
            "Sold {}% of {} for {} (total so far: {})",
            pct,
            token,
            format_ether(proceeds),
            format_ether(stored.sold_for.unwrap_or_default())
        );
        if let Some(reason) = closed {
            info!("Closed {} ({})", position.pair, reason);
        }

        Ok(SellOutcome::Sold {
            tokens: sell_tokens,
            proceeds,
            closed,
        })
    }
}
