//! Entry engine
//!
//! Opens a position on a freshly created pair: safety check, duplicate
//! guard, record creation, then a fixed-size buy through the sequencer.

use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::router::SwapBuilder;
use super::sequencer::TransactionSequencer;
use crate::amm::{NativeSide, Reserve};
use crate::chain::abi::swapped_amount;
use crate::error::{Error, Result};
use crate::position::model::Position;
use crate::position::store::PositionStore;
use crate::safety::{SafetyVerdict, TokenSafetyOracle};

/// A new pair that passed the watcher's filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCandidate {
    pub pair: Address,
    pub token0: Address,
    pub token1: Address,
    pub native_side: NativeSide,
    pub reserve: Reserve,
}

impl PairCandidate {
    pub fn target_token(&self) -> Address {
        self.native_side.target_token(self.token0, self.token1)
    }

    pub fn native_reserve(&self) -> U256 {
        self.native_side.native_reserve(&self.reserve)
    }
}

#[derive(Debug, Clone)]
pub struct EntrySettings {
    /// Native amount spent on every buy
    pub buy_in: U256,
    /// Buy tokens whose source could not be verified
    pub allow_unverified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Opened { received: U256 },
    Rejected(String),
    AlreadyTracked,
    /// Buy failed; the position was closed as `open-error`
    Failed(String),
}

pub struct EntryEngine {
    sequencer: Arc<TransactionSequencer>,
    store: Arc<dyn PositionStore>,
    oracle: Arc<dyn TokenSafetyOracle>,
    swaps: SwapBuilder,
    settings: EntrySettings,
}

impl EntryEngine {
    pub fn new(
        sequencer: Arc<TransactionSequencer>,
        store: Arc<dyn PositionStore>,
        oracle: Arc<dyn TokenSafetyOracle>,
        swaps: SwapBuilder,
        settings: EntrySettings,
    ) -> Self {
        Self {
            sequencer,
            store,
            oracle,
            swaps,
            settings,
        }
    }

    pub async fn enter(&self, candidate: PairCandidate) -> Result<EntryOutcome> {
        let pair = candidate.pair;
        let token = candidate.target_token();

        match self.oracle.check(token).await {
            SafetyVerdict::Pass => {}
            SafetyVerdict::Unverified if self.settings.allow_unverified => {
                debug!("{} is unverified, allowed by configuration", token);
            }
            SafetyVerdict::Unverified => {
                info!("{} not verified, skipping {}", token, pair);
                return Ok(EntryOutcome::Rejected("unverified".into()));
            }
            SafetyVerdict::Fail(reason) => {
                info!("{} failed the safety check: {}", token, reason);
                return Ok(EntryOutcome::Rejected(reason));
            }
        }

        // Fast path only; the store's unique constraint is the real guard
        if self.store.find_by_pair(pair).await?.is_some() {
            debug!("Position for {} already exists", pair);
            return Ok(EntryOutcome::AlreadyTracked);
        }

        let now = Utc::now();
        let record = Position::opening(
            pair,
            candidate.token0,
            candidate.token1,
            candidate.native_reserve(),
            now,
        );
        let position = match self.store.create(record).await {
            Ok(position) => position,
            Err(Error::PositionExists(_)) => {
                debug!("Lost the race to open {}", pair);
                return Ok(EntryOutcome::AlreadyTracked);
            }
            Err(e) => return Err(e),
        };

        info!(
            "Buying {} of {} on {}",
            format_ether(self.settings.buy_in),
            token,
            pair
        );

        let call = self.swaps.build_buy(token, self.settings.buy_in);
        let bought = self.sequencer.submit(&call).await.and_then(|receipt| {
            swapped_amount(&receipt.logs).ok_or_else(|| Error::SwapLogMissing(receipt.hash.to_string()))
        });

        match bought {
            Ok(received) => {
                let update = position.mark_opened(self.settings.buy_in, received, Utc::now())?;
                self.store.update(pair, update).await?;
                info!("Opened {}: got {} of {}", pair, received, token);
                Ok(EntryOutcome::Opened { received })
            }
            Err(e) => {
                if matches!(e, Error::InsufficientFunds(_)) {
                    warn!("Insufficient funds to buy into {}", pair);
                }
                error!("Buy of {} failed: {}", pair, e);
                let update = position.mark_open_failed(Utc::now())?;
                self.store.update(pair, update).await?;
                Ok(EntryOutcome::Failed(e.to_string()))
            }
        }
    }
}
