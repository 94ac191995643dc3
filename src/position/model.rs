//! Position record and lifecycle state machine
//!
//! A position moves `NoPosition -> Opening -> Open -> Closed(reason)`.
//! Records are never mutated directly: each transition checks the current
//! state and produces a [`PositionUpdate`] that the store applies.

use alloy::primitives::{Address, I256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amm::NativeSide;
use crate::error::{Error, Result};

/// Why a position stopped being monitored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// Buy transaction failed
    OpenError,
    /// Sell transaction failed
    Error,
    /// Liquidity collapsed
    Rug,
    /// Full voluntary sale
    SellAll,
    /// Full forced liquidation
    DumpAll,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::OpenError => "open-error",
            CloseReason::Error => "error",
            CloseReason::Rug => "rug",
            CloseReason::SellAll => "sell-all",
            CloseReason::DumpAll => "dump-all",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    NoPosition,
    Opening,
    Open,
    Closed(CloseReason),
}

impl PositionState {
    pub fn of(position: Option<&Position>) -> Self {
        position.map_or(PositionState::NoPosition, Position::state)
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::NoPosition => f.write_str("no-position"),
            PositionState::Opening => f.write_str("opening"),
            PositionState::Open => f.write_str("open"),
            PositionState::Closed(reason) => write!(f, "closed({})", reason),
        }
    }
}

/// Persisted state of one pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub pair: Address,
    pub token0: Address,
    pub token1: Address,
    /// Native currency paid for the buy
    pub spent: U256,
    /// Tokens received from the buy
    pub got_token: U256,
    /// Tokens still held; never increases once opened
    pub token_remaining: U256,
    /// Cumulative native proceeds of all sales
    pub sold_for: Option<U256>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    /// Native side of the reserve observed at entry
    pub reserve_enter: U256,
    pub profit_loss: Option<I256>,
    pub profit_loss_checked_at: DateTime<Utc>,
    /// Router allowance already granted on-chain
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// New record for a pair about to be bought (NoPosition -> Opening)
    pub fn opening(
        pair: Address,
        token0: Address,
        token1: Address,
        reserve_enter: U256,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            pair,
            token0,
            token1,
            spent: U256::ZERO,
            got_token: U256::ZERO,
            token_remaining: U256::ZERO,
            sold_for: None,
            opened_at: None,
            closed_at: None,
            close_reason: None,
            reserve_enter,
            profit_loss: None,
            profit_loss_checked_at: now,
            approved: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> PositionState {
        if let Some(reason) = self.close_reason {
            PositionState::Closed(reason)
        } else if self.opened_at.is_some() {
            PositionState::Open
        } else {
            PositionState::Opening
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == PositionState::Open
    }

    /// Which side of the pair is the wrapped native token
    pub fn native_side(&self, wrapped_native: Address) -> Result<NativeSide> {
        NativeSide::of(self.token0, self.token1, wrapped_native).ok_or_else(|| {
            Error::Internal(format!(
                "pair {} does not contain wrapped native {}",
                self.pair, wrapped_native
            ))
        })
    }

    /// The non-native token of the pair
    pub fn target_token(&self, wrapped_native: Address) -> Result<Address> {
        Ok(self
            .native_side(wrapped_native)?
            .target_token(self.token0, self.token1))
    }

    fn require(&self, expected: PositionState, to: &'static str) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(Error::InvalidTransition {
                pair: self.pair,
                from: current.to_string(),
                to,
            });
        }
        Ok(())
    }

    /// Buy confirmed (Opening -> Open)
    pub fn mark_opened(
        &self,
        spent: U256,
        received: U256,
        now: DateTime<Utc>,
    ) -> Result<PositionUpdate> {
        self.require(PositionState::Opening, "open")?;
        Ok(PositionUpdate {
            spent: Some(spent),
            got_token: Some(received),
            token_remaining: Some(received),
            opened_at: Some(now),
            ..Default::default()
        })
    }

    /// Buy failed (Opening -> Closed(open-error))
    pub fn mark_open_failed(&self, now: DateTime<Utc>) -> Result<PositionUpdate> {
        self.require(PositionState::Opening, "closed(open-error)")?;
        Ok(PositionUpdate::closing(CloseReason::OpenError, now))
    }

    /// Router allowance confirmed (Open -> Open)
    pub fn mark_approved(&self) -> Result<PositionUpdate> {
        self.require(PositionState::Open, "open")?;
        Ok(PositionUpdate {
            approved: Some(true),
            ..Default::default()
        })
    }

    /// Sale confirmed; `close` is set for a full sale (Open -> Open | Closed)
    pub fn record_sale(
        &self,
        remaining: U256,
        proceeds: U256,
        close: Option<CloseReason>,
        now: DateTime<Utc>,
    ) -> Result<PositionUpdate> {
        let to = match close {
            None => "open",
            Some(CloseReason::SellAll) => "closed(sell-all)",
            Some(CloseReason::DumpAll) => "closed(dump-all)",
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "a sale can only close as sell-all or dump-all".into(),
                ))
            }
        };
        self.require(PositionState::Open, to)?;

        let sold_for = self
            .sold_for
            .unwrap_or_default()
            .checked_add(proceeds)
            .ok_or(Error::PriceOverflow)?;

        let mut update = PositionUpdate {
            token_remaining: Some(remaining.min(self.token_remaining)),
            sold_for: Some(sold_for),
            approved: Some(true),
            ..Default::default()
        };
        if let Some(reason) = close {
            update.closed_at = Some(now);
            update.close_reason = Some(reason);
        }
        Ok(update)
    }

    /// Fresh valuation from the monitor (Open -> Open)
    pub fn refresh_profit_loss(
        &self,
        profit_loss: I256,
        balance: U256,
        now: DateTime<Utc>,
    ) -> Result<PositionUpdate> {
        self.require(PositionState::Open, "open")?;
        Ok(PositionUpdate {
            profit_loss: Some(profit_loss),
            profit_loss_checked_at: Some(now),
            token_remaining: Some(balance.min(self.token_remaining)),
            ..Default::default()
        })
    }

    /// Close an open position as `rug` or `error`
    pub fn close(&self, reason: CloseReason, now: DateTime<Utc>) -> Result<PositionUpdate> {
        if !matches!(reason, CloseReason::Rug | CloseReason::Error) {
            return Err(Error::InvalidArgument(format!(
                "{} is not a direct close reason",
                reason
            )));
        }
        self.require(PositionState::Open, "closed")?;
        Ok(PositionUpdate::closing(reason, now))
    }
}

/// Partial set of fields written by a transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionUpdate {
    pub spent: Option<U256>,
    pub got_token: Option<U256>,
    pub token_remaining: Option<U256>,
    pub sold_for: Option<U256>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub profit_loss: Option<I256>,
    pub profit_loss_checked_at: Option<DateTime<Utc>>,
    pub approved: Option<bool>,
}

impl PositionUpdate {
    fn closing(reason: CloseReason, now: DateTime<Utc>) -> Self {
        Self {
            closed_at: Some(now),
            close_reason: Some(reason),
            ..Default::default()
        }
    }

    /// Merge two updates, `other` wins on overlapping fields
    pub fn merge(mut self, other: PositionUpdate) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            spent,
            got_token,
            token_remaining,
            sold_for,
            opened_at,
            closed_at,
            close_reason,
            profit_loss,
            profit_loss_checked_at,
            approved
        );
        self
    }

    /// Write the update onto the stored record.
    ///
    /// Closed records are terminal, and `token_remaining` may not grow once
    /// the position is open.
    pub fn apply(&self, position: &mut Position, now: DateTime<Utc>) -> Result<()> {
        if let PositionState::Closed(reason) = position.state() {
            return Err(Error::InvalidTransition {
                pair: position.pair,
                from: PositionState::Closed(reason).to_string(),
                to: "update",
            });
        }
        if self.closed_at.is_some() != self.close_reason.is_some() {
            return Err(Error::InvalidArgument(
                "closed_at and close_reason must be set together".into(),
            ));
        }
        if let (Some(remaining), Some(_)) = (self.token_remaining, position.opened_at) {
            if remaining > position.token_remaining {
                return Err(Error::InvalidArgument(format!(
                    "token_remaining of {} may not increase ({} -> {})",
                    position.pair, position.token_remaining, remaining
                )));
            }
        }

        if let Some(v) = self.spent {
            position.spent = v;
        }
        if let Some(v) = self.got_token {
            position.got_token = v;
        }
        if let Some(v) = self.token_remaining {
            position.token_remaining = v;
        }
        if let Some(v) = self.sold_for {
            position.sold_for = Some(v);
        }
        if let Some(v) = self.opened_at {
            position.opened_at = Some(v);
        }
        if let Some(v) = self.closed_at {
            position.closed_at = Some(v);
        }
        if let Some(v) = self.close_reason {
            position.close_reason = Some(v);
        }
        if let Some(v) = self.profit_loss {
            position.profit_loss = Some(v);
        }
        if let Some(v) = self.profit_loss_checked_at {
            position.profit_loss_checked_at = v;
        }
        if let Some(v) = self.approved {
            position.approved = v;
        }
        position.updated_at = now;

        Ok(())
    }
}
