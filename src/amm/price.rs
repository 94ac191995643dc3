//! Constant-product pricing with a basis-point fee
//!
//! Mirrors the router's `getAmountOut`: integer math, floor division,
//! overflow is an error rather than a wrap.

use alloy::primitives::U256;

use super::reserve::Reserve;
use crate::error::{Error, Result};

/// Basis-point denominator used by the fee multiplier
pub const FEE_DENOMINATOR: u64 = 10_000;

/// Share of the input kept after the 0.25% pool fee
pub const DEFAULT_FEE_MULTIPLIER: u64 = 9_975;

/// Which side of the pool receives the input amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeInput {
    Token0In(U256),
    Token1In(U256),
}

impl TradeInput {
    /// Build an input from a pair of per-side amounts.
    ///
    /// Exactly one side must be positive.
    pub fn from_amounts(token0_in: U256, token1_in: U256) -> Result<Self> {
        match (token0_in.is_zero(), token1_in.is_zero()) {
            (false, true) => Ok(TradeInput::Token0In(token0_in)),
            (true, false) => Ok(TradeInput::Token1In(token1_in)),
            (true, true) => Err(Error::InvalidArgument(
                "one of the input amounts has to be non-zero".into(),
            )),
            (false, false) => Err(Error::InvalidArgument(
                "only one input side may be non-zero".into(),
            )),
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            TradeInput::Token0In(amount) | TradeInput::Token1In(amount) => *amount,
        }
    }
}

/// Amount received for `input`, after the fee, floored
pub fn get_amount_out(reserve: &Reserve, input: TradeInput, fee_multiplier: u64) -> Result<U256> {
    let (amount_in, reserve_in, reserve_out) = match input {
        TradeInput::Token0In(amount) => (amount, reserve.reserve0, reserve.reserve1),
        TradeInput::Token1In(amount) => (amount, reserve.reserve1, reserve.reserve0),
    };

    if amount_in.is_zero() {
        return Err(Error::InvalidArgument(
            "one of the input amounts has to be non-zero".into(),
        ));
    }
    if fee_multiplier == 0 || fee_multiplier > FEE_DENOMINATOR {
        return Err(Error::InvalidArgument(format!(
            "fee multiplier {} outside 1..={}",
            fee_multiplier, FEE_DENOMINATOR
        )));
    }

    let amount_in_with_fee = amount_in
        .checked_mul(U256::from(fee_multiplier))
        .ok_or(Error::PriceOverflow)?;
    let numerator = amount_in_with_fee
        .checked_mul(reserve_out)
        .ok_or(Error::PriceOverflow)?;
    let denominator = reserve_in
        .checked_mul(U256::from(FEE_DENOMINATOR))
        .and_then(|scaled| scaled.checked_add(amount_in_with_fee))
        .ok_or(Error::PriceOverflow)?;

    // denominator >= amount_in_with_fee > 0
    Ok(numerator / denominator)
}

/// Reserve the pool would hold after swapping `input` (what-if only)
pub fn projected_new_reserve(
    reserve: &Reserve,
    input: TradeInput,
    fee_multiplier: u64,
) -> Result<Reserve> {
    let out = get_amount_out(reserve, input, fee_multiplier)?;

    let projected = match input {
        TradeInput::Token0In(amount) => Reserve::new(
            reserve.reserve0.checked_add(amount).ok_or(Error::PriceOverflow)?,
            reserve.reserve1.checked_sub(out).ok_or(Error::PriceOverflow)?,
        ),
        TradeInput::Token1In(amount) => Reserve::new(
            reserve.reserve0.checked_sub(out).ok_or(Error::PriceOverflow)?,
            reserve.reserve1.checked_add(amount).ok_or(Error::PriceOverflow)?,
        ),
    };

    Ok(projected)
}
