//! Reserve snapshots and pair orientation

use alloy::primitives::{Address, U256};

use super::price::TradeInput;

/// Pool balances of a pair at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserve {
    pub reserve0: U256,
    pub reserve1: U256,
}

impl Reserve {
    pub fn new(reserve0: U256, reserve1: U256) -> Self {
        Self { reserve0, reserve1 }
    }

    /// Both sides drained (or the pair was never funded)
    pub fn is_empty(&self) -> bool {
        self.reserve0.is_zero() && self.reserve1.is_zero()
    }
}

/// Which side of a pair holds the wrapped native currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeSide {
    Token0,
    Token1,
}

impl NativeSide {
    /// Orientation of a pair, `None` when neither token is the wrapped native one
    pub fn of(token0: Address, token1: Address, wrapped_native: Address) -> Option<Self> {
        if token0 == wrapped_native {
            Some(NativeSide::Token0)
        } else if token1 == wrapped_native {
            Some(NativeSide::Token1)
        } else {
            None
        }
    }

    /// The non-native token of the pair
    pub fn target_token(&self, token0: Address, token1: Address) -> Address {
        match self {
            NativeSide::Token0 => token1,
            NativeSide::Token1 => token0,
        }
    }

    pub fn native_reserve(&self, reserve: &Reserve) -> U256 {
        match self {
            NativeSide::Token0 => reserve.reserve0,
            NativeSide::Token1 => reserve.reserve1,
        }
    }

    pub fn token_reserve(&self, reserve: &Reserve) -> U256 {
        match self {
            NativeSide::Token0 => reserve.reserve1,
            NativeSide::Token1 => reserve.reserve0,
        }
    }

    /// Input for selling `amount` target tokens into native currency
    pub fn sell_input(&self, amount: U256) -> TradeInput {
        match self {
            NativeSide::Token0 => TradeInput::Token1In(amount),
            NativeSide::Token1 => TradeInput::Token0In(amount),
        }
    }

    /// Input for buying target tokens with `amount` native currency
    pub fn buy_input(&self, amount: U256) -> TradeInput {
        match self {
            NativeSide::Token0 => TradeInput::Token0In(amount),
            NativeSide::Token1 => TradeInput::Token1In(amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_side_orientation() {
        let wrapped = Address::repeat_byte(0xbb);
        let token = Address::repeat_byte(0x11);

        assert_eq!(NativeSide::of(wrapped, token, wrapped), Some(NativeSide::Token0));
        assert_eq!(NativeSide::of(token, wrapped, wrapped), Some(NativeSide::Token1));
        assert_eq!(NativeSide::of(token, Address::repeat_byte(0x22), wrapped), None);

        assert_eq!(NativeSide::Token0.target_token(wrapped, token), token);
        assert_eq!(NativeSide::Token1.target_token(token, wrapped), token);
    }

    #[test]
    fn test_reserve_sides() {
        let reserve = Reserve::new(U256::from(5u64), U256::from(9u64));

        assert_eq!(NativeSide::Token0.native_reserve(&reserve), U256::from(5u64));
        assert_eq!(NativeSide::Token0.token_reserve(&reserve), U256::from(9u64));
        assert_eq!(NativeSide::Token1.native_reserve(&reserve), U256::from(9u64));
        assert!(!reserve.is_empty());
        assert!(Reserve::new(U256::ZERO, U256::ZERO).is_empty());
    }
}
