//! Router call building for swaps and approvals

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::chain::abi::{IPancakeRouter, IERC20};
use crate::chain::CallRequest;

/// Gas limit attached to an `approve` (also its fee estimate)
pub const APPROVE_GAS: u64 = 150_000;

/// Gas limit attached to a router swap (also its fee estimate)
pub const SWAP_GAS: u64 = 500_000;

/// Worst-case fee of an approve plus a swap at `gas_price`
pub fn estimated_fees(gas_price: u128) -> U256 {
    U256::from(APPROVE_GAS + SWAP_GAS) * U256::from(gas_price)
}

/// Builds unsigned router and token calls for one account
#[derive(Debug, Clone)]
pub struct SwapBuilder {
    router: Address,
    wrapped_native: Address,
    recipient: Address,
    gas_price: u128,
    deadline: Duration,
}

impl SwapBuilder {
    pub fn new(
        router: Address,
        wrapped_native: Address,
        recipient: Address,
        gas_price: u128,
        deadline: Duration,
    ) -> Self {
        Self {
            router,
            wrapped_native,
            recipient,
            gas_price,
            deadline,
        }
    }

    pub fn wrapped_native(&self) -> Address {
        self.wrapped_native
    }

    pub fn gas_price(&self) -> u128 {
        self.gas_price
    }

    pub fn estimated_fees(&self) -> U256 {
        estimated_fees(self.gas_price)
    }

    fn deadline(&self) -> U256 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        U256::from(now + self.deadline.as_secs())
    }

    /// Swap exactly `amount_in` native currency for `token`
    pub fn build_buy(&self, token: Address, amount_in: U256) -> CallRequest {
        let call = IPancakeRouter::swapExactETHForTokensCall {
            amountOutMin: U256::ZERO,
            path: vec![self.wrapped_native, token],
            to: self.recipient,
            deadline: self.deadline(),
        };

        CallRequest {
            to: self.router,
            gas_limit: SWAP_GAS,
            gas_price: self.gas_price,
            data: Bytes::from(call.abi_encode()),
            value: amount_in,
        }
    }

    /// Swap exactly `amount_in` of `token` for native currency
    pub fn build_sell(&self, token: Address, amount_in: U256) -> CallRequest {
        let call = IPancakeRouter::swapExactTokensForETHSupportingFeeOnTransferTokensCall {
            amountIn: amount_in,
            amountOutMin: U256::ZERO,
            path: vec![token, self.wrapped_native],
            to: self.recipient,
            deadline: self.deadline(),
        };

        CallRequest {
            to: self.router,
            gas_limit: SWAP_GAS,
            gas_price: self.gas_price,
            data: Bytes::from(call.abi_encode()),
            value: U256::ZERO,
        }
    }

    /// Unlimited router allowance for `token`
    pub fn build_approve(&self, token: Address) -> CallRequest {
        let call = IERC20::approveCall {
            spender: self.router,
            value: U256::MAX,
        };

        CallRequest {
            to: token,
            gas_limit: APPROVE_GAS,
            gas_price: self.gas_price,
            data: Bytes::from(call.abi_encode()),
            value: U256::ZERO,
        }
    }
}
