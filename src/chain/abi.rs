//! Contract interfaces and event decoding for V2-style factories and pairs

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;

use super::RawLog;
use crate::error::{Error, Result};

sol! {
    #[sol(rpc)]
    interface IPancakeFactory {
        event PairCreated(address indexed token0, address indexed token1, address pair, uint256 allPairsLength);
    }

    #[sol(rpc)]
    interface IPancakePair {
        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );

        // uint112 on-chain; decoded wide so no narrowing conversions are needed
        function getReserves() external view returns (uint256 reserve0, uint256 reserve1, uint32 blockTimestampLast);
    }

    #[sol(rpc)]
    interface IPancakeRouter {
        function swapExactETHForTokens(uint256 amountOutMin, address[] calldata path, address to, uint256 deadline) external payable returns (uint256[] memory amounts);
        function swapExactTokensForETHSupportingFeeOnTransferTokens(uint256 amountIn, uint256 amountOutMin, address[] calldata path, address to, uint256 deadline) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
    }
}

/// Topic of the factory's `PairCreated` event
pub const PAIR_CREATED_TOPIC: B256 = IPancakeFactory::PairCreated::SIGNATURE_HASH;

/// Topic of the pair's `Swap` event
pub const SWAP_TOPIC: B256 = IPancakePair::Swap::SIGNATURE_HASH;

/// Decoded `PairCreated` log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCreated {
    pub token0: Address,
    pub token1: Address,
    pub pair: Address,
}

impl PairCreated {
    pub fn decode(log: &RawLog) -> Result<Self> {
        if log.topics.first() != Some(&PAIR_CREATED_TOPIC) {
            return Err(Error::LogDecode("not a PairCreated log".into()));
        }
        if log.topics.len() < 3 {
            return Err(Error::LogDecode(format!(
                "PairCreated needs 3 topics, got {}",
                log.topics.len()
            )));
        }
        if log.data.len() < 32 {
            return Err(Error::LogDecode(format!(
                "PairCreated data too short: {} bytes",
                log.data.len()
            )));
        }

        Ok(Self {
            token0: Address::from_word(log.topics[1]),
            token1: Address::from_word(log.topics[2]),
            pair: Address::from_word(B256::from_slice(&log.data[..32])),
        })
    }
}

/// Output amount of the last `Swap` event in a receipt's logs.
///
/// For each swap the output is `amount0Out` when `amount0In` is zero,
/// `amount1Out` otherwise.
pub fn swapped_amount(logs: &[RawLog]) -> Option<U256> {
    let mut swapped = None;

    for log in logs {
        if log.topics.first() != Some(&SWAP_TOPIC) || log.data.len() < 128 {
            continue;
        }
        let word = |i: usize| U256::from_be_slice(&log.data[i * 32..(i + 1) * 32]);
        let (amount0_in, amount0_out, amount1_out) = (word(0), word(2), word(3));

        swapped = Some(if amount0_in.is_zero() {
            amount0_out
        } else {
            amount1_out
        });
    }

    swapped
}

#[cfg(test)]
pub(crate) mod test_logs {
    use super::*;
    use alloy::primitives::Bytes;

    pub fn pair_created(token0: Address, token1: Address, pair: Address) -> RawLog {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(pair.into_word().as_slice());
        data.extend_from_slice(&U256::from(1u64).to_be_bytes::<32>());
        RawLog {
            address: Address::repeat_byte(0xfa),
            topics: vec![PAIR_CREATED_TOPIC, token0.into_word(), token1.into_word()],
            data: Bytes::from(data),
        }
    }

    pub fn swap(amount0_in: U256, amount1_in: U256, amount0_out: U256, amount1_out: U256) -> RawLog {
        let mut data = Vec::with_capacity(128);
        for word in [amount0_in, amount1_in, amount0_out, amount1_out] {
            data.extend_from_slice(&word.to_be_bytes::<32>());
        }
        RawLog {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                SWAP_TOPIC,
                Address::repeat_byte(0x01).into_word(),
                Address::repeat_byte(0x02).into_word(),
            ],
            data: Bytes::from(data),
        }
    }
}
