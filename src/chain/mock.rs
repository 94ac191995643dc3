//! Scriptable in-memory chain for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::StreamExt;

use super::abi::{test_logs, IERC20};
use super::{CallRequest, ChainClient, LogStream, RawLog, SendError, TxReceipt};
use crate::amm::Reserve;
use crate::error::{Error, Result};

#[derive(Default)]
struct MockState {
    native_balance: U256,
    token_balances: HashMap<Address, U256>,
    reserves: HashMap<Address, Reserve>,
    tx_count: u64,
    count_reads: u32,
    /// Errors returned by the next broadcasts, in order
    send_errors: VecDeque<String>,
    /// Output amounts reported by the Swap log of the next swaps
    swap_outputs: VecDeque<U256>,
    revert_next: bool,
    /// Token balances applied after the next swap confirms
    balance_after_swap: Option<(Address, U256)>,
    broadcasts: Vec<(CallRequest, u64)>,
    receipts: HashMap<B256, TxReceipt>,
    receipt_delay: Option<Duration>,
    pair_logs: Vec<RawLog>,
}

pub struct MockChain {
    account: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            account: Address::repeat_byte(0xac),
            state: Mutex::new(MockState::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_native_balance(&self, balance: U256) {
        self.with(|s| s.native_balance = balance);
    }

    pub fn set_token_balance(&self, token: Address, balance: U256) {
        self.with(|s| {
            s.token_balances.insert(token, balance);
        });
    }

    pub fn set_reserves(&self, pair: Address, reserve: Reserve) {
        self.with(|s| {
            s.reserves.insert(pair, reserve);
        });
    }

    pub fn set_tx_count(&self, count: u64) {
        self.with(|s| s.tx_count = count);
    }

    pub fn push_send_error(&self, message: &str) {
        self.with(|s| s.send_errors.push_back(message.to_string()));
    }

    pub fn push_swap_output(&self, amount: U256) {
        self.with(|s| s.swap_outputs.push_back(amount));
    }

    pub fn revert_next(&self) {
        self.with(|s| s.revert_next = true);
    }

    pub fn set_balance_after_swap(&self, token: Address, balance: U256) {
        self.with(|s| s.balance_after_swap = Some((token, balance)));
    }

    /// Hold every receipt lookup for `delay`
    pub fn set_receipt_delay(&self, delay: Duration) {
        self.with(|s| s.receipt_delay = Some(delay));
    }

    pub fn push_pair_log(&self, log: RawLog) {
        self.with(|s| s.pair_logs.push(log));
    }

    /// Every broadcast attempt with the nonce it carried
    pub fn broadcasts(&self) -> Vec<(CallRequest, u64)> {
        self.with(|s| s.broadcasts.clone())
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.with(|s| s.broadcasts.iter().map(|(_, nonce)| *nonce).collect())
    }

    pub fn count_reads(&self) -> u32 {
        self.with(|s| s.count_reads)
    }

    pub fn approvals(&self) -> usize {
        self.with(|s| {
            s.broadcasts
                .iter()
                .filter(|(call, _)| is_approve(call))
                .count()
        })
    }
}

fn is_approve(call: &CallRequest) -> bool {
    call.data.len() >= 4 && call.data[..4] == IERC20::approveCall::SELECTOR
}

#[async_trait]
impl ChainClient for MockChain {
    fn account(&self) -> Address {
        self.account
    }

    async fn native_balance(&self) -> Result<U256> {
        Ok(self.with(|s| s.native_balance))
    }

    async fn token_balance(&self, token: Address) -> Result<U256> {
        Ok(self.with(|s| s.token_balances.get(&token).copied().unwrap_or_default()))
    }

    async fn get_reserves(&self, pair: Address) -> Result<Reserve> {
        self.with(|s| s.reserves.get(&pair).copied())
            .ok_or_else(|| Error::Rpc(format!("no reserves for {}", pair)))
    }

    async fn transaction_count(&self) -> Result<u64> {
        Ok(self.with(|s| {
            s.count_reads += 1;
            s.tx_count
        }))
    }

    async fn broadcast(&self, call: &CallRequest, nonce: u64) -> std::result::Result<B256, SendError> {
        self.with(|s| {
            s.broadcasts.push((call.clone(), nonce));

            if let Some(message) = s.send_errors.pop_front() {
                return Err(SendError::new(message));
            }

            let hash = B256::left_padding_from(&(s.broadcasts.len() as u64).to_be_bytes());
            let success = !std::mem::take(&mut s.revert_next);

            let mut logs = Vec::new();
            if success && !is_approve(call) {
                let out = s.swap_outputs.pop_front().unwrap_or(U256::from(1u64));
                logs.push(test_logs::swap(U256::ZERO, U256::from(1u64), out, U256::ZERO));
                if let Some((token, balance)) = s.balance_after_swap.take() {
                    s.token_balances.insert(token, balance);
                }
            }

            s.tx_count = s.tx_count.max(nonce + 1);
            s.receipts.insert(hash, TxReceipt { hash, success, logs });
            Ok(hash)
        })
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt> {
        if let Some(delay) = self.with(|s| s.receipt_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| s.receipts.get(&hash).cloned())
            .ok_or_else(|| Error::ReceiptTimeout {
                hash: hash.to_string(),
                secs: 0,
            })
    }

    async fn subscribe_logs(&self, _address: Address, _topic0: B256) -> Result<LogStream> {
        let logs = self.with(|s| std::mem::take(&mut s.pair_logs));
        Ok(futures::stream::iter(logs).boxed())
    }
}
