//! Chain access
//!
//! Everything the bot needs from the node sits behind [`ChainClient`]:
//! balance and reserve reads, the account nonce, signed broadcast and
//! receipt polling, and log subscriptions. The production implementation is
//! [`rpc::RpcChainClient`]; tests run against `mock::MockChain`.

pub mod abi;
pub mod rpc;

#[cfg(test)]
pub(crate) mod mock;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::amm::Reserve;
use crate::error::Result;

pub use rpc::RpcChainClient;

/// Unsigned call descriptor handed to the sequencer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Bytes,
    pub value: U256,
}

/// A log entry as delivered by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Confirmed transaction
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub hash: B256,
    pub success: bool,
    pub logs: Vec<RawLog>,
}

/// Live stream of logs from a subscription
pub type LogStream = BoxStream<'static, RawLog>;

/// Broadcast rejected by the node before it produced a transaction hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub message: String,
}

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> SendErrorKind {
        SendErrorKind::classify(&self.message)
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// How the sequencer reacts to a rejected broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Our nonce is behind the chain (another sender used the account)
    NonceTooLow,
    /// Balance can't cover gas * price + value; the nonce slot is unused
    InsufficientFunds,
    Other,
}

impl SendErrorKind {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("nonce too low") {
            SendErrorKind::NonceTooLow
        } else if lower.contains("insufficient funds for gas") {
            SendErrorKind::InsufficientFunds
        } else {
            SendErrorKind::Other
        }
    }
}

/// Node operations used by the bot
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the signing account
    fn account(&self) -> Address;

    /// Native currency balance of the signing account
    async fn native_balance(&self) -> Result<U256>;

    /// ERC-20 balance of the signing account
    async fn token_balance(&self, token: Address) -> Result<U256>;

    async fn get_reserves(&self, pair: Address) -> Result<Reserve>;

    /// Authoritative transaction count (pending) of the signing account
    async fn transaction_count(&self) -> Result<u64>;

    /// Sign `call` with `nonce` and broadcast it.
    ///
    /// `Ok` carries the hash once the node accepted the transaction.
    async fn broadcast(&self, call: &CallRequest, nonce: u64) -> std::result::Result<B256, SendError>;

    /// Wait until an accepted transaction is mined
    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt>;

    /// Subscribe to logs emitted by `address` with the given first topic
    async fn subscribe_logs(&self, address: Address, topic0: B256) -> Result<LogStream>;
}
