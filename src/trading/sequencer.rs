//! Nonce-sequenced transaction submission
//!
//! The sequencer is the only component that assigns nonces for the signing
//! account. The counter is guarded by an async mutex that is held from the
//! moment a nonce is picked until the node has either accepted or rejected
//! the broadcast, so two flows can never compute the same "next" value.
//! Confirmation is awaited after the lock is released.

use std::sync::Arc;

use alloy::primitives::B256;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chain::{CallRequest, ChainClient, SendErrorKind, TxReceipt};
use crate::error::{Error, Result};

/// Bounded correction policy for stale nonces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-syncs allowed for a single submission before giving up
    pub max_resyncs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_resyncs: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_resyncs: u32) -> Self {
        Self { max_resyncs }
    }

    pub fn allows_resync(&self, done: u32) -> bool {
        done < self.max_resyncs
    }
}

pub struct TransactionSequencer {
    chain: Arc<dyn ChainClient>,
    /// Next nonce to hand out; `None` until first read from the chain
    next_nonce: Mutex<Option<u64>>,
    policy: RetryPolicy,
}

impl TransactionSequencer {
    pub fn new(chain: Arc<dyn ChainClient>, policy: RetryPolicy) -> Self {
        Self {
            chain,
            next_nonce: Mutex::new(None),
            policy,
        }
    }

    /// Submit a call and wait for it to be mined
    pub async fn submit(&self, call: &CallRequest) -> Result<TxReceipt> {
        let hash = self.broadcast(call).await?;

        let receipt = self.chain.wait_for_receipt(hash).await?;
        if !receipt.success {
            return Err(Error::TransactionReverted(hash.to_string()));
        }

        debug!("Transaction {} confirmed with {} logs", hash, receipt.logs.len());
        Ok(receipt)
    }

    /// Re-read the authoritative nonce from the chain
    pub async fn resync(&self) -> Result<u64> {
        let mut next = self.next_nonce.lock().await;
        let fresh = self.chain.transaction_count().await?;
        *next = Some(fresh);
        info!("Nonce re-synced to {}", fresh);
        Ok(fresh)
    }

    /// Nonce the next submission will carry, if already known
    pub async fn peek(&self) -> Option<u64> {
        *self.next_nonce.lock().await
    }

    async fn broadcast(&self, call: &CallRequest) -> Result<B256> {
        let mut next = self.next_nonce.lock().await;
        let mut resyncs = 0u32;

        let mut nonce = match *next {
            Some(nonce) => nonce,
            None => self.chain.transaction_count().await?,
        };

        loop {
            // Optimistic increment, undone only when the slot was never consumed
            *next = Some(nonce + 1);

            let err = match self.chain.broadcast(call, nonce).await {
                Ok(hash) => {
                    info!("Sent transaction {} to {} with nonce {}", hash, call.to, nonce);
                    return Ok(hash);
                }
                Err(err) => err,
            };

            match err.kind() {
                SendErrorKind::InsufficientFunds => {
                    *next = Some(nonce);
                    warn!("Insufficient funds for gas at nonce {}, slot released", nonce);
                    return Err(Error::InsufficientFunds(err.message));
                }
                SendErrorKind::NonceTooLow => {
                    if !self.policy.allows_resync(resyncs) {
                        error!(
                            "Nonce {} still too low after {} re-syncs, giving up",
                            nonce, resyncs
                        );
                        return Err(Error::NonceResyncExhausted { attempts: resyncs });
                    }
                    resyncs += 1;

                    let fresh = self.chain.transaction_count().await?;
                    // Never reuse the stale value, even if the node lags behind
                    let corrected = fresh.max(nonce + 1);
                    warn!(
                        "Nonce {} too low, chain reports {}, retrying with {}",
                        nonce, fresh, corrected
                    );
                    nonce = corrected;
                }
                SendErrorKind::Other => {
                    error!("Broadcast with nonce {} failed: {}", nonce, err);
                    return Err(Error::TransactionSend(err.message));
                }
            }
        }
    }
}
