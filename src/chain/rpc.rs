//! WebSocket JSON-RPC implementation of [`ChainClient`]

use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, TxSignerSync};
use alloy::primitives::{Address, TxKind, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::abi::{IPancakePair, IERC20};
use super::{CallRequest, ChainClient, LogStream, RawLog, SendError, TxReceipt};
use crate::amm::Reserve;
use crate::error::{Error, Result};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        RawLog {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        }
    }
}

/// Chain client over a single WebSocket provider and a local signer
pub struct RpcChainClient {
    provider: RootProvider<Ethereum>,
    signer: PrivateKeySigner,
    chain_id: u64,
    receipt_timeout: Duration,
}

impl RpcChainClient {
    /// Connect to `ws_url` and read the chain id
    pub async fn connect(
        ws_url: &str,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
    ) -> Result<Self> {
        let provider = RootProvider::<Ethereum>::connect(ws_url)
            .await
            .map_err(|e| Error::RpcConnection(format!("{}: {}", ws_url, e)))?;

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| Error::RpcConnection(e.to_string()))?;

        info!(
            "Connected to chain {} as {}",
            chain_id,
            signer.address()
        );

        Ok(Self {
            provider,
            signer,
            chain_id,
            receipt_timeout,
        })
    }

    /// [`connect`](Self::connect) with exponential backoff on transport errors
    pub async fn connect_with_retry(
        ws_url: &str,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
        max_elapsed: Duration,
    ) -> Result<Self> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(max_elapsed),
            ..Default::default()
        };

        retry(backoff, || {
            let signer = signer.clone();
            async move {
                match Self::connect(ws_url, signer, receipt_timeout).await {
                    Ok(client) => Ok(client),
                    Err(e) if e.is_retryable() => {
                        warn!("Retryable connection error: {}", e);
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    fn sign(&self, call: &CallRequest, nonce: u64) -> std::result::Result<Vec<u8>, SendError> {
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: call.gas_price,
            gas_limit: call.gas_limit,
            to: TxKind::Call(call.to),
            value: call.value,
            input: call.data.clone(),
        };

        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| SendError::new(format!("signing failed: {}", e)))?;

        let envelope: TxEnvelope = tx.into_signed(signature).into();
        Ok(envelope.encoded_2718())
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn account(&self) -> Address {
        self.signer.address()
    }

    async fn native_balance(&self) -> Result<U256> {
        self.provider
            .get_balance(self.account())
            .await
            .map_err(|e| Error::Rpc(e.to_string()))
    }

    async fn token_balance(&self, token: Address) -> Result<U256> {
        IERC20::new(token, self.provider.clone())
            .balanceOf(self.account())
            .call()
            .await
            .map_err(|e| Error::Rpc(format!("balanceOf({}): {}", token, e)))
    }

    async fn get_reserves(&self, pair: Address) -> Result<Reserve> {
        let reserves = IPancakePair::new(pair, self.provider.clone())
            .getReserves()
            .call()
            .await
            .map_err(|e| Error::Rpc(format!("getReserves({}): {}", pair, e)))?;

        Ok(Reserve::new(reserves.reserve0, reserves.reserve1))
    }

    async fn transaction_count(&self) -> Result<u64> {
        self.provider
            .get_transaction_count(self.account())
            .pending()
            .await
            .map_err(|e| Error::Rpc(e.to_string()))
    }

    async fn broadcast(&self, call: &CallRequest, nonce: u64) -> std::result::Result<B256, SendError> {
        let raw = self.sign(call, nonce)?;

        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| SendError::new(e.to_string()))?;

        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt> {
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!("Receipt for {} not available yet", hash),
                    Err(e) => debug!("Receipt poll for {} failed: {}", hash, e),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        let receipt = tokio::time::timeout(self.receipt_timeout, poll)
            .await
            .map_err(|_| Error::ReceiptTimeout {
                hash: hash.to_string(),
                secs: self.receipt_timeout.as_secs(),
            })?;

        Ok(TxReceipt {
            hash,
            success: receipt.status(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .cloned()
                .map(RawLog::from)
                .collect(),
        })
    }

    async fn subscribe_logs(&self, address: Address, topic0: B256) -> Result<LogStream> {
        let filter = Filter::new().address(address).event_signature(topic0);

        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| Error::Subscription(e.to_string()))?;

        Ok(subscription.into_stream().map(RawLog::from).boxed())
    }
}
