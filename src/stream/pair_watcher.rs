//! New-pair watcher
//!
//! Subscribes to the factory's `PairCreated` logs, filters pairs by native
//! side and liquidity, and hands candidates to the entry engine. Buying is
//! gated on the account holding enough native currency, refreshed on a
//! separate timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use crate::amm::NativeSide;
use crate::chain::abi::{PairCreated, PAIR_CREATED_TOPIC};
use crate::chain::{ChainClient, RawLog};
use crate::error::Result;
use crate::trading::entry::{EntryEngine, EntryOutcome, PairCandidate};

/// "Sufficient funds to trade" flag
pub struct BalanceGate {
    min_balance: U256,
    sufficient: AtomicBool,
}

impl BalanceGate {
    /// Starts closed until the first refresh
    pub fn new(min_balance: U256) -> Self {
        Self {
            min_balance,
            sufficient: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.sufficient.load(Ordering::Acquire)
    }

    /// Re-read the account balance; open iff it exceeds the minimum
    pub async fn refresh(&self, chain: &dyn ChainClient) -> Result<bool> {
        let balance = chain.native_balance().await?;
        let sufficient = balance > self.min_balance;
        info!("Current account balance: {}", format_ether(balance));

        if sufficient != self.sufficient.swap(sufficient, Ordering::AcqRel) {
            if sufficient {
                info!("Balance above {}, buying enabled", format_ether(self.min_balance));
            } else {
                warn!("Balance at or below {}, buying paused", format_ether(self.min_balance));
            }
        }
        Ok(sufficient)
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub factory: Address,
    pub wrapped_native: Address,
    /// Native reserve a new pair has to exceed
    pub min_reserve: U256,
    /// Off for dry runs: candidates are only logged
    pub auto_buy: bool,
    pub reconnect_delay: Duration,
    pub balance_check: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSkip {
    BalanceGateClosed,
    NotNative,
    ReserveTooLow { native_reserve: U256 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Candidate(PairCandidate),
    Skipped(PairSkip),
}

pub struct PairWatcher {
    chain: Arc<dyn ChainClient>,
    entry: Arc<EntryEngine>,
    gate: Arc<BalanceGate>,
    settings: WatcherSettings,
    /// Entries in flight; drained on shutdown so no record is left opening
    entries: Mutex<JoinSet<()>>,
    shutdown: broadcast::Sender<()>,
}

impl PairWatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        entry: Arc<EntryEngine>,
        gate: Arc<BalanceGate>,
        settings: WatcherSettings,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            chain,
            entry,
            gate,
            settings,
            entries: Mutex::new(JoinSet::new()),
            shutdown,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Watch until [`stop`](Self::stop) is called, resubscribing after any
    /// subscription error or end of stream. Entries already started are
    /// finished before this returns.
    pub async fn run(&self) {
        let balance_task = self.spawn_balance_checks();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.consume() => {
                    match result {
                        Ok(()) => warn!("PairCreated subscription ended"),
                        Err(e) => error!("PairCreated subscription failed: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Pair watcher shutting down");
                    break;
                }
            }

            tokio::select! {
                _ = sleep(self.settings.reconnect_delay) => {
                    info!("Resubscribing to PairCreated logs");
                }
                _ = shutdown_rx.recv() => {
                    info!("Pair watcher shutting down");
                    break;
                }
            }
        }

        balance_task.abort();
        self.wait_for_entries().await;
    }

    /// Wait for every started entry to settle
    pub async fn wait_for_entries(&self) {
        let mut entries = self.entries.lock().await;
        if !entries.is_empty() {
            info!("Waiting for {} entries in flight", entries.len());
        }

        while let Some(result) = entries.join_next().await {
            if let Err(e) = result {
                error!("Entry task ended abnormally: {}", e);
            }
        }
    }

    fn spawn_balance_checks(&self) -> JoinHandle<()> {
        let chain = self.chain.clone();
        let gate = self.gate.clone();
        let period = self.settings.balance_check;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = gate.refresh(chain.as_ref()).await {
                    error!("Error while checking balance: {}", e);
                }
            }
        })
    }

    /// Drain one subscription
    pub async fn consume(&self) -> Result<()> {
        let mut logs = self
            .chain
            .subscribe_logs(self.settings.factory, PAIR_CREATED_TOPIC)
            .await?;
        info!("Listening for new pairs at {}", self.settings.factory);

        while let Some(log) = logs.next().await {
            self.handle(log).await;
        }
        Ok(())
    }

    /// Evaluate one log and start an entry for a candidate; `true` if one started
    pub async fn handle(&self, log: RawLog) -> bool {
        let candidate = match self.evaluate(&log).await {
            Ok(Evaluation::Candidate(candidate)) => candidate,
            Ok(Evaluation::Skipped(skip)) => {
                debug!("Skipping pair: {:?}", skip);
                return false;
            }
            Err(e) => {
                warn!("Error handling PairCreated log: {}", e);
                return false;
            }
        };

        if !self.settings.auto_buy {
            info!(
                "[dry-run] would enter {} ({} native reserve)",
                candidate.pair,
                format_ether(candidate.native_reserve())
            );
            return false;
        }

        let entry = self.entry.clone();
        let mut entries = self.entries.lock().await;
        // reap finished entries
        while entries.try_join_next().is_some() {}

        entries.spawn(async move {
            match entry.enter(candidate).await {
                Ok(EntryOutcome::Opened { received }) => {
                    debug!("Entry into {} received {}", candidate.pair, received)
                }
                Ok(outcome) => debug!("Entry into {}: {:?}", candidate.pair, outcome),
                Err(e) => error!("Entry into {} failed: {}", candidate.pair, e),
            }
        });
        true
    }

    pub async fn evaluate(&self, log: &RawLog) -> Result<Evaluation> {
        if !self.gate.is_open() {
            return Ok(Evaluation::Skipped(PairSkip::BalanceGateClosed));
        }

        let created = PairCreated::decode(log)?;
        let Some(native_side) =
            NativeSide::of(created.token0, created.token1, self.settings.wrapped_native)
        else {
            return Ok(Evaluation::Skipped(PairSkip::NotNative));
        };

        let reserve = self.chain.get_reserves(created.pair).await?;
        let native_reserve = native_side.native_reserve(&reserve);
        info!(
            "New pair created: {}. Native reserve: {}",
            created.pair,
            format_ether(native_reserve)
        );

        if native_reserve <= self.settings.min_reserve {
            return Ok(Evaluation::Skipped(PairSkip::ReserveTooLow { native_reserve }));
        }

        Ok(Evaluation::Candidate(PairCandidate {
            pair: created.pair,
            token0: created.token0,
            token1: created.token1,
            native_side,
            reserve,
        }))
    }
}
