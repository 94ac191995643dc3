//! Shared wiring for engine tests

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::chain::mock::MockChain;
use crate::chain::ChainClient;
use crate::position::exit::{ExitEngine, ExitSettings};
use crate::position::model::fixtures;
use crate::position::store::JsonPositionStore;
use crate::trading::router::SwapBuilder;
use crate::trading::sequencer::{RetryPolicy, TransactionSequencer};

pub const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

pub fn ether(n: u128) -> U256 {
    U256::from(n * ONE_ETHER)
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub store: Arc<JsonPositionStore>,
    pub sequencer: Arc<TransactionSequencer>,
    pub swaps: SwapBuilder,
}

impl Harness {
    pub fn new() -> Self {
        let chain = Arc::new(MockChain::new());
        let sequencer = Arc::new(TransactionSequencer::new(chain.clone(), RetryPolicy::default()));
        // 1 wei gas price keeps the fee estimate at 650_000 wei
        let swaps = SwapBuilder::new(
            Address::repeat_byte(0x10),
            fixtures::wrapped(),
            chain.account(),
            1,
            Duration::from_secs(30),
        );

        Self {
            chain,
            store: Arc::new(JsonPositionStore::in_memory()),
            sequencer,
            swaps,
        }
    }

    pub fn exit_engine(&self, settings: ExitSettings) -> ExitEngine {
        ExitEngine::new(
            self.chain.clone(),
            self.sequencer.clone(),
            self.store.clone(),
            self.swaps.clone(),
            settings,
        )
    }
}
