//! Trading module - swap building, nonce sequencing, entries and liquidation

pub mod entry;
pub mod liquidator;
pub mod router;
pub mod sequencer;

pub use entry::{EntryEngine, EntryOutcome, EntrySettings, PairCandidate};
pub use liquidator::{DumpReport, DumpSkip, Liquidator};
pub use router::SwapBuilder;
pub use sequencer::{RetryPolicy, TransactionSequencer};
