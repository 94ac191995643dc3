//! Stream module - factory log ingestion

pub mod pair_watcher;

pub use pair_watcher::{BalanceGate, PairWatcher, WatcherSettings};
