//! AMM new-pair sniper library
//!
//! Watches a Uniswap-V2 style factory for new pairs, buys into the ones
//! paired with the wrapped native token, and manages the resulting
//! positions until they are sold or rugged.

pub mod amm;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod position;
pub mod safety;
pub mod stream;
pub mod trading;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
