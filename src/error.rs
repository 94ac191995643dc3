//! Error types for the sniper bot

use alloy::primitives::Address;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Log subscription failed: {0}")]
    Subscription(String),

    #[error("Log decode failed: {0}")]
    LogDecode(String),

    // Transaction errors
    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Insufficient funds for gas: {0}")]
    InsufficientFunds(String),

    #[error("Nonce still stale after {attempts} resyncs")]
    NonceResyncExhausted { attempts: u32 },

    #[error("Transaction {0} reverted")]
    TransactionReverted(String),

    #[error("No receipt for {hash} after {secs}s")]
    ReceiptTimeout { hash: String, secs: u64 },

    #[error("No Swap event in receipt {0}")]
    SwapLogMissing(String),

    // Pricing errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Price calculation overflow")]
    PriceOverflow,

    // Position management errors
    #[error("Position not found: {0}")]
    PositionNotFound(Address),

    #[error("Position already exists: {0}")]
    PositionExists(Address),

    #[error("Invalid position transition for {pair}: {from} -> {to}")]
    InvalidTransition {
        pair: Address,
        from: String,
        to: &'static str,
    },

    #[error("Position persistence failed: {0}")]
    PositionPersistence(String),

    // Token safety errors
    #[error("Token safety check failed: {0}")]
    SafetyCheck(String),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::RpcConnection(_) | Error::Subscription(_)
        )
    }

    /// Check if this error indicates a defect in the caller rather than a runtime fault
    pub fn is_programming_fault(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::InvalidTransition { .. })
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from explorer HTTP errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::SafetyCheck(e.to_string())
    }
}
