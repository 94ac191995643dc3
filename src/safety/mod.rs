//! Token safety checks
//!
//! Before buying, the target token's verified source is fetched from the
//! block explorer and scanned for known honeypot snippets.

use alloy::primitives::Address;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SafetyConfig;
use crate::error::{Error, Result};

/// Snippets found in the source of tokens that can't be sold
const HONEYPOT_SNIPPETS: &[&str] = &[
    "Handling Request",
    "require(txoo && !bl[msg.sender])",
    "FOR VALUE PROTECTION, YOU CAN ONLY SELL",
    "Syntax Error. Please Re-Submit Order",
    "Error: Can not sell this token",
    "SLAVETAX",
    "\"please wait\"",
    "\"Not you\"",
    "account is freez",
    "Transaction amount exceeds the configured limit",
    "Tokens cannot be transferred",
    "sefhi = 2 weeks",
    "\"Tokens are here\"",
    "[account] = 1;",
];

/// Default blocked patterns, escaped for use as regexes
pub fn default_blocked_patterns() -> Vec<String> {
    HONEYPOT_SNIPPETS.iter().map(|s| regex::escape(s)).collect()
}

/// Outcome of a safety check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Pass,
    Fail(String),
    /// Source not verified, or the scanner could not be reached
    Unverified,
}

impl std::fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyVerdict::Pass => write!(f, "pass"),
            SafetyVerdict::Fail(reason) => write!(f, "fail: {}", reason),
            SafetyVerdict::Unverified => write!(f, "unverified"),
        }
    }
}

#[async_trait]
pub trait TokenSafetyOracle: Send + Sync {
    async fn check(&self, token: Address) -> SafetyVerdict;
}

/// Oracle with a fixed answer, used when scanning is switched off
pub struct StaticOracle(pub SafetyVerdict);

#[async_trait]
impl TokenSafetyOracle for StaticOracle {
    async fn check(&self, _token: Address) -> SafetyVerdict {
        self.0.clone()
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
}

/// Etherscan-family `getsourcecode` scanner
pub struct BscScanOracle {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    blocked_patterns: Vec<Regex>,
}

impl BscScanOracle {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("safety.api_key is required when safety.enabled".into()))?;

        let blocked_patterns = config
            .blocked_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidRegex(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        info!(
            "Token safety scanner at {} with {} blocked patterns",
            config.api_url,
            blocked_patterns.len()
        );

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            blocked_patterns,
        })
    }

    /// Verdict for a verified source file
    pub fn inspect(&self, source: &str) -> SafetyVerdict {
        if source.trim().is_empty() {
            return SafetyVerdict::Unverified;
        }

        for pattern in &self.blocked_patterns {
            if pattern.is_match(source) {
                return SafetyVerdict::Fail(format!("source matches {}", pattern));
            }
        }

        SafetyVerdict::Pass
    }

    /// Source files of `token`; empty when the contract is not verified
    async fn fetch_sources(&self, token: Address) -> Result<Vec<String>> {
        let address = token.to_string().to_lowercase();
        let response: ExplorerResponse = self
            .client
            .get(&self.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.message != "OK" {
            debug!("Explorer answered {} for {}: {}", response.message, token, response.result);
            return Ok(Vec::new());
        }

        let entries: Vec<SourceEntry> = serde_json::from_value(response.result)?;
        Ok(entries.into_iter().map(|e| e.source_code).collect())
    }

    fn verdict(&self, sources: &[String]) -> SafetyVerdict {
        if sources.is_empty() {
            return SafetyVerdict::Unverified;
        }
        for source in sources {
            let verdict = self.inspect(source);
            if verdict != SafetyVerdict::Pass {
                return verdict;
            }
        }
        SafetyVerdict::Pass
    }
}

#[async_trait]
impl TokenSafetyOracle for BscScanOracle {
    async fn check(&self, token: Address) -> SafetyVerdict {
        match self.fetch_sources(token).await {
            Ok(sources) => {
                let verdict = self.verdict(&sources);
                debug!("Safety verdict for {}: {}", token, verdict);
                verdict
            }
            Err(e) => {
                warn!("Safety check for {} failed: {}", token, e);
                SafetyVerdict::Unverified
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> BscScanOracle {
        let config = SafetyConfig {
            enabled: true,
            api_key: Some("test-key".into()),
            ..SafetyConfig::default()
        };
        BscScanOracle::new(&config).unwrap()
    }

    #[test]
    fn test_clean_source_passes() {
        let source = "contract Token is ERC20 { function transfer(address to, uint256 v) public {} }";
        assert_eq!(oracle().inspect(source), SafetyVerdict::Pass);
    }

    #[test]
    fn test_honeypot_source_fails() {
        let source = r#"function _transfer() { require(txoo && !bl[msg.sender]); }"#;
        assert!(matches!(oracle().inspect(source), SafetyVerdict::Fail(_)));

        let source = r#"revert("Not you");"#;
        assert!(matches!(oracle().inspect(source), SafetyVerdict::Fail(_)));
    }

    #[test]
    fn test_empty_source_is_unverified() {
        let oracle = oracle();
        assert_eq!(oracle.inspect("   "), SafetyVerdict::Unverified);
        assert_eq!(oracle.verdict(&[]), SafetyVerdict::Unverified);
        assert_eq!(oracle.verdict(&[String::new()]), SafetyVerdict::Unverified);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let config = SafetyConfig {
            enabled: true,
            api_key: None,
            ..SafetyConfig::default()
        };
        assert!(matches!(BscScanOracle::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = SafetyConfig {
            enabled: true,
            api_key: Some("k".into()),
            blocked_patterns: vec!["(unclosed".into()],
            ..SafetyConfig::default()
        };
        assert!(matches!(BscScanOracle::new(&config), Err(Error::InvalidRegex(_))));
    }

    #[tokio::test]
    async fn test_static_oracle() {
        let oracle = StaticOracle(SafetyVerdict::Unverified);
        assert_eq!(oracle.check(Address::ZERO).await, SafetyVerdict::Unverified);
    }
}
