//! Trading pairs and on-chain token bindings

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two on-chain token addresses behind a `BASE/QUOTE` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTokens {
    pub token0: String,
    pub token1: String,
}

/// Malformed EVM address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("address must be 20 bytes (40 hex chars): {0}")]
    BadLength(String),

    #[error("address contains non-hex characters: {0}")]
    BadHex(String),
}

/// Validate a `0x`-prefixed 20-byte EVM address.
pub fn validate_evm_address(addr: &str) -> Result<(), AddressError> {
    let Some(body) = addr.strip_prefix("0x") else {
        return Err(AddressError::MissingPrefix(addr.to_string()));
    };
    if body.len() != 40 {
        return Err(AddressError::BadLength(addr.to_string()));
    }
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::BadHex(addr.to_string()));
    }
    Ok(())
}

/// Split a `BASE/QUOTE` pair string; `None` when the shape is wrong.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (base, quote) = pair.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}
