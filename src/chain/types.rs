//! Types for the EVM JSON-RPC provider integration

use serde::{Deserialize, Serialize};

use crate::utils::address::{normalize_address, topic_to_address};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A log entry as returned by `eth_getLogs` and `eth_subscription` notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Address of the contract that emitted the log.
    pub address: String,
    /// Indexed topics; for ERC-20 `Transfer` these are `[signature, from, to]`.
    pub topics: Vec<String>,
    /// Non-indexed data; for ERC-20 `Transfer` this is the 32-byte amount.
    pub data: String,
    /// Block number as a `0x` quantity. Absent for pending logs.
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    /// Set when the log was dropped by a chain reorganization.
    #[serde(default)]
    pub removed: bool,
}

/// A transfer notification with the amount still in its raw on-chain form.
///
/// Sender and recipient are already normalized. The amount is left untouched so
/// that a malformed value surfaces as a decode failure for this one transfer
/// instead of failing the whole provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransfer {
    pub from: String,
    pub to: String,
    /// Integer token units, either `0x`-prefixed hex or a decimal string.
    pub raw_amount: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
}

impl TryFrom<LogEntry> for RawTransfer {
    type Error = ChainError;

    fn try_from(log: LogEntry) -> Result<Self, Self::Error> {
        if log.topics.len() < 3 {
            return Err(ChainError::InvalidResponse(format!(
                "Transfer log has {} topics, expected 3",
                log.topics.len()
            )));
        }

        let from = topic_to_address(&log.topics[1]).ok_or_else(|| {
            ChainError::InvalidResponse(format!("Invalid sender topic: {}", log.topics[1]))
        })?;
        let to = topic_to_address(&log.topics[2]).ok_or_else(|| {
            ChainError::InvalidResponse(format!("Invalid recipient topic: {}", log.topics[2]))
        })?;

        let block_number = log
            .block_number
            .as_deref()
            .ok_or_else(|| ChainError::InvalidResponse("Log has no block number".to_string()))
            .and_then(parse_quantity)?;

        let log_index = match log.log_index.as_deref() {
            Some(index) => parse_quantity(index)?,
            None => 0,
        };

        Ok(Self {
            from: normalize_address(&from),
            to: normalize_address(&to),
            raw_amount: log.data,
            block_number,
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            log_index,
        })
    }
}

/// Parse a JSON-RPC `0x` quantity.
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("Quantity without 0x prefix: {}", value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("Invalid quantity {}: {}", value, e)))
}

/// Format a block number as a JSON-RPC quantity.
pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Errors that can occur when talking to the chain provider
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Subscription closed by provider")]
    SubscriptionClosed,

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ChainError {
    /// Whether the error means the live feed can no longer deliver events.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainError::SubscriptionClosed | ChainError::WebSocketError(_)
        )
    }
}
