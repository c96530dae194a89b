//! Chain integration module
//!
//! This module provides the provider interface the reconciliation engine consumes, and an
//! EVM JSON-RPC client implementing it. Historical transfers are fetched with `eth_getLogs`
//! and new ones arrive through an `eth_subscribe` WebSocket feed.

/// JSON-RPC client for an EVM node
mod client;
/// Provider trait consumed by the engine
mod provider;
/// Type definitions for logs, transfers and provider errors
mod types;

pub use client::EvmRpcClient;
pub use provider::{ChainProvider, TransferStream};
pub use types::*;
