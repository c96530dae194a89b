//!
//! JSON-RPC client for an EVM node.
//!
//! Block height and historical transfer logs are fetched over HTTP. New transfers arrive over
//! a WebSocket `eth_subscribe("logs")` subscription and are exposed as an async stream. All
//! methods are async and designed for use with Tokio.

use super::provider::{ChainProvider, TransferStream};
use super::types::*;
use crate::utils::address::{address_to_topic, normalize_address};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// EVM JSON-RPC client bound to a single token contract
pub struct EvmRpcClient {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// HTTP endpoint of the node.
	rpc_url: String,
	/// WebSocket endpoint of the node, used for subscriptions.
	ws_url: String,
	/// Token contract whose `Transfer` logs are watched.
	token_contract: String,
	next_request_id: AtomicU64,
}

impl EvmRpcClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	/// * `token_contract` - Address of the ERC-20 contract to watch.
	/// * `request_timeout` - Upper bound for a single HTTP request.
	pub fn new(
		rpc_url: String,
		ws_url: String,
		token_contract: &str,
		request_timeout: Duration,
	) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(request_timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			token_contract: normalize_address(token_contract),
			next_request_id: AtomicU64::new(SUBSCRIBE_REQUEST_ID + 1),
		})
	}

	/// Log filter for `Transfer(_, to_address, _)` emitted by the token contract.
	fn transfer_filter(&self, to_address: &str) -> Value {
		json!({
			"address": self.token_contract,
			"topics": [TRANSFER_TOPIC, Value::Null, address_to_topic(to_address)],
		})
	}

	/// Execute a JSON-RPC call and return its `result` member.
	pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.next_request_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.json(&request_body)
			.send()
			.await?
			.error_for_status()?;

		let mut response_json: Value = response.json().await?;
		take_result(&mut response_json)
	}
}

/// Pull `result` out of a JSON-RPC response, turning an `error` member into `ChainError`.
fn take_result(response: &mut Value) -> Result<Value, ChainError> {
	if let Some(error) = response.get("error") {
		return Err(ChainError::RpcError {
			code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
			message: error
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or("Unknown RPC error")
				.to_string(),
		});
	}

	response
		.get_mut("result")
		.map(Value::take)
		.ok_or_else(|| ChainError::InvalidResponse("Response has no result".to_string()))
}

/// Convert one subscription frame into a transfer, if it carries one.
fn parse_notification(text: &str) -> Option<Result<RawTransfer, ChainError>> {
	let parsed: Value = match serde_json::from_str(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(ChainError::JsonError(e))),
	};

	if parsed.get("method").and_then(Value::as_str) != Some("eth_subscription") {
		debug!("Ignoring non-notification frame: {}", text);
		return None;
	}

	let log = parsed.get("params").and_then(|p| p.get("result"))?;
	match serde_json::from_value::<LogEntry>(log.clone()) {
		Ok(log) if log.removed => {
			warn!(
				"Ignoring removed log in tx {:?} at block {:?}",
				log.transaction_hash, log.block_number
			);
			None
		}
		Ok(log) => Some(RawTransfer::try_from(log)),
		Err(e) => Some(Err(ChainError::JsonError(e))),
	}
}

#[async_trait::async_trait]
impl ChainProvider for EvmRpcClient {
	async fn current_block_height(&self) -> Result<u64, ChainError> {
		let result = self.call("eth_blockNumber", json!([])).await?;
		let quantity = result.as_str().ok_or_else(|| {
			ChainError::InvalidResponse(format!("eth_blockNumber returned {}", result))
		})?;
		parse_quantity(quantity)
	}

	async fn query_transfer_events(
		&self,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawTransfer>, ChainError> {
		let mut filter = self.transfer_filter(to_address);
		filter["fromBlock"] = json!(to_quantity(from_block));
		filter["toBlock"] = json!(to_quantity(to_block));

		let result = self.call("eth_getLogs", json!([filter])).await?;
		let logs: Vec<LogEntry> = serde_json::from_value(result)?;
		debug!(
			"eth_getLogs returned {} logs for blocks {}..={}",
			logs.len(),
			from_block,
			to_block
		);

		let mut transfers = Vec::with_capacity(logs.len());
		for log in logs.into_iter().filter(|log| !log.removed) {
			match RawTransfer::try_from(log) {
				Ok(transfer) => transfers.push(transfer),
				// A log that is not a well-formed Transfer cannot be a deposit.
				Err(e) => warn!("Skipping malformed transfer log: {}", e),
			}
		}
		transfers.sort_by_key(|t| (t.block_number, t.log_index));
		Ok(transfers)
	}

	async fn subscribe_transfers(&self, to_address: &str) -> Result<TransferStream, ChainError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": SUBSCRIBE_REQUEST_ID,
			"method": "eth_subscribe",
			"params": ["logs", self.transfer_filter(to_address)],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		loop {
			match ws_receiver.next().await {
				Some(Ok(Message::Text(text))) => {
					let mut parsed: Value = serde_json::from_str(&text)?;
					if parsed.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
						continue;
					}
					let subscription_id = take_result(&mut parsed)?;
					info!("Subscribed to transfer logs, subscription id {}", subscription_id);
					break;
				}
				Some(Ok(_)) => continue,
				Some(Err(e)) => return Err(ChainError::WebSocketError(e)),
				None => return Err(ChainError::SubscriptionClosed),
			}
		}

		let stream = ws_receiver.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(text)) => parse_notification(&text),
				Ok(Message::Close(frame)) => {
					info!("Provider closed the subscription: {:?}", frame);
					Some(Err(ChainError::SubscriptionClosed))
				}
				Ok(_) => None,
				Err(e) => Some(Err(ChainError::WebSocketError(e))),
			}
		});

		Ok(Box::pin(stream))
	}
}
