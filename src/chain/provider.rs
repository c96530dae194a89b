use std::pin::Pin;

use futures_util::Stream;

use super::types::{ChainError, RawTransfer};

/// Live feed of transfers addressed to the receiving address.
pub type TransferStream = Pin<Box<dyn Stream<Item = Result<RawTransfer, ChainError>> + Send>>;

/// The chain operations the reconciliation engine depends on.
///
/// The engine only ever sees this trait, so tests drive it with an in-memory fake and
/// production wires in [`super::EvmRpcClient`].
#[async_trait::async_trait]
pub trait ChainProvider: Send + Sync {
	/// Current head block number.
	async fn current_block_height(&self) -> Result<u64, ChainError>;

	/// Token transfers to `to_address` in `from_block..=to_block`, ordered by block then log index.
	async fn query_transfer_events(
		&self,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawTransfer>, ChainError>;

	/// Subscribe to new token transfers to `to_address`.
	///
	/// The stream ends when the provider closes the subscription.
	async fn subscribe_transfers(&self, to_address: &str) -> Result<TransferStream, ChainError>;
}
