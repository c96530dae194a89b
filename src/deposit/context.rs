use crate::chain::ChainProvider;
use crate::deposit::checkpoint::CheckpointTracker;
use crate::deposit::decoder::EventDecoder;
use crate::deposit::processor::DepositProcessor;
use crate::utils::normalize_address;
use std::sync::Arc;
use std::time::Duration;

/// Handles shared by every part of the engine.
///
/// Built once at startup and handed to the reconciler, the live watcher and the scheduler,
/// so each can be constructed against fakes in tests.
pub struct DepositContext {
	pub provider: Arc<dyn ChainProvider>,
	pub checkpoint: Arc<CheckpointTracker>,
	pub processor: Arc<DepositProcessor>,
	pub decoder: EventDecoder,
	/// Address deposits are sent to, lower-cased.
	pub receiving_address: String,
	/// Upper bound for any single provider call.
	pub call_timeout: Duration,
}

impl DepositContext {
	pub fn new(
		provider: Arc<dyn ChainProvider>,
		checkpoint: Arc<CheckpointTracker>,
		processor: Arc<DepositProcessor>,
		decoder: EventDecoder,
		receiving_address: &str,
		call_timeout: Duration,
	) -> Self {
		Self {
			provider,
			checkpoint,
			processor,
			decoder,
			receiving_address: normalize_address(receiving_address),
			call_timeout,
		}
	}
}
