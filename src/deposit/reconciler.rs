//! Backfill scanning of historical transfers.
//!
//! A pass reads the checkpoint and asks the provider for every transfer to the receiving
//! address between the checkpoint and the chain head. It applies them in block order and
//! advances the checkpoint window by window. Bad events, and deposits the ledger cannot hold,
//! are logged and skipped. A provider or store failure aborts the pass and leaves the checkpoint at the last completed window, so
//! the next pass retries the remaining range.

use crate::chain::RawTransfer;
use crate::deposit::context::DepositContext;
use crate::deposit::processor::ApplyOutcome;
use crate::deposit::DepositError;
use crate::utils::with_timeout;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
	/// No checkpoint existed; it was set to the chain head and nothing was applied.
	Bootstrapped { head: u64 },
	/// The chain head has not moved past the checkpoint.
	UpToDate { checkpoint: u64, head: u64 },
	/// Blocks were scanned and the checkpoint advanced.
	Scanned(ScanStats),
}

/// Counters for a scan pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStats {
	pub from_block: u64,
	pub to_block: u64,
	pub transfers: usize,
	pub credited: usize,
	pub unmatched: usize,
	pub malformed: usize,
	pub duplicates: usize,
	/// Deposits refused by the ledger, such as ones that would overflow a balance
	pub rejected: usize,
}

impl ScanStats {
	/// Get a human-readable summary of the pass
	pub fn summary(&self) -> String {
		format!(
			"Scanned blocks {}..={}: {} transfers, {} credited, {} unmatched, {} malformed{}{}",
			self.from_block,
			self.to_block,
			self.transfers,
			self.credited,
			self.unmatched,
			self.malformed,
			if self.duplicates == 0 {
				String::new()
			} else {
				format!(", {} duplicates", self.duplicates)
			},
			if self.rejected == 0 {
				String::new()
			} else {
				format!(", {} rejected", self.rejected)
			}
		)
	}
}

/// Backfill scanner driven by the scheduler.
pub struct Reconciler {
	context: Arc<DepositContext>,
	max_blocks_per_query: u64,
}

impl Reconciler {
	pub fn new(context: Arc<DepositContext>, max_blocks_per_query: u64) -> Self {
		Self {
			context,
			max_blocks_per_query: max_blocks_per_query.max(1),
		}
	}

	/// Run one pass.
	pub async fn run_once(&self) -> Result<ScanOutcome, DepositError> {
		let last_scanned = self.context.checkpoint.read().await?;
		let head = self.chain_head().await?;

		let Some(last_scanned) = last_scanned else {
			self.context.checkpoint.advance(head).await?;
			info!(
				"No checkpoint found, starting from current head {}; no transfers applied",
				head
			);
			return Ok(ScanOutcome::Bootstrapped { head });
		};

		if head <= last_scanned {
			debug!(
				"Chain head {} is not past checkpoint {}, nothing to scan",
				head, last_scanned
			);
			return Ok(ScanOutcome::UpToDate {
				checkpoint: last_scanned,
				head,
			});
		}

		let mut stats = ScanStats {
			from_block: last_scanned + 1,
			to_block: head,
			..Default::default()
		};

		let mut window_start = last_scanned + 1;
		while window_start <= head {
			let window_end = head.min(window_start.saturating_add(self.max_blocks_per_query - 1));

			let transfers = self.query_window(window_start, window_end).await?;
			debug!(
				"Fetched {} transfers in blocks {}..={}",
				transfers.len(),
				window_start,
				window_end
			);

			for transfer in &transfers {
				self.apply_transfer(transfer, &mut stats).await?;
			}

			self.context.checkpoint.advance(window_end).await?;
			self.context.processor.prune_delivered(window_end);
			window_start = window_end + 1;
		}

		info!("{}", stats.summary());
		Ok(ScanOutcome::Scanned(stats))
	}

	async fn chain_head(&self) -> Result<u64, DepositError> {
		with_timeout(
			self.context.call_timeout,
			"chain head",
			self.context.provider.current_block_height(),
		)
		.await
		.map_err(|e| scan_error("Failed to fetch chain head", e))
	}

	async fn query_window(
		&self,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawTransfer>, DepositError> {
		with_timeout(
			self.context.call_timeout,
			"transfer query",
			self.context.provider.query_transfer_events(
				&self.context.receiving_address,
				from_block,
				to_block,
			),
		)
		.await
		.map_err(|e| {
			scan_error(
				&format!("Failed to query blocks {}..={}", from_block, to_block),
				e,
			)
		})
	}

	/// Decode and credit one transfer. Only store failures abort the pass.
	async fn apply_transfer(
		&self,
		transfer: &RawTransfer,
		stats: &mut ScanStats,
	) -> Result<(), DepositError> {
		stats.transfers += 1;

		let event = match self.context.decoder.decode(transfer) {
			Ok(event) => event,
			Err(e) => {
				warn!(
					"Skipping transfer {}:{} at block {}: {}",
					transfer.transaction_hash, transfer.log_index, transfer.block_number, e
				);
				stats.malformed += 1;
				return Ok(());
			}
		};

		match self.context.processor.apply(&event).await {
			Ok(ApplyOutcome::Credited { .. }) => stats.credited += 1,
			Ok(ApplyOutcome::Unmatched) => stats.unmatched += 1,
			Ok(ApplyOutcome::Duplicate) => stats.duplicates += 1,
			Err(e @ DepositError::BalanceOverflow { .. }) => {
				warn!(
					"Skipping transfer {}:{} at block {}: {}",
					event.transaction_hash, event.log_index, event.block_number, e
				);
				stats.rejected += 1;
			}
			Err(e) => {
				error!(
					"Failed to apply transfer {}:{} at block {}: {}",
					event.transaction_hash, event.log_index, event.block_number, e
				);
				return Err(e);
			}
		}
		Ok(())
	}
}

/// Provider failures and timeouts abort the pass as a `ScanError`.
fn scan_error(context: &str, error: DepositError) -> DepositError {
	match error {
		DepositError::ChainError(_) | DepositError::TimeoutError { .. } => {
			DepositError::ScanError(format!("{}: {}", context, error))
		}
		other => other,
	}
}
