use crate::deposit::ledger::BalanceLedger;
use crate::deposit::{AccountId, CreditOutcome, DepositError, DepositEvent};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a single deposit.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
	Credited {
		account_id: AccountId,
		balance: Decimal,
	},
	/// No account is bound to the sender; the deposit is dropped.
	Unmatched,
	/// The transfer was already applied by the other ingestion path.
	Duplicate,
}

/// Applies decoded deposits to the ledger. Shared by the reconciler and the live watcher.
///
/// Without transfer dedupe, a transfer seen by both paths is credited twice. With it, the
/// `(transaction hash, log index)` of every applied transfer is remembered along with its
/// block, and repeats are dropped. Entries are released by [`Self::prune_delivered`] once the
/// reconciler has committed past their block.
pub struct DepositProcessor {
	ledger: Arc<BalanceLedger>,
	/// Transfer id -> block number
	delivered: Option<DashMap<(String, u64), u64>>,
}

impl DepositProcessor {
	pub fn new(ledger: Arc<BalanceLedger>, dedupe_transfers: bool) -> Self {
		Self {
			ledger,
			delivered: dedupe_transfers.then(DashMap::new),
		}
	}

	/// Forget applied transfers at or below `through_block`.
	pub fn prune_delivered(&self, through_block: u64) {
		if let Some(delivered) = &self.delivered {
			let before = delivered.len();
			delivered.retain(|_, block_number| *block_number > through_block);
			let pruned = before.saturating_sub(delivered.len());
			if pruned > 0 {
				debug!(
					"Released {} applied transfers through block {}",
					pruned, through_block
				);
			}
		}
	}

	#[cfg(test)]
	pub fn tracked_transfers(&self) -> usize {
		self.delivered.as_ref().map_or(0, DashMap::len)
	}

	/// Credit one deposit to the account bound to its sender.
	pub async fn apply(&self, event: &DepositEvent) -> Result<ApplyOutcome, DepositError> {
		if let Some(delivered) = &self.delivered {
			if delivered
				.insert(event.transfer_id(), event.block_number)
				.is_some()
			{
				debug!(
					"Skipping transfer {}:{} at block {}, already applied",
					event.transaction_hash, event.log_index, event.block_number
				);
				return Ok(ApplyOutcome::Duplicate);
			}
		}

		let credited = self
			.ledger
			.credit_by_address(&event.from_address, event.amount)
			.await;
		let outcome = match credited {
			Ok(outcome) => outcome,
			Err(e) => {
				// Not applied, so a retry must not be taken for a duplicate
				if let Some(delivered) = &self.delivered {
					delivered.remove(&event.transfer_id());
				}
				return Err(e);
			}
		};

		match outcome {
			CreditOutcome::Applied {
				account_id,
				balance,
			} => {
				info!(
					"Deposit of {} from {} at block {} credited to account {}",
					event.amount, event.from_address, event.block_number, account_id
				);
				Ok(ApplyOutcome::Credited {
					account_id,
					balance,
				})
			}
			CreditOutcome::NotFound => {
				warn!(
					"Deposit of {} from {} at block {} (tx {}) matches no account, dropping it",
					event.amount, event.from_address, event.block_number, event.transaction_hash
				);
				Ok(ApplyOutcome::Unmatched)
			}
		}
	}
}
