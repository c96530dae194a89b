use crate::chain::ChainError;
use crate::utils::normalize_address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque identifier of an account in the user directory.
pub type AccountId = String;

/// A decoded deposit, ready to be credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
	/// Sender address, lower-cased.
	pub from_address: String,
	/// Token amount after decimal scaling.
	pub amount: Decimal,
	pub block_number: u64,
	pub transaction_hash: String,
	pub log_index: u64,
}

impl DepositEvent {
	/// Identity of the on-chain transfer this deposit came from.
	pub fn transfer_id(&self) -> (String, u64) {
		(self.transaction_hash.clone(), self.log_index)
	}
}

/// A user account as stored in the user directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
	pub id: AccountId,
	/// External wallet the user deposits from, if one is bound.
	#[serde(default)]
	pub wallet_address: Option<String>,
	#[serde(default)]
	pub balance: Decimal,
}

impl Account {
	pub fn new(id: impl Into<AccountId>, wallet_address: Option<&str>) -> Self {
		Self {
			id: id.into(),
			wallet_address: wallet_address.map(str::to_string),
			balance: Decimal::ZERO,
		}
	}

	/// Whether `wallet_address` (already normalized) is the wallet bound to this account.
	pub fn is_bound_to(&self, wallet_address: &str) -> bool {
		self.wallet_address
			.as_deref()
			.is_some_and(|bound| normalize_address(bound) == wallet_address)
	}

	/// Add `amount` to the balance, failing instead of overflowing.
	pub fn credit(&mut self, amount: Decimal) -> Result<Decimal, DepositError> {
		self.balance = self.balance.checked_add(amount).ok_or_else(|| {
			DepositError::BalanceOverflow {
				account_id: self.id.clone(),
				amount,
			}
		})?;
		Ok(self.balance)
	}
}

/// Result of crediting a deposit to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
	/// The deposit was added to this account, leaving it at `balance`.
	Applied { account_id: AccountId, balance: Decimal },
	/// No account has the sender's wallet bound.
	NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum DepositError {
	#[error("Decode error: {0}")]
	DecodeError(String),

	#[error("Store error: {0}")]
	StoreError(String),

	#[error("Scan error: {0}")]
	ScanError(String),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),

	#[error("Timed out after {after:?} waiting for {operation}")]
	TimeoutError {
		operation: &'static str,
		after: Duration,
	},

	#[error("Crediting {amount} to account {account_id} would overflow its balance")]
	BalanceOverflow { account_id: AccountId, amount: Decimal },

	#[error("Config error: {0}")]
	ConfigError(String),

	#[error("Chain error: {0}")]
	ChainError(#[from] ChainError),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}
