//! In-memory fakes shared by the engine's unit tests.

use crate::chain::{ChainError, ChainProvider, RawTransfer, TransferStream};
use crate::deposit::checkpoint::{CheckpointStore, CheckpointTracker};
use crate::deposit::context::DepositContext;
use crate::deposit::decoder::EventDecoder;
use crate::deposit::ledger::{AccountStore, BalanceLedger};
use crate::deposit::live::LiveWatcher;
use crate::deposit::processor::DepositProcessor;
use crate::deposit::reconciler::Reconciler;
use crate::deposit::{Account, DepositError, DepositEvent};
use crate::utils::normalize_address;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const WALLET: &str = "0xabc0000000000000000000000000000000000001";
pub const OTHER_WALLET: &str = "0xdef0000000000000000000000000000000000002";
pub const RECEIVING: &str = "0x5550000000000000000000000000000000000005";

/// A transfer from `from` to the receiving address.
pub fn transfer(
	from: &str,
	raw_amount: &str,
	block_number: u64,
	transaction_hash: &str,
	log_index: u64,
) -> RawTransfer {
	RawTransfer {
		from: from.to_string(),
		to: RECEIVING.to_string(),
		raw_amount: raw_amount.to_string(),
		block_number,
		transaction_hash: transaction_hash.to_string(),
		log_index,
	}
}

/// An already decoded deposit of `amount` whole tokens.
pub fn deposit(
	from: &str,
	amount: &str,
	block_number: u64,
	transaction_hash: &str,
	log_index: u64,
) -> DepositEvent {
	DepositEvent {
		from_address: normalize_address(from),
		amount: Decimal::from_str(amount).unwrap(),
		block_number,
		transaction_hash: transaction_hash.to_string(),
		log_index,
	}
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
	for _ in 0..200 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition not met within 2s");
}

#[derive(Default)]
struct CheckpointState {
	value: Option<u64>,
	writes: Vec<u64>,
	fail_reads: bool,
	fail_writes: bool,
}

/// Checkpoint store that records every write.
#[derive(Default)]
pub struct RecordingCheckpointStore {
	state: Mutex<CheckpointState>,
}

impl RecordingCheckpointStore {
	pub fn with_value(block_number: u64) -> Self {
		let store = Self::default();
		store.state.lock().unwrap().value = Some(block_number);
		store
	}

	pub fn value(&self) -> Option<u64> {
		self.state.lock().unwrap().value
	}

	pub fn writes(&self) -> Vec<u64> {
		self.state.lock().unwrap().writes.clone()
	}

	pub fn fail_reads(&self, fail: bool) {
		self.state.lock().unwrap().fail_reads = fail;
	}

	pub fn fail_writes(&self, fail: bool) {
		self.state.lock().unwrap().fail_writes = fail;
	}
}

#[async_trait::async_trait]
impl CheckpointStore for RecordingCheckpointStore {
	async fn read(&self) -> Result<Option<u64>, DepositError> {
		let state = self.state.lock().unwrap();
		if state.fail_reads {
			return Err(DepositError::StoreError("checkpoint unavailable".to_string()));
		}
		Ok(state.value)
	}

	async fn write(&self, block_number: u64) -> Result<(), DepositError> {
		let mut state = self.state.lock().unwrap();
		if state.fail_writes {
			return Err(DepositError::StoreError("checkpoint unavailable".to_string()));
		}
		state.value = Some(block_number);
		state.writes.push(block_number);
		Ok(())
	}
}

#[derive(Default)]
struct AccountState {
	accounts: Vec<Account>,
	saves: Vec<Account>,
	fail_saves: bool,
	panic_credit: bool,
}

/// Account store that keeps every saved record.
#[derive(Default)]
pub struct MemoryAccountStore {
	state: Mutex<AccountState>,
}

impl MemoryAccountStore {
	/// Add `account` to the directory, replacing any record with the same id in place.
	pub fn insert(&self, account: Account) {
		let mut state = self.state.lock().unwrap();
		match state.accounts.iter_mut().find(|a| a.id == account.id) {
			Some(existing) => *existing = account,
			None => state.accounts.push(account),
		}
	}

	/// Current record for `account_id`.
	pub fn saved(&self, account_id: &str) -> Option<Account> {
		let state = self.state.lock().unwrap();
		state.accounts.iter().find(|a| a.id == account_id).cloned()
	}

	/// Balance after every credit written to `account_id`, in order.
	pub fn balance_history(&self, account_id: &str) -> Vec<Decimal> {
		let state = self.state.lock().unwrap();
		state
			.saves
			.iter()
			.filter(|a| a.id == account_id)
			.map(|a| a.balance)
			.collect()
	}

	pub fn fail_saves(&self, fail: bool) {
		self.state.lock().unwrap().fail_saves = fail;
	}

	/// Make the next credit panic before touching any record.
	pub fn panic_next_credit(&self) {
		self.state.lock().unwrap().panic_credit = true;
	}
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
	async fn load_accounts(&self) -> Result<Vec<Account>, DepositError> {
		Ok(self.state.lock().unwrap().accounts.clone())
	}

	async fn apply_credit(
		&self,
		account_id: &str,
		wallet_address: &str,
		amount: Decimal,
	) -> Result<Option<Account>, DepositError> {
		let panic_now = std::mem::take(&mut self.state.lock().unwrap().panic_credit);
		if panic_now {
			panic!("account store panicked");
		}
		let mut state = self.state.lock().unwrap();
		if state.fail_saves {
			return Err(DepositError::StoreError("account store unavailable".to_string()));
		}
		let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) else {
			return Ok(None);
		};
		if !account.is_bound_to(wallet_address) {
			return Ok(None);
		}
		account.credit(amount)?;
		let updated = account.clone();
		state.saves.push(updated.clone());
		Ok(Some(updated))
	}
}

type LiveSender = mpsc::UnboundedSender<Result<RawTransfer, ChainError>>;

#[derive(Default)]
struct ChainState {
	head: u64,
	transfers: Vec<RawTransfer>,
	queries: Vec<(u64, u64)>,
	fail_queries_from: Option<u64>,
	fail_head: bool,
	fail_subscribe: bool,
	panic_head: bool,
	panic_subscribe: bool,
	subscribe_attempts: usize,
	subscriptions: usize,
	live: Option<LiveSender>,
	gate: Option<Arc<Notify>>,
}

/// Scriptable chain provider.
#[derive(Default)]
pub struct FakeChain {
	state: Mutex<ChainState>,
}

impl FakeChain {
	pub fn set_head(&self, head: u64) {
		self.state.lock().unwrap().head = head;
	}

	pub fn add_transfer(&self, transfer: RawTransfer) {
		self.state.lock().unwrap().transfers.push(transfer);
	}

	/// Every `(from_block, to_block)` range queried so far, failed ones included.
	pub fn queries(&self) -> Vec<(u64, u64)> {
		self.state.lock().unwrap().queries.clone()
	}

	/// Fail every query starting at or after `block_number`.
	pub fn fail_queries_from(&self, block_number: u64) {
		self.state.lock().unwrap().fail_queries_from = Some(block_number);
	}

	pub fn fail_head(&self, fail: bool) {
		self.state.lock().unwrap().fail_head = fail;
	}

	pub fn fail_subscribe(&self, fail: bool) {
		self.state.lock().unwrap().fail_subscribe = fail;
	}

	/// Make the next head lookup panic.
	pub fn panic_next_head(&self) {
		self.state.lock().unwrap().panic_head = true;
	}

	/// Make the next subscribe attempt panic.
	pub fn panic_next_subscribe(&self) {
		self.state.lock().unwrap().panic_subscribe = true;
	}

	pub fn clear_failures(&self) {
		let mut state = self.state.lock().unwrap();
		state.fail_queries_from = None;
		state.fail_head = false;
		state.fail_subscribe = false;
	}

	/// Park the next query after it is recorded, until the returned handle is notified.
	pub fn hold_queries(&self) -> Arc<Notify> {
		let gate = Arc::new(Notify::new());
		self.state.lock().unwrap().gate = Some(gate.clone());
		gate
	}

	pub fn push_live(&self, transfer: RawTransfer) {
		self.send_live(Ok(transfer));
	}

	pub fn push_live_error(&self, error: ChainError) {
		self.send_live(Err(error));
	}

	/// End the current subscription's stream.
	pub fn close_live(&self) {
		self.state.lock().unwrap().live = None;
	}

	/// Number of subscriptions successfully opened.
	pub fn subscription_count(&self) -> usize {
		self.state.lock().unwrap().subscriptions
	}

	pub fn subscribe_attempts(&self) -> usize {
		self.state.lock().unwrap().subscribe_attempts
	}

	fn send_live(&self, item: Result<RawTransfer, ChainError>) {
		let state = self.state.lock().unwrap();
		let sender = state.live.as_ref().expect("no live subscription");
		sender.send(item).expect("live subscription dropped");
	}
}

#[async_trait::async_trait]
impl ChainProvider for FakeChain {
	async fn current_block_height(&self) -> Result<u64, ChainError> {
		let panic_now = std::mem::take(&mut self.state.lock().unwrap().panic_head);
		if panic_now {
			panic!("head lookup panicked");
		}
		let state = self.state.lock().unwrap();
		if state.fail_head {
			return Err(ChainError::RpcError {
				code: -32000,
				message: "head unavailable".to_string(),
			});
		}
		Ok(state.head)
	}

	async fn query_transfer_events(
		&self,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawTransfer>, ChainError> {
		let (result, gate) = {
			let mut state = self.state.lock().unwrap();
			state.queries.push((from_block, to_block));

			let result = if state
				.fail_queries_from
				.is_some_and(|failing| from_block >= failing)
			{
				Err(ChainError::RpcError {
					code: -32005,
					message: "query failed".to_string(),
				})
			} else {
				let to_address = normalize_address(to_address);
				let mut transfers: Vec<RawTransfer> = state
					.transfers
					.iter()
					.filter(|t| {
						(from_block..=to_block).contains(&t.block_number)
							&& normalize_address(&t.to) == to_address
					})
					.cloned()
					.collect();
				transfers.sort_by_key(|t| (t.block_number, t.log_index));
				Ok(transfers)
			};
			(result, state.gate.take())
		};

		if let Some(gate) = gate {
			gate.notified().await;
		}
		result
	}

	async fn subscribe_transfers(&self, _to_address: &str) -> Result<TransferStream, ChainError> {
		let panic_now = {
			let mut state = self.state.lock().unwrap();
			state.subscribe_attempts += 1;
			std::mem::take(&mut state.panic_subscribe)
		};
		if panic_now {
			panic!("subscribe panicked");
		}
		let mut state = self.state.lock().unwrap();
		if state.fail_subscribe {
			return Err(ChainError::RpcError {
				code: -32000,
				message: "subscriptions unavailable".to_string(),
			});
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		state.live = Some(sender);
		state.subscriptions += 1;

		let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
			receiver.recv().await.map(|item| (item, receiver))
		});
		Ok(Box::pin(stream))
	}
}

/// A fully wired engine over in-memory fakes.
pub struct Harness {
	pub chain: Arc<FakeChain>,
	pub checkpoint_store: Arc<RecordingCheckpointStore>,
	pub account_store: Arc<MemoryAccountStore>,
	pub context: Arc<DepositContext>,
}

impl Harness {
	/// Engine with no transfer dedupe, starting from `checkpoint`.
	pub fn new(checkpoint: Option<u64>) -> Self {
		Self::build(checkpoint, false)
	}

	pub fn with_dedupe(checkpoint: Option<u64>) -> Self {
		Self::build(checkpoint, true)
	}

	fn build(checkpoint: Option<u64>, dedupe_transfers: bool) -> Self {
		let call_timeout = Duration::from_secs(5);
		let chain = Arc::new(FakeChain::default());
		let checkpoint_store = Arc::new(match checkpoint {
			Some(block_number) => RecordingCheckpointStore::with_value(block_number),
			None => RecordingCheckpointStore::default(),
		});
		let account_store = Arc::new(MemoryAccountStore::default());
		let ledger = Arc::new(BalanceLedger::new(account_store.clone(), call_timeout));

		let context = Arc::new(DepositContext::new(
			chain.clone(),
			Arc::new(CheckpointTracker::new(
				checkpoint_store.clone(),
				call_timeout,
			)),
			Arc::new(DepositProcessor::new(ledger.clone(), dedupe_transfers)),
			EventDecoder::new(18).unwrap(),
			RECEIVING,
			call_timeout,
		));

		Self {
			chain,
			checkpoint_store,
			account_store,
			context,
		}
	}

	pub fn with_account(self, account_id: &str, wallet_address: Option<&str>) -> Self {
		self.account_store
			.insert(Account::new(account_id, wallet_address));
		self
	}

	/// Give `account_id` a starting balance.
	pub fn with_balance(self, account_id: &str, wallet_address: &str, balance: Decimal) -> Self {
		let mut account = Account::new(account_id, Some(wallet_address));
		account.balance = balance;
		self.account_store.insert(account);
		self
	}

	pub fn balance(&self, account_id: &str) -> Decimal {
		self.account_store
			.saved(account_id)
			.map(|account| account.balance)
			.unwrap_or(Decimal::ZERO)
	}

	pub fn reconciler(&self, max_blocks_per_query: u64) -> Reconciler {
		Reconciler::new(self.context.clone(), max_blocks_per_query)
	}

	pub fn watcher(&self) -> LiveWatcher {
		LiveWatcher::new(self.context.clone(), 16)
	}
}
