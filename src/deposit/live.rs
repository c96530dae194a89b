//! Live ingestion of transfers as they are mined.
//!
//! The watcher subscribes to the provider's transfer feed. A pump task decodes notifications
//! onto a bounded channel, and a processing loop credits each deposit and advances the
//! checkpoint to its block. A notification that fails to decode or apply is logged and
//! skipped; a deposit the ledger rejects outright still moves the checkpoint so it is not
//! retried forever. The watcher only detaches when the feed itself ends. Nothing is replayed on
//! re-attach; transfers mined while detached are recovered by the next backfill pass.

use crate::chain::TransferStream;
use crate::deposit::context::DepositContext;
use crate::deposit::decoder::EventDecoder;
use crate::deposit::{DepositError, DepositEvent};
use crate::utils::with_timeout;
use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
	Detached,
	Attached,
}

/// An attached transfer feed.
///
/// Dropping or cancelling the subscription stops the pump task and with it the underlying
/// provider stream.
pub struct Subscription {
	events: mpsc::Receiver<DepositEvent>,
	pump: JoinHandle<()>,
}

impl Subscription {
	/// Next decoded deposit, or `None` once the feed has ended.
	pub async fn next(&mut self) -> Option<DepositEvent> {
		self.events.recv().await
	}

	pub fn cancel(&self) {
		self.pump.abort();
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.pump.abort();
	}
}

/// Push-based ingestion path.
pub struct LiveWatcher {
	context: Arc<DepositContext>,
	buffer: usize,
	state: watch::Sender<WatcherState>,
	retry_initial: Duration,
	retry_max: Duration,
}

impl LiveWatcher {
	pub fn new(context: Arc<DepositContext>, buffer: usize) -> Self {
		let (state, _) = watch::channel(WatcherState::Detached);
		Self {
			context,
			buffer: buffer.max(1),
			state,
			retry_initial: Duration::from_secs(1),
			retry_max: Duration::from_secs(60),
		}
	}

	/// Bounds for the delay between failed attach attempts.
	pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
		self.retry_initial = initial;
		self.retry_max = max.max(initial);
		self
	}

	pub fn state(&self) -> watch::Receiver<WatcherState> {
		self.state.subscribe()
	}

	/// Record that the watcher is no longer attached, for when its task died mid-feed.
	pub(crate) fn mark_detached(&self) {
		self.state.send_replace(WatcherState::Detached);
	}

	/// Delay before restarting a watcher task that died.
	pub(crate) fn restart_delay(&self) -> Duration {
		self.retry_initial
	}

	/// Open a subscription and start pumping decoded deposits into it.
	pub async fn attach(&self) -> Result<Subscription, DepositError> {
		let stream = with_timeout(
			self.context.call_timeout,
			"transfer subscription",
			self.context
				.provider
				.subscribe_transfers(&self.context.receiving_address),
		)
		.await
		.map_err(|e| DepositError::SubscriptionError(e.to_string()))?;

		let (sender, events) = mpsc::channel(self.buffer);
		let pump = tokio::spawn(pump_transfers(stream, self.context.decoder, sender));

		self.state.send_replace(WatcherState::Attached);
		info!(
			"Live watcher attached for deposits to {}",
			self.context.receiving_address
		);
		Ok(Subscription { events, pump })
	}

	/// Process deposits until the feed ends or a stop is requested.
	///
	/// Returns `true` if it returned because of the stop signal.
	pub async fn consume(
		&self,
		mut subscription: Subscription,
		stop_receiver: &mut watch::Receiver<bool>,
	) -> bool {
		loop {
			tokio::select! {
				event = subscription.next() => match event {
					Some(event) => self.handle_event(&event).await,
					None => {
						self.state.send_replace(WatcherState::Detached);
						warn!("Live transfer feed ended, watcher detached");
						return false;
					}
				},
				_ = stop_receiver.changed() => {
					subscription.cancel();
					self.state.send_replace(WatcherState::Detached);
					return true;
				}
			}
		}
	}

	/// Credit one live deposit, then move the checkpoint to its block.
	pub async fn handle_event(&self, event: &DepositEvent) {
		match self.context.processor.apply(event).await {
			Ok(_) => {}
			Err(e @ DepositError::BalanceOverflow { .. }) => warn!(
				"Skipping live deposit {}:{} at block {}: {}",
				event.transaction_hash, event.log_index, event.block_number, e
			),
			Err(e) => {
				error!(
					"Failed to apply live deposit {}:{} at block {}: {}",
					event.transaction_hash, event.log_index, event.block_number, e
				);
				return;
			}
		}

		if let Err(e) = self.context.checkpoint.advance(event.block_number).await {
			error!(
				"Failed to advance checkpoint to block {}: {}",
				event.block_number, e
			);
		}
	}

	/// Keep the watcher attached until stopped, re-attaching whenever the feed closes.
	pub async fn run(self: Arc<Self>, mut stop_receiver: watch::Receiver<bool>) {
		while !*stop_receiver.borrow_and_update() {
			let Some(subscription) = self.attach_with_backoff(&mut stop_receiver).await else {
				break;
			};
			if self.consume(subscription, &mut stop_receiver).await {
				break;
			}
			info!("Re-attaching live watcher; transfers missed meanwhile are left to the next backfill pass");
		}

		self.state.send_replace(WatcherState::Detached);
		info!("Stop signal received, live watcher is shutting down");
	}

	async fn attach_with_backoff(
		&self,
		stop_receiver: &mut watch::Receiver<bool>,
	) -> Option<Subscription> {
		let policy = ExponentialBackoff {
			initial_interval: self.retry_initial,
			max_interval: self.retry_max,
			max_elapsed_time: None,
			..Default::default()
		};

		let watcher = self;
		let attach = backoff::future::retry(policy, move || async move {
			watcher.attach().await.map_err(|e| {
				warn!("Failed to attach live watcher: {}", e);
				backoff::Error::transient(e)
			})
		});

		tokio::select! {
			result = attach => result.ok(),
			_ = stop_receiver.changed() => None,
		}
	}
}

/// Decode provider notifications onto the channel until the feed ends or drops.
async fn pump_transfers(
	mut stream: TransferStream,
	decoder: EventDecoder,
	sender: mpsc::Sender<DepositEvent>,
) {
	while let Some(item) = stream.next().await {
		match item {
			Ok(transfer) => match decoder.decode(&transfer) {
				Ok(event) => {
					debug!(
						"Live deposit {}:{} at block {}",
						event.transaction_hash, event.log_index, event.block_number
					);
					if sender.send(event).await.is_err() {
						return;
					}
				}
				Err(e) => warn!(
					"Skipping live transfer {}:{} at block {}: {}",
					transfer.transaction_hash, transfer.log_index, transfer.block_number, e
				),
			},
			Err(e) if e.is_fatal() => {
				error!("Live transfer feed dropped: {}", e);
				return;
			}
			Err(e) => warn!("Skipping bad live notification: {}", e),
		}
	}
	debug!("Live transfer feed completed");
}
