//! Drives both ingestion paths for the lifetime of the process.
//!
//! `bootstrap` runs one reconciliation pass before the service reports ready. `run` then keeps
//! the live watcher attached, fires keep-alive probes and repeats the reconciliation pass on
//! a fixed interval until the stop signal. Each pass runs on its own task so a failure or
//! panic inside it is logged and the next tick proceeds as usual. The watcher task is
//! supervised the same way: if it dies it is marked detached and started again.

use crate::deposit::live::LiveWatcher;
use crate::deposit::reconciler::{Reconciler, ScanOutcome};
use crate::keepalive::SelfPinger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct Scheduler {
	reconciler: Arc<Reconciler>,
	watcher: Arc<LiveWatcher>,
	pinger: Option<SelfPinger>,
	scan_interval: Duration,
	keep_alive_interval: Duration,
}

impl Scheduler {
	pub fn new(
		reconciler: Reconciler,
		watcher: LiveWatcher,
		pinger: Option<SelfPinger>,
		scan_interval: Duration,
		keep_alive_interval: Duration,
	) -> Self {
		Self {
			reconciler: Arc::new(reconciler),
			watcher: Arc::new(watcher),
			pinger,
			scan_interval,
			keep_alive_interval,
		}
	}

	/// Startup pass. Completes before the service is considered ready.
	pub async fn bootstrap(&self) -> Option<ScanOutcome> {
		info!("Running startup reconciliation pass");
		self.reconcile().await
	}

	pub async fn run(self, mut stop_receiver: watch::Receiver<bool>) {
		let Self {
			reconciler,
			watcher,
			pinger,
			scan_interval,
			keep_alive_interval,
		} = self;

		let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
		tasks.push((
			"live watcher",
			tokio::spawn(supervise_watcher(watcher, stop_receiver.clone())),
		));
		if let Some(pinger) = pinger {
			tasks.push((
				"keep-alive",
				tokio::spawn(pinger.run(keep_alive_interval, stop_receiver.clone())),
			));
		}

		// The startup pass already covered the first tick
		let mut timer =
			tokio::time::interval_at(tokio::time::Instant::now() + scan_interval, scan_interval);
		timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		while !*stop_receiver.borrow_and_update() {
			tokio::select! {
				_ = timer.tick() => { /* continue iterations */ }
				_ = stop_receiver.changed() => break,
			}
			run_pass(&reconciler).await;
		}

		for (name, task) in tasks {
			if let Err(e) = task.await {
				error!("{} task failed: {}", name, e);
			}
		}
		info!("Stop signal received, scheduler is shutting down");
	}

	async fn reconcile(&self) -> Option<ScanOutcome> {
		run_pass(&self.reconciler).await
	}
}

/// Keep a watcher task running until the stop signal, restarting it if it dies.
async fn supervise_watcher(watcher: Arc<LiveWatcher>, mut stop_receiver: watch::Receiver<bool>) {
	loop {
		let task = tokio::spawn(watcher.clone().run(stop_receiver.clone()));
		let Err(e) = task.await else {
			return;
		};

		watcher.mark_detached();
		if *stop_receiver.borrow_and_update() {
			return;
		}
		error!("Live watcher task failed, restarting it: {}", e);

		tokio::select! {
			_ = tokio::time::sleep(watcher.restart_delay()) => {}
			_ = stop_receiver.changed() => return,
		}
	}
}

/// Run one pass on its own task, logging any failure.
async fn run_pass(reconciler: &Arc<Reconciler>) -> Option<ScanOutcome> {
	let reconciler = reconciler.clone();
	match tokio::spawn(async move { reconciler.run_once().await }).await {
		Ok(Ok(outcome)) => Some(outcome),
		Ok(Err(e)) => {
			error!(
				"Reconciliation pass failed, checkpoint left for the next pass: {}",
				e
			);
			None
		}
		Err(e) => {
			error!("Reconciliation pass aborted: {}", e);
			None
		}
	}
}
