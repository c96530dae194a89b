//! Liveness surface for external uptime monitors.
//!
//! `serve` answers `GET /` with a static message and `GET /status` with whether the live
//! watcher is currently attached. `SelfPinger` periodically requests a
//! configured URL, typically this service's own public address, so hosts that idle
//! unvisited services keep it running. Neither affects ledger correctness.

use crate::deposit::DepositError;
use crate::deposit::live::WatcherState;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const KEEP_ALIVE_MESSAGE: &str = "Deposit reconciler is running";

#[derive(Debug, Serialize)]
pub struct StatusReport {
	pub live_watcher: WatcherState,
}

pub fn router(watcher_state: watch::Receiver<WatcherState>) -> Router {
	Router::new()
		.route("/", get(keep_alive))
		.route("/status", get(status))
		.with_state(watcher_state)
}

async fn keep_alive() -> &'static str {
	KEEP_ALIVE_MESSAGE
}

async fn status(State(watcher_state): State<watch::Receiver<WatcherState>>) -> Json<StatusReport> {
	let live_watcher = *watcher_state.borrow();
	Json(StatusReport { live_watcher })
}

/// Serve the keep-alive endpoints until the stop signal fires.
pub async fn serve(
	listener: TcpListener,
	watcher_state: watch::Receiver<WatcherState>,
	mut stop_receiver: watch::Receiver<bool>,
) -> Result<(), DepositError> {
	info!("Keep-alive endpoint listening on {}", listener.local_addr()?);
	axum::serve(listener, router(watcher_state))
		.with_graceful_shutdown(async move {
			let _ = stop_receiver.changed().await;
		})
		.await?;
	Ok(())
}

/// Periodic HTTP probe of an external URL.
pub struct SelfPinger {
	client: reqwest::Client,
	target_url: String,
}

impl SelfPinger {
	pub fn new(target_url: String, request_timeout: Duration) -> Result<Self, DepositError> {
		let client = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| DepositError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self { client, target_url })
	}

	pub async fn ping(&self) -> Result<reqwest::StatusCode, reqwest::Error> {
		Ok(self.client.get(&self.target_url).send().await?.status())
	}

	/// Ping once and log the result. Failures are never fatal.
	pub async fn probe(&self) -> bool {
		match self.ping().await {
			Ok(status) if status.is_success() => {
				debug!("Keep-alive probe to {} returned {}", self.target_url, status);
				true
			}
			Ok(status) => {
				warn!("Keep-alive probe to {} returned {}", self.target_url, status);
				false
			}
			Err(e) => {
				warn!("Keep-alive probe to {} failed: {}", self.target_url, e);
				false
			}
		}
	}

	/// Probe immediately, then every `interval` until stopped.
	pub async fn run(self, interval: Duration, mut stop_receiver: watch::Receiver<bool>) {
		let mut timer = tokio::time::interval(interval);
		timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		while !*stop_receiver.borrow_and_update() {
			tokio::select! {
				_ = timer.tick() => { /* continue iterations */ }
				_ = stop_receiver.changed() => break,
			}
			self.probe().await;
		}
	}
}
