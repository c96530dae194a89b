mod chain;
mod config;
mod deposit;
mod keepalive;
mod utils;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::chain::EvmRpcClient;
use crate::config::DepositConfig;
use crate::deposit::DepositError;
use crate::deposit::checkpoint::{CheckpointTracker, FileCheckpointStore};
use crate::deposit::context::DepositContext;
use crate::deposit::decoder::EventDecoder;
use crate::deposit::ledger::{FileAccountStore, open_ledger};
use crate::deposit::live::LiveWatcher;
use crate::deposit::processor::DepositProcessor;
use crate::deposit::reconciler::Reconciler;
use crate::deposit::scheduler::Scheduler;
use crate::keepalive::SelfPinger;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting deposit reconciler");

	let config = match DepositConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Failed to load configuration: {}", e);
			return;
		}
	};

	if let Err(e) = run(config).await {
		error!("Deposit reconciler stopped: {}", e);
	}
}

async fn run(config: DepositConfig) -> Result<(), DepositError> {
	let call_timeout = config.call_timeout();

	let provider = Arc::new(EvmRpcClient::new(
		config.rpc_url.clone(),
		config.ws_url()?,
		&config.token_contract,
		call_timeout,
	)?);
	info!("Created chain client for {}", config.rpc_url);

	let ledger = Arc::new(
		open_ledger(
			Arc::new(FileAccountStore::new(config.data_dir.clone())),
			call_timeout,
		)
		.await?,
	);

	let checkpoint = Arc::new(CheckpointTracker::new(
		Arc::new(FileCheckpointStore::new(config.data_dir.clone())),
		call_timeout,
	));
	if let Some(block_number) = config.reset_checkpoint {
		checkpoint.reset(block_number).await?;
	}

	let context = Arc::new(DepositContext::new(
		provider,
		checkpoint,
		Arc::new(DepositProcessor::new(ledger, config.dedupe_transfers)),
		EventDecoder::new(config.token_decimals)?,
		&config.receiving_address,
		call_timeout,
	));

	let pinger = config
		.self_ping_url
		.clone()
		.map(|url| SelfPinger::new(url, call_timeout))
		.transpose()?;

	let (retry_initial, retry_max) = config.live_retry();
	let watcher = LiveWatcher::new(context.clone(), config.subscription_buffer)
		.with_retry(retry_initial, retry_max);
	let watcher_state = watcher.state();

	let scheduler = Scheduler::new(
		Reconciler::new(context, config.max_blocks_per_query),
		watcher,
		pinger,
		config.scan_interval(),
		config.keep_alive_interval(),
	);

	// Startup pass completes before the service reports ready
	scheduler.bootstrap().await;

	let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
	let (stop_sender, stop_receiver) = watch::channel(false);
	let server = tokio::spawn(keepalive::serve(
		listener,
		watcher_state,
		stop_receiver.clone(),
	));
	let scheduler_task = tokio::spawn(scheduler.run(stop_receiver));

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}
	info!("Shutdown requested");
	let _ = stop_sender.send(true);

	match server.await {
		Ok(Ok(())) => {}
		Ok(Err(e)) => error!("Keep-alive server failed: {}", e),
		Err(e) => error!("Keep-alive server task failed: {}", e),
	}
	if let Err(e) = scheduler_task.await {
		error!("Scheduler task failed: {}", e);
	}

	info!("Deposit reconciler stopped");
	Ok(())
}
