//! Service configuration, read from `DEPOSIT_`-prefixed environment variables.

use crate::deposit::DepositError;
use crate::deposit::decoder::MAX_TOKEN_DECIMALS;
use crate::utils::address::is_valid_address;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "DEPOSIT_";

#[derive(Debug, Clone, Deserialize)]
pub struct DepositConfig {
	/// HTTP JSON-RPC endpoint of the EVM node.
	pub rpc_url: String,
	/// WebSocket endpoint for subscriptions. Derived from `rpc_url` when unset.
	#[serde(default)]
	pub rpc_ws_url: Option<String>,
	/// ERC-20 contract whose transfers count as deposits.
	pub token_contract: String,
	/// The service's own receiving address.
	pub receiving_address: String,
	#[serde(default = "default_token_decimals")]
	pub token_decimals: u32,
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	#[serde(default = "default_scan_interval_secs")]
	pub scan_interval_secs: u64,
	#[serde(default = "default_keep_alive_interval_secs")]
	pub keep_alive_interval_secs: u64,
	/// URL probed to keep the host from idling the service. Disabled when unset.
	#[serde(default)]
	pub self_ping_url: Option<String>,
	#[serde(default = "default_port")]
	pub port: u16,
	#[serde(default = "default_call_timeout_secs")]
	pub call_timeout_secs: u64,
	#[serde(default = "default_max_blocks_per_query")]
	pub max_blocks_per_query: u64,
	#[serde(default = "default_subscription_buffer")]
	pub subscription_buffer: usize,
	/// First delay between failed live attach attempts, doubling up to the max.
	#[serde(default = "default_live_retry_initial_secs")]
	pub live_retry_initial_secs: u64,
	#[serde(default = "default_live_retry_max_secs")]
	pub live_retry_max_secs: u64,
	/// Drop transfers already applied by the other ingestion path.
	#[serde(default)]
	pub dedupe_transfers: bool,
	/// Overwrite the checkpoint with this block at startup, before any pass runs.
	#[serde(default)]
	pub reset_checkpoint: Option<u64>,
}

fn default_token_decimals() -> u32 {
	18
}

fn default_data_dir() -> PathBuf {
	PathBuf::from("./data")
}

fn default_scan_interval_secs() -> u64 {
	4 * 60 * 60
}

fn default_keep_alive_interval_secs() -> u64 {
	5 * 60
}

fn default_port() -> u16 {
	3000
}

fn default_call_timeout_secs() -> u64 {
	30
}

fn default_max_blocks_per_query() -> u64 {
	5000
}

fn default_subscription_buffer() -> usize {
	1024
}

fn default_live_retry_initial_secs() -> u64 {
	1
}

fn default_live_retry_max_secs() -> u64 {
	60
}

impl DepositConfig {
	/// Load and validate the configuration from the process environment.
	pub fn from_env() -> Result<Self, DepositError> {
		let config: Self = envy::prefixed(ENV_PREFIX)
			.from_env()
			.map_err(|e| DepositError::ConfigError(format!("Cannot load config: {}", e)))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), DepositError> {
		if self.scan_interval_secs == 0 {
			return Err(DepositError::ConfigError(
				"scan_interval_secs must be positive".to_string(),
			));
		}
		if self.keep_alive_interval_secs == 0 {
			return Err(DepositError::ConfigError(
				"keep_alive_interval_secs must be positive".to_string(),
			));
		}
		if self.call_timeout_secs == 0 {
			return Err(DepositError::ConfigError(
				"call_timeout_secs must be positive".to_string(),
			));
		}
		if self.max_blocks_per_query == 0 {
			return Err(DepositError::ConfigError(
				"max_blocks_per_query must be positive".to_string(),
			));
		}
		if self.live_retry_initial_secs == 0 {
			return Err(DepositError::ConfigError(
				"live_retry_initial_secs must be positive".to_string(),
			));
		}
		if self.live_retry_max_secs < self.live_retry_initial_secs {
			return Err(DepositError::ConfigError(format!(
				"live_retry_max_secs {} is below live_retry_initial_secs {}",
				self.live_retry_max_secs, self.live_retry_initial_secs
			)));
		}
		if self.token_decimals > MAX_TOKEN_DECIMALS {
			return Err(DepositError::ConfigError(format!(
				"token_decimals {} exceeds the supported maximum of {}",
				self.token_decimals, MAX_TOKEN_DECIMALS
			)));
		}
		for (name, address) in [
			("token_contract", &self.token_contract),
			("receiving_address", &self.receiving_address),
		] {
			if !is_valid_address(address) {
				return Err(DepositError::ConfigError(format!(
					"{} is not a 20-byte hex address: {}",
					name, address
				)));
			}
		}
		self.ws_url()?;
		Ok(())
	}

	/// WebSocket endpoint, falling back to the HTTP endpoint with its scheme swapped.
	pub fn ws_url(&self) -> Result<String, DepositError> {
		if let Some(url) = &self.rpc_ws_url {
			return Ok(url.clone());
		}
		if let Some(rest) = self.rpc_url.strip_prefix("https://") {
			return Ok(format!("wss://{}", rest));
		}
		if let Some(rest) = self.rpc_url.strip_prefix("http://") {
			return Ok(format!("ws://{}", rest));
		}
		Err(DepositError::ConfigError(format!(
			"Cannot derive a WebSocket endpoint from {}; set {}RPC_WS_URL",
			self.rpc_url, ENV_PREFIX
		)))
	}

	pub fn scan_interval(&self) -> Duration {
		Duration::from_secs(self.scan_interval_secs)
	}

	pub fn keep_alive_interval(&self) -> Duration {
		Duration::from_secs(self.keep_alive_interval_secs)
	}

	pub fn call_timeout(&self) -> Duration {
		Duration::from_secs(self.call_timeout_secs)
	}

	/// Initial and maximum delay between live attach attempts.
	pub fn live_retry(&self) -> (Duration, Duration) {
		(
			Duration::from_secs(self.live_retry_initial_secs),
			Duration::from_secs(self.live_retry_max_secs),
		)
	}
}
