use std::future::Future;
use std::time::Duration;

use crate::deposit::DepositError;

/// Await an external call, giving up after `limit`.
///
/// The inner error is converted into `DepositError` so callers can use `?` on the result
/// whichever layer the call came from.
pub async fn with_timeout<T, E, F>(
	limit: Duration,
	operation: &'static str,
	call: F,
) -> Result<T, DepositError>
where
	F: Future<Output = Result<T, E>>,
	E: Into<DepositError>,
{
	match tokio::time::timeout(limit, call).await {
		Ok(result) => result.map_err(Into::into),
		Err(_) => Err(DepositError::TimeoutError {
			operation,
			after: limit,
		}),
	}
}
