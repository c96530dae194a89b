//! Deposit reconciliation engine.
//!
//! Transfers to the receiving address reach the ledger through two paths. The reconciler
//! periodically backfills every block since the checkpoint; the live watcher credits
//! transfers as they are mined. Both decode with the same [`decoder::EventDecoder`], credit
//! through the same [`processor::DepositProcessor`] and advance the same checkpoint.

pub mod checkpoint;
pub mod context;
pub mod decoder;
pub mod ledger;
pub mod live;
pub mod processor;
pub mod reconciler;
pub mod scheduler;
pub mod types;

pub use types::*;
