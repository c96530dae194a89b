//!
//! Utility module for the deposit reconciler.
//!
//! Address normalization and bounded-call helpers shared by the chain client and the engine.
/// Address normalization and topic encoding
pub mod address;
/// Bounded waits on external calls
pub mod timeout;

pub use address::normalize_address;
pub use timeout::with_timeout;
