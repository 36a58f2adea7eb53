//! Credits synchronization.
//!
//! Keeps a single authoritative balance for the signed-in user or their
//! organization. The balance is resolved whenever the auth token changes,
//! refreshed by a poll timer, and overridden by `credits:updated` messages
//! from the push channel when one is connected.
//!
//! # Consistency
//!
//! ```text
//! token change ──▶ generation += 1 (older results dropped)
//! poll / push  ──▶ sequence number (older than last applied → dropped)
//! ```

mod resolve;
mod synchronizer;
mod types;

pub use resolve::resolve_balance;
pub use synchronizer::{CreditsHandle, CreditsSynchronizer, SyncConfig, DEFAULT_POLL_INTERVAL};
pub use types::{BalanceState, CreditsSnapshot, SyncError};
