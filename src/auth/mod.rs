//! Authentication state: the token every other component keys off.
//!
//! `AuthSession` restores a persisted session at startup and publishes the
//! current token over a watch channel. Login stores the new token before
//! publishing it; logout publishes `None` first so subscribers stop using the
//! old token immediately, then clears storage.

mod session;
mod store;

pub use session::AuthSession;
pub use store::{CredentialStore, KeyringStore, MemoryStore, StoredSession};

use crate::api::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Credential storage failed
    #[error("Credential storage error: {0}")]
    Store(String),
    /// Login request failed
    #[error("Login failed: {0}")]
    Login(#[from] ApiError),
}
