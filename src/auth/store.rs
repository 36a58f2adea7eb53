//! Persistent storage for the signed-in session using the system keyring.
//!
//! The token and the user it belongs to are stored together as one JSON
//! secret in the OS's native secret storage:
//! - Linux: libsecret (GNOME Keyring/KDE Wallet)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! Never log the token value.

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::AuthError;
use crate::api::User;

const SERVICE_NAME: &str = "org-portal";
const SESSION_KEY_NAME: &str = "session";

/// Token/user pair persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub user: User,
    pub logged_in_at: DateTime<Utc>,
}

/// Where the session is persisted.
pub trait CredentialStore: Send + Sync + 'static {
    /// Stored session, if any. Errors are logged and reported as `None`.
    fn load(&self) -> Option<StoredSession>;
    fn save(&self, session: &StoredSession) -> Result<(), AuthError>;
    /// Remove the stored session. Succeeds if nothing was stored.
    fn clear(&self) -> Result<(), AuthError>;
}

/// Session storage in the OS keyring.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry() -> Result<Entry, AuthError> {
        Entry::new(SERVICE_NAME, SESSION_KEY_NAME)
            .map_err(|e| AuthError::Store(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Option<StoredSession> {
        let entry = match Self::entry() {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Auth: {}", e);
                return None;
            }
        };

        match entry.get_password() {
            Ok(secret) if secret.is_empty() => None,
            Ok(secret) => match serde_json::from_str::<StoredSession>(&secret) {
                Ok(session) => Some(session),
                Err(e) => {
                    log::warn!("Auth: stored session is unreadable: {}", e);
                    None
                }
            },
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                log::warn!("Auth: failed to retrieve session: {}", e);
                None
            }
        }
    }

    fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        let secret = serde_json::to_string(session)
            .map_err(|e| AuthError::Store(format!("Serialize session: {}", e)))?;

        Self::entry()?
            .set_password(&secret)
            .map_err(|e| AuthError::Store(format!("Failed to store session: {}", e)))?;

        // Log action without the token value
        log::info!("Auth: stored session for {}", session.user.email);
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match Self::entry()?.delete_credential() {
            Ok(()) => {
                log::info!("Auth: deleted stored session");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Store(format!("Failed to delete session: {}", e))),
        }
    }
}

/// In-process storage, for tests and for running without a keyring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Option<StoredSession> {
        self.session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        *self.session.lock().unwrap_or_else(|p| p.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.session.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}
