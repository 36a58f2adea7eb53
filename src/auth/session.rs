//! Signed-in session and token publication.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::store::{CredentialStore, StoredSession};
use super::AuthError;
use crate::api::{PortalApi, User};

/// Process-wide auth state, owned by the composition root.
pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
    tokens: watch::Sender<Option<String>>,
    user: Mutex<Option<User>>,
}

impl AuthSession {
    /// Restore whatever session the store holds.
    pub fn restore(store: Arc<dyn CredentialStore>) -> Self {
        let stored = store.load();
        match &stored {
            Some(session) => log::info!("Auth: restored session for {}", session.user.email),
            None => log::info!("Auth: no stored session"),
        }

        let (token, user) = match stored {
            Some(StoredSession { token, user, .. }) => (Some(token), Some(user)),
            None => (None, None),
        };

        Self {
            store,
            tokens: watch::Sender::new(token),
            user: Mutex::new(user),
        }
    }

    /// Receiver observing every token change.
    pub fn tokens(&self) -> watch::Receiver<Option<String>> {
        self.tokens.subscribe()
    }

    pub fn token(&self) -> Option<String> {
        self.tokens.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.borrow().is_some()
    }

    pub fn user(&self) -> Option<User> {
        self.user.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Exchange credentials for a token, persist it and publish it.
    pub async fn login(
        &self,
        api: &dyn PortalApi,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let response = api.login(email, password).await?;

        let session = StoredSession {
            token: response.token,
            user: response.user,
            logged_in_at: Utc::now(),
        };
        self.store.save(&session)?;

        *self.user.lock().unwrap_or_else(|p| p.into_inner()) = Some(session.user.clone());
        self.tokens.send_replace(Some(session.token));

        log::info!("Auth: logged in as {}", session.user.email);
        Ok(session.user)
    }

    /// Sign out. The token is withdrawn before storage is touched, so a
    /// storage failure still leaves the process signed out.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.tokens.send_replace(None);
        *self.user.lock().unwrap_or_else(|p| p.into_inner()) = None;
        log::info!("Auth: logged out");
        self.store.clear()
    }

    /// Masked token for display (e.g., "eyJ...a1b2c3")
    pub fn masked_token(&self) -> Option<String> {
        self.token().map(|token| mask_token(&token))
    }
}

/// Keep the first 3 and last 6 characters; short tokens are fully masked.
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}...{}", head, tail)
}
