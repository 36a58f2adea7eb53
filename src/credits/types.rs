//! Balance state published by the credits synchronizer.

use serde::Serialize;

use crate::api::ApiError;

/// Credit balance attributed to either an organization or a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BalanceState {
    Organization {
        amount: i64,
        #[serde(rename = "organizationName")]
        organization_name: String,
    },
    User {
        amount: i64,
    },
    /// No token, not yet loaded, or the last resolution failed
    #[default]
    Unknown,
}

impl BalanceState {
    pub fn amount(&self) -> Option<i64> {
        match self {
            BalanceState::Organization { amount, .. } | BalanceState::User { amount } => {
                Some(*amount)
            }
            BalanceState::Unknown => None,
        }
    }

    pub fn organization_name(&self) -> Option<&str> {
        match self {
            BalanceState::Organization {
                organization_name, ..
            } => Some(organization_name),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, BalanceState::Unknown)
    }
}

/// Why a resolution cycle could not produce a balance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to fetch user profile: {0}")]
    Profile(ApiError),
    #[error("Profile response contained no user")]
    NoUser,
    #[error("Failed to fetch organization {id}: {source}")]
    Organization { id: String, source: ApiError },
}

impl SyncError {
    /// Short category used in metrics error records.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Profile(_) | SyncError::NoUser => "profile",
            SyncError::Organization { .. } => "organization",
        }
    }
}

/// What subscribers see: the balance (or why there is none), whether a
/// foreground load is running, and whether the push channel is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditsSnapshot {
    pub balance: Result<BalanceState, SyncError>,
    pub loading: bool,
    pub push_connected: bool,
}

impl CreditsSnapshot {
    /// Balance with errors collapsed into `Unknown`.
    pub fn state(&self) -> BalanceState {
        self.balance.clone().unwrap_or_default()
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.balance.as_ref().err()
    }
}

impl Default for CreditsSnapshot {
    fn default() -> Self {
        Self {
            balance: Ok(BalanceState::Unknown),
            loading: false,
            push_connected: false,
        }
    }
}
