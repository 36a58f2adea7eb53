//! Push channel message types
//!
//! The server sends JSON text frames tagged by `type`:
//!
//! ```json
//! {"type": "credits:updated", "balance": 75, "organizationName": "Acme"}
//! ```
//!
//! `organizationName` is present only for organization balances.

use serde::{Deserialize, Serialize};

use crate::credits::BalanceState;

/// Payload of a `credits:updated` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsUpdate {
    pub balance: i64,
    #[serde(
        rename = "organizationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub organization_name: Option<String>,
}

impl CreditsUpdate {
    /// Balance this message describes; the presence of an organization name
    /// decides between organization and personal balance.
    pub fn into_state(self) -> BalanceState {
        match self.organization_name {
            Some(organization_name) => BalanceState::Organization {
                amount: self.balance,
                organization_name,
            },
            None => BalanceState::User {
                amount: self.balance,
            },
        }
    }
}

/// Messages received from the push server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "credits:updated")]
    CreditsUpdated(CreditsUpdate),

    /// Catch-all for message types we don't handle
    #[serde(other)]
    Unknown,
}
