//! One resolution cycle: profile -> organization membership -> balance.

use super::types::{BalanceState, SyncError};
use crate::api::PortalApi;

/// Resolve the balance for the user owning `token`.
///
/// Users that belong to an organization report the organization's balance
/// and name; everyone else reports their own `credit_balance` (0 if absent).
pub async fn resolve_balance(api: &dyn PortalApi, token: &str) -> Result<BalanceState, SyncError> {
    let profile = api.user_profile(token).await.map_err(SyncError::Profile)?;
    let user = profile.user.ok_or(SyncError::NoUser)?;

    match user.organization_id() {
        Some(org_id) => {
            let org = api
                .organization(org_id, token)
                .await
                .map_err(|source| SyncError::Organization {
                    id: org_id.to_string(),
                    source,
                })?;
            log::debug!("Credits: resolved organization balance for {}", org.name);
            Ok(BalanceState::Organization {
                amount: org.credit_balance,
                organization_name: org.name,
            })
        }
        None => {
            log::debug!("Credits: resolved personal balance");
            Ok(BalanceState::User {
                amount: user.credit_balance.unwrap_or(0),
            })
        }
    }
}
