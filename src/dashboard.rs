//! Dashboard view model: organization stats and the signed-in profile,
//! served through the response caches.

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::api::{ApiError, OrganizationStats, OrganizationStatsResponse, PortalApi, User};
use crate::auth::AuthSession;
use crate::cache::{CacheKey, DataCache};

/// One tile on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatCard {
    pub label: &'static str,
    pub value: i64,
}

/// Tiles in display order: users, credits, projects, images.
pub fn stat_cards(stats: &OrganizationStats) -> Vec<StatCard> {
    let count = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    vec![
        StatCard {
            label: "Users",
            value: count(stats.total_members),
        },
        StatCard {
            label: "Credits",
            value: stats.credit_balance,
        },
        StatCard {
            label: "Projects",
            value: count(stats.total_projects),
        },
        StatCard {
            label: "Images",
            value: count(stats.total_images),
        },
    ]
}

pub struct Dashboard {
    api: Arc<dyn PortalApi>,
    session: Arc<AuthSession>,
    stats: Arc<DataCache<OrganizationStatsResponse>>,
    profiles: Arc<DataCache<User>>,
    /// Token the cached responses were fetched with
    cache_owner: Mutex<Option<String>>,
}

impl Dashboard {
    pub fn new(
        api: Arc<dyn PortalApi>,
        session: Arc<AuthSession>,
        stats: Arc<DataCache<OrganizationStatsResponse>>,
        profiles: Arc<DataCache<User>>,
    ) -> Self {
        Self {
            api,
            session,
            stats,
            profiles,
            cache_owner: Mutex::new(None),
        }
    }

    /// Current token. Responses cached under a different token are dropped
    /// first, so a new session never sees the previous user's data.
    fn token(&self) -> Result<String, ApiError> {
        let token = self.session.token().ok_or(ApiError::Unauthorized)?;

        let mut owner = self
            .cache_owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if owner.as_deref() != Some(token.as_str()) {
            if owner.is_some() {
                self.clear_caches();
                log::info!("Dashboard: session changed, caches cleared");
            }
            *owner = Some(token.clone());
        }
        Ok(token)
    }

    fn clear_caches(&self) {
        self.stats.clear();
        self.profiles.clear();
    }

    /// Aggregate stats for `org_id`, cached per organization.
    pub async fn organization_stats(
        &self,
        org_id: &str,
    ) -> Result<OrganizationStatsResponse, ApiError> {
        let token = self.token()?;
        let api = self.api.clone();
        let org = org_id.to_string();

        self.stats
            .get_or_fetch(CacheKey::OrganizationStats(org_id.to_string()), move || {
                async move { api.organization_stats(&org, &token).await }
            })
            .await
    }

    /// Profile of the signed-in user.
    pub async fn profile(&self) -> Result<User, ApiError> {
        let token = self.token()?;
        let api = self.api.clone();

        self.profiles
            .get_or_fetch(CacheKey::UserProfile, move || async move {
                let profile = api.user_profile(&token).await?;
                profile
                    .user
                    .ok_or_else(|| ApiError::Unsuccessful("profile has no user".to_string()))
            })
            .await
    }

    /// Drop everything cached about one organization.
    pub fn refresh_organization(&self, org_id: &str) {
        self.stats
            .invalidate_matching(&CacheKey::organization_prefix(org_id));
    }

    /// Forget all cached data; called when the user signs out.
    pub fn on_logout(&self) {
        self.clear_caches();
        *self
            .cache_owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        log::info!("Dashboard: caches cleared");
    }
}
