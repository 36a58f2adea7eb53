pub mod api;
pub mod auth;
pub mod cache;
pub mod credits;
pub mod dashboard;
pub mod metrics;
pub mod push;
pub mod settings;

use std::sync::Arc;

use api::{HttpPortalApi, OrganizationStatsResponse, PortalApi, User};
use auth::{AuthSession, KeyringStore};
use cache::DataCache;
use credits::{CreditsSnapshot, CreditsSynchronizer, SyncConfig};
use dashboard::{stat_cards, Dashboard};
use push::{PushConnector, WebSocketConnector};
use settings::PortalSettings;

const EMAIL_ENV: &str = "PORTAL_EMAIL";
const PASSWORD_ENV: &str = "PORTAL_PASSWORD";

fn init_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Render a snapshot for the log.
fn describe(snapshot: &CreditsSnapshot) -> String {
    let balance = match &snapshot.balance {
        Ok(state) => match (state.amount(), state.organization_name()) {
            (Some(amount), Some(org)) => format!("{} credits ({})", amount, org),
            (Some(amount), None) => format!("{} credits", amount),
            _ => "unknown".to_string(),
        },
        Err(e) => format!("unavailable ({})", e),
    };
    format!(
        "balance={} loading={} push={}",
        balance,
        snapshot.loading,
        if snapshot.push_connected {
            "connected"
        } else {
            "off"
        }
    )
}

/// Log the dashboard tiles for the signed-in user's organization, if any.
async fn log_dashboard(dashboard: &Dashboard, user: Option<User>) {
    let Some(org_id) = user.as_ref().and_then(|u| u.organization_id()) else {
        return;
    };

    match dashboard.organization_stats(org_id).await {
        Ok(response) => {
            let cards = stat_cards(&response.stats)
                .iter()
                .map(|c| format!("{}={}", c.label, c.value))
                .collect::<Vec<_>>()
                .join(" ");
            log::info!("Dashboard: {} {}", response.organization_name, cards);
        }
        Err(e) => log::warn!("Dashboard: failed to load stats: {}", e),
    }
}

/// Sign in with `PORTAL_EMAIL` / `PORTAL_PASSWORD` when both are set.
async fn login_from_env(session: &AuthSession, api: &dyn PortalApi) {
    let email = std::env::var(EMAIL_ENV).ok().filter(|v| !v.is_empty());
    let password = std::env::var(PASSWORD_ENV).ok().filter(|v| !v.is_empty());
    let (Some(email), Some(password)) = (email, password) else {
        return;
    };

    if let Err(e) = session.login(api, &email, &password).await {
        log::error!("{}", e);
    }
}

async fn run_portal(settings: PortalSettings) {
    let api: Arc<dyn PortalApi> = Arc::new(HttpPortalApi::new(settings.api_base_url.clone()));
    let session = Arc::new(AuthSession::restore(Arc::new(KeyringStore)));

    let stats_cache: Arc<DataCache<OrganizationStatsResponse>> =
        Arc::new(DataCache::with_default_ttl(settings.cache_ttl()));
    let profile_cache: Arc<DataCache<User>> =
        Arc::new(DataCache::with_default_ttl(settings.cache_ttl()));
    let dashboard = Dashboard::new(
        api.clone(),
        session.clone(),
        stats_cache.clone(),
        profile_cache,
    );

    let push: Option<Arc<dyn PushConnector>> = match &settings.push_url {
        Some(url) => Some(Arc::new(WebSocketConnector::new(url.clone()))),
        None => {
            log::info!("Push URL not configured, credits will be polled");
            None
        }
    };

    let api_for_login = api.clone();
    let credits = CreditsSynchronizer::spawn(
        api,
        push,
        session.tokens(),
        SyncConfig {
            poll_interval: settings.poll_interval(),
        },
    );

    if !session.is_authenticated() {
        login_from_env(&session, api_for_login.as_ref()).await;
    }
    match session.masked_token() {
        Some(masked) => log::info!("Signed in (token {})", masked),
        None => log::info!("Not signed in; waiting for a token"),
    }
    log_dashboard(&dashboard, session.user()).await;

    let mut snapshots = credits.subscribe();
    let mut tokens = session.tokens();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log::info!("Credits: {}", describe(&snapshot));
            }

            changed = tokens.changed() => {
                if changed.is_err() {
                    break;
                }
                let signed_in = tokens.borrow_and_update().is_some();
                if signed_in {
                    log_dashboard(&dashboard, session.user()).await;
                } else {
                    dashboard.on_logout();
                }
            }
        }
    }

    log::debug!("Cache stats: {:?}", stats_cache.stats());
    log::debug!("Credits stats: {:?}", credits.metrics().await);
    credits.shutdown().await;
}

/// Entry point for the `org-portal` binary.
pub fn run() -> Result<(), String> {
    init_logging();

    // Both ring and aws-lc-rs may be linked; pick one for TLS explicitly.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("TLS crypto provider already installed");
    }

    let settings = settings::load_settings();
    log::info!("Organization portal starting (API {})", settings.api_base_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;

    runtime.block_on(run_portal(settings));
    log::info!("Organization portal stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use credits::{BalanceState, SyncError};

    #[test]
    fn test_describe_snapshot() {
        let snapshot = CreditsSnapshot {
            balance: Ok(BalanceState::Organization {
                amount: 500,
                organization_name: "Acme".to_string(),
            }),
            loading: false,
            push_connected: true,
        };
        assert_eq!(
            describe(&snapshot),
            "balance=500 credits (Acme) loading=false push=connected"
        );

        let failed = CreditsSnapshot {
            balance: Err(SyncError::NoUser),
            ..CreditsSnapshot::default()
        };
        assert!(describe(&failed).starts_with("balance=unavailable"));
    }
}
