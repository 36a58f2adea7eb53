//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use portal_lib::api::{
    ApiError, ApiFuture, LoginResponse, Organization, OrganizationRef, OrganizationStats,
    OrganizationStatsResponse, PortalApi, User, UserProfileResponse,
};
use portal_lib::credits::CreditsSnapshot;
use portal_lib::push::{PushConnector, PushError, PushEvent, PushSubscription};

pub fn user(organization: Option<OrganizationRef>, credit_balance: Option<i64>) -> User {
    User {
        id: "u1".to_string(),
        email: "u1@acme.io".to_string(),
        name: Some("Ada".to_string()),
        organization,
        credit_balance,
    }
}

pub fn org_member(org_id: &str) -> User {
    user(
        Some(OrganizationRef::Populated {
            id: org_id.to_string(),
            name: None,
        }),
        None,
    )
}

/// Scriptable `PortalApi`. Profile calls can be held until released to
/// simulate slow requests.
pub struct FakeApi {
    profile: Mutex<Result<Option<User>, ApiError>>,
    organization: Mutex<Result<Organization, ApiError>>,
    stats: Mutex<Result<OrganizationStatsResponse, ApiError>>,
    stats_delay: Mutex<Duration>,
    hold_profiles: AtomicBool,
    releases: Semaphore,
    pub profile_calls: AtomicUsize,
    pub organization_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            profile: Mutex::new(Ok(Some(user(None, Some(0))))),
            organization: Mutex::new(Err(ApiError::Api {
                status: 404,
                message: "no organization".to_string(),
            })),
            stats: Mutex::new(Ok(OrganizationStatsResponse {
                stats: OrganizationStats {
                    total_members: 12,
                    credit_balance: 500,
                    total_projects: 3,
                    total_images: 980,
                },
                organization_name: "Acme".to_string(),
            })),
            stats_delay: Mutex::new(Duration::ZERO),
            hold_profiles: AtomicBool::new(false),
            releases: Semaphore::new(0),
            profile_calls: AtomicUsize::new(0),
            organization_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_profile(&self, profile: Result<Option<User>, ApiError>) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn set_user(&self, user: User) {
        self.set_profile(Ok(Some(user)));
    }

    pub fn set_organization(&self, organization: Result<Organization, ApiError>) {
        *self.organization.lock().unwrap() = organization;
    }

    pub fn set_stats_delay(&self, delay: Duration) {
        *self.stats_delay.lock().unwrap() = delay;
    }

    /// Hold every subsequent profile call until `release_profile` is called.
    pub fn hold_profiles(&self, hold: bool) {
        self.hold_profiles.store(hold, Ordering::SeqCst);
    }

    pub fn release_profile(&self) {
        self.releases.add_permits(1);
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

impl PortalApi for FakeApi {
    fn user_profile<'a>(&'a self, _token: &'a str) -> ApiFuture<'a, UserProfileResponse> {
        // Response is captured when the request is issued
        let response = self.profile.lock().unwrap().clone();
        let held = self.hold_profiles.load(Ordering::SeqCst);
        self.profile_calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            if held {
                if let Ok(permit) = self.releases.acquire().await {
                    permit.forget();
                }
            }
            response.map(|user| UserProfileResponse {
                success: true,
                user,
            })
        })
    }

    fn organization<'a>(&'a self, id: &'a str, _token: &'a str) -> ApiFuture<'a, Organization> {
        self.organization_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.organization.lock().unwrap().clone().map(|mut org| {
            org.id = id.to_string();
            org
        });
        Box::pin(async move { response })
    }

    fn organization_stats<'a>(
        &'a self,
        _org_id: &'a str,
        _token: &'a str,
    ) -> ApiFuture<'a, OrganizationStatsResponse> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.stats.lock().unwrap().clone();
        let delay = *self.stats_delay.lock().unwrap();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }

    fn login<'a>(&'a self, email: &'a str, _password: &'a str) -> ApiFuture<'a, LoginResponse> {
        Box::pin(async move {
            Ok(LoginResponse {
                token: format!("token-{}", email),
                user: User {
                    email: email.to_string(),
                    ..user(None, Some(0))
                },
            })
        })
    }
}

/// `PushConnector` handing out in-process channels.
#[derive(Default)]
pub struct FakePush {
    fail: bool,
    senders: Mutex<Vec<mpsc::Sender<PushEvent>>>,
    cancels: Mutex<Vec<CancellationToken>>,
    pub connects: AtomicUsize,
}

impl FakePush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sender of the most recent subscription, once one exists.
    pub async fn latest_sender(&self) -> mpsc::Sender<PushEvent> {
        loop {
            if let Some(tx) = self.senders.lock().unwrap().last().cloned() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn latest_cancel(&self) -> Option<CancellationToken> {
        self.cancels.lock().unwrap().last().cloned()
    }
}

impl PushConnector for FakePush {
    fn connect<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, Result<PushSubscription, PushError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.fail {
                return Err(PushError::ConnectionFailed("refused".to_string()));
            }
            let (tx, rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            self.senders.lock().unwrap().push(tx);
            self.cancels.lock().unwrap().push(cancel.clone());
            Ok(PushSubscription::new(rx, cancel))
        })
    }
}

/// Wait (up to 5s) for a snapshot matching `pred`.
pub async fn wait_for_snapshot(
    rx: &mut watch::Receiver<CreditsSnapshot>,
    pred: impl FnMut(&CreditsSnapshot) -> bool,
) -> CreditsSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("synchronizer stopped")
        .clone()
}

/// Poll `cond` until it holds (up to 5s).
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
