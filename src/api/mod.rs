//! Organization/User API integration.
//!
//! This module provides:
//! - The `PortalApi` seam the cache and credits synchronizer call against
//! - An HTTP implementation backed by reqwest
//! - Response types for profile, organization, stats and login endpoints

mod client;
mod types;

use futures_util::future::BoxFuture;

pub use client::HttpPortalApi;
pub use types::{
    LoginResponse, Organization, OrganizationRef, OrganizationStats, OrganizationStatsResponse,
    User, UserProfileResponse,
};

/// Errors returned by the organization API.
///
/// Cloneable because a single failed fetch may be shared between every
/// caller that joined it in the response cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Token missing, expired or rejected
    #[error("Not authorized (token rejected)")]
    Unauthorized,
    /// Network/HTTP transport error
    #[error("Network error: {0}")]
    Network(String),
    /// API returned a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    Parse(String),
    /// Response parsed but reported `success: false`
    #[error("Request unsuccessful: {0}")]
    Unsuccessful(String),
}

/// Future type returned by `PortalApi` methods.
pub type ApiFuture<'a, T> = BoxFuture<'a, Result<T, ApiError>>;

/// Calls the portal makes against the organization backend.
///
/// Boxed futures keep the trait object safe so the synchronizer can hold an
/// `Arc<dyn PortalApi>` and tests can substitute fakes.
pub trait PortalApi: Send + Sync + 'static {
    /// Fetch the profile of the user owning `token`.
    fn user_profile<'a>(&'a self, token: &'a str) -> ApiFuture<'a, UserProfileResponse>;

    /// Fetch an organization's balance and name.
    fn organization<'a>(&'a self, id: &'a str, token: &'a str) -> ApiFuture<'a, Organization>;

    /// Fetch aggregate dashboard statistics for an organization.
    fn organization_stats<'a>(
        &'a self,
        org_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, OrganizationStatsResponse>;

    /// Exchange credentials for a token.
    fn login<'a>(&'a self, email: &'a str, password: &'a str) -> ApiFuture<'a, LoginResponse>;
}
