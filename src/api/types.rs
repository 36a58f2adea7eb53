//! Data structures for the organization API.

use serde::{Deserialize, Serialize};

/// Response from `GET /auth/profile`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<User>,
}

/// A portal user as returned by the profile and login endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Organization membership, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<OrganizationRef>,
    /// Personal balance, used when the user has no organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_balance: Option<i64>,
}

impl User {
    /// Id of the organization this user belongs to, if any.
    pub fn organization_id(&self) -> Option<&str> {
        self.organization.as_ref().map(OrganizationRef::id)
    }
}

/// The API returns membership either populated or as a bare id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrganizationRef {
    Populated {
        #[serde(alias = "_id")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Id(String),
}

impl OrganizationRef {
    pub fn id(&self) -> &str {
        match self {
            OrganizationRef::Populated { id, .. } => id,
            OrganizationRef::Id(id) => id,
        }
    }
}

/// Response from `GET /organizations/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(alias = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub credit_balance: i64,
}

/// Aggregate counters shown on the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStats {
    #[serde(default)]
    pub total_members: u64,
    #[serde(default)]
    pub credit_balance: i64,
    #[serde(default)]
    pub total_projects: u64,
    #[serde(default)]
    pub total_images: u64,
}

/// Response from `GET /organizations/{id}/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStatsResponse {
    pub stats: OrganizationStats,
    #[serde(default)]
    pub organization_name: String,
}

/// Response from `POST /auth/login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}
