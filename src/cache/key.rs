//! Typed cache keys.
//!
//! Keys render into a flat string namespace (`collection:<id>:history`, ...)
//! so coarse invalidation can match on substrings.

use std::fmt;

/// Identifies a cacheable resource response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `collection:<id>`
    Collection(String),
    /// `collection:<id>:history`
    CollectionHistory(String),
    /// `collection:<id>:model-stats`
    CollectionModelStats(String),
    /// `organization:<id>:stats`
    OrganizationStats(String),
    /// `user:profile`
    UserProfile,
    /// Any other caller-constructed key, used verbatim
    Custom(String),
}

impl CacheKey {
    /// Pattern matching every key about one collection.
    pub fn collection_prefix(id: &str) -> String {
        format!("collection:{}", id)
    }

    /// Pattern matching every key about one organization.
    pub fn organization_prefix(id: &str) -> String {
        format!("organization:{}", id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Collection(id) => write!(f, "collection:{}", id),
            CacheKey::CollectionHistory(id) => write!(f, "collection:{}:history", id),
            CacheKey::CollectionModelStats(id) => write!(f, "collection:{}:model-stats", id),
            CacheKey::OrganizationStats(id) => write!(f, "organization:{}:stats", id),
            CacheKey::UserProfile => f.write_str("user:profile"),
            CacheKey::Custom(raw) => f.write_str(raw),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        CacheKey::Custom(raw.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        CacheKey::Custom(raw)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}
