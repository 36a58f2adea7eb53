//! Response cache for API data.
//!
//! This module provides:
//! - `DataCache<V>`: time-boxed entries with lazy expiry
//! - Deduplication of concurrent fetches for the same key
//! - Typed `CacheKey`s rendering to a flat string namespace
//!
//! One `DataCache` is constructed per value family at the composition root and
//! shared by `Arc`; there is no process-global instance.

mod key;
mod store;

pub use key::CacheKey;
pub use store::{DataCache, DEFAULT_TTL};
