//! In-memory response caching for the data-access layer.
//!
//! This module provides:
//! - `ResponseCache`: TTL key/value cache with lazy eviction and
//!   pattern-based invalidation
//! - `CachedClient`: read-through / write-invalidate orchestration over
//!   `AuthenticatedClient`
//! - `InvalidationRules`: which list views a nested write makes stale
//!
//! Nothing here is persisted; the cache lives as long as the process.

pub mod cached_client;
pub mod invalidation;
pub mod manager;

pub use cached_client::{CachedClient, DashboardSource, DEFAULT_COMPOSITE_TTL, DEFAULT_TTL};
pub use invalidation::{cache_key, composite_key, default_rules, InvalidationRule, InvalidationRules};
pub use manager::{CacheEntry, CacheStats, ResponseCache};
