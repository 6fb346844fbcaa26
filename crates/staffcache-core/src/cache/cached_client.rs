//! Read-through / write-invalidate layer over the authenticated client.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::{ApiError, ApiRequest, ApiResponse, AuthenticatedClient, Method, Result};

use super::invalidation::{cache_key, composite_key, InvalidationRules};
use super::ResponseCache;

/// Read TTL when the caller does not pick one (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// TTL for aggregated views. Shorter than `DEFAULT_TTL` because a composite
/// is only as fresh as its stalest part.
pub const DEFAULT_COMPOSITE_TTL: Duration = Duration::from_secs(60);

/// One named read feeding an aggregated view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DashboardSource {
    pub name: String,
    pub path: String,
}

impl DashboardSource {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Serves reads from the response cache and evicts affected entries around
/// every write. Clone is cheap; clones share the cache and the client.
#[derive(Clone)]
pub struct CachedClient {
    client: AuthenticatedClient,
    cache: ResponseCache,
    rules: Arc<InvalidationRules>,
    default_ttl: Duration,
    composite_ttl: Duration,
}

impl CachedClient {
    pub fn new(client: AuthenticatedClient, cache: ResponseCache, rules: InvalidationRules) -> Self {
        Self {
            client,
            cache,
            rules: Arc::new(rules),
            default_ttl: DEFAULT_TTL,
            composite_ttl: DEFAULT_COMPOSITE_TTL,
        }
    }

    pub fn with_ttls(mut self, default_ttl: Duration, composite_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self.composite_ttl = composite_ttl;
        self
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Route a request: GETs read through the cache, other reads (HEAD) go
    /// straight to the server untouched, and everything else is a write.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if request.method == Method::GET {
            self.get_with(&request.path, &cache_key(&request.path), self.default_ttl)
                .await
        } else if request.is_read() {
            self.client.send(request).await
        } else {
            self.write(request).await
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.get_with(path, &cache_key(path), self.default_ttl).await
    }

    /// Read `path` through the cache entry `key`.
    ///
    /// A miss returns the server's response untouched; only a successful
    /// JSON body is stored, and only if no write invalidated the cache while
    /// the fetch was in flight.
    pub async fn get_with(&self, path: &str, key: &str, ttl: Duration) -> Result<ApiResponse> {
        if let Some(value) = self.cache.get(key) {
            debug!(key, "Cache hit");
            return Ok(ApiResponse::cached(&value));
        }

        debug!(key, "Cache miss, fetching");
        let epoch = self.cache.epoch();
        let response = self.client.send(&ApiRequest::get(path)).await?;
        if response.is_success() {
            match response.json_value() {
                Ok(body) => {
                    self.cache.set_if_epoch(key, body, ttl, epoch);
                }
                Err(e) => debug!(key, error = %e, "Response body is not JSON, not caching"),
            }
        }
        Ok(response)
    }

    /// Send a mutating request. Affected entries are evicted before the
    /// request goes out and again once it completes. Reads in flight across
    /// either eviction do not store their response.
    pub async fn write(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.invalidate_path(&request.path)?;
        let response = self.client.send(request).await;
        self.invalidate_path(&request.path)?;
        response
    }

    /// Evict everything a write to `path` would make stale.
    pub fn invalidate_path(&self, path: &str) -> Result<usize> {
        let invalidation = self.rules.for_path(path)?;

        let mut removed = self.cache.invalidate_pattern(&invalidation.endpoint);
        for key in &invalidation.keys {
            if self.cache.invalidate(key) {
                removed += 1;
            }
        }
        removed += self.cache.invalidate_pattern(&invalidation.composites);

        if removed > 0 {
            debug!(path, removed, "Invalidated cache entries for write");
        }
        Ok(removed)
    }

    /// Fetch several reads concurrently and combine their bodies into one
    /// JSON object keyed by source name, cached as `composite:{name}`.
    ///
    /// Any failed source fails the whole view and nothing is cached.
    pub async fn aggregate(&self, name: &str, sources: &[DashboardSource]) -> Result<Value> {
        let key = composite_key(name);
        if let Some(value) = self.cache.get(&key) {
            debug!(key = %key, "Composite cache hit");
            return Ok(value);
        }

        let epoch = self.cache.epoch();
        let fetches = sources.iter().map(|source| async move {
            let body = self.get(&source.path).await?.error_for_status()?.json_value()?;
            Ok::<_, ApiError>((source.name.clone(), body))
        });
        let parts = try_join_all(fetches).await?;

        let combined = Value::Object(parts.into_iter().collect());
        if self
            .cache
            .set_if_epoch(&key, combined.clone(), self.composite_ttl, epoch)
        {
            debug!(key = %key, sources = sources.len(), "Composite view cached");
        }
        Ok(combined)
    }
}
