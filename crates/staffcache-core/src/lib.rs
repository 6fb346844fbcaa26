//! Client-side data access for the hospital personnel records API.
//!
//! The layer holds the authentication credential, decides when it is
//! stale, refreshes it transparently, and keeps a time-bounded response
//! cache that writes invalidate:
//!
//! - [`auth::CredentialStore`]: persisted credential and its validity
//! - [`api::AuthenticatedClient`]: credentialed requests with one
//!   coordinated refresh-and-retry on 401
//! - [`cache::ResponseCache`]: TTL cache with lazy expiry and pattern
//!   invalidation
//! - [`cache::CachedClient`]: read-through / write-invalidate over the
//!   authenticated client
//!
//! Build everything once with [`Config::build_client`] and hand the
//! resulting client to whoever needs it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;

pub use api::{ApiError, ApiRequest, ApiResponse, AuthenticatedClient};
pub use auth::{Credential, CredentialStore};
pub use cache::{CacheStats, CachedClient, DashboardSource, ResponseCache};
pub use config::Config;
