//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API base URL, where the credential is persisted, cache lifetimes,
//! write-invalidation rules and the dashboard's sources.
//!
//! Configuration is stored at `~/.config/staffcache/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::AuthenticatedClient;
use crate::auth::{CredentialStore, FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage};
use crate::cache::{
    default_rules, CachedClient, DashboardSource, InvalidationRule, InvalidationRules,
    ResponseCache,
};

/// Application name used for config/data directory paths
const APP_NAME: &str = "staffcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `base_url`
pub const BASE_URL_ENV: &str = "STAFFCACHE_BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub composite_ttl_secs: u64,
    /// Periodic sweep of expired entries; lazy eviction only when unset
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            composite_ttl_secs: 60,
            sweep_interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub storage: StorageKind,
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
    pub invalidation: Vec<InvalidationRule>,
    pub dashboard: Vec<DashboardSource>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            storage: StorageKind::default(),
            request_timeout_secs: crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS,
            cache: CacheConfig::default(),
            invalidation: default_rules(),
            dashboard: Vec::new(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist. `STAFFCACHE_BASE_URL` wins over the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    pub fn composite_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.composite_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.cache
            .sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Construct the configured credential backend.
    pub fn storage_backend(&self) -> Result<Arc<dyn KeyValueStorage>> {
        Ok(match self.storage {
            StorageKind::File => Arc::new(FileStorage::new(self.data_dir()?)),
            StorageKind::Keyring => Arc::new(KeyringStorage::new()),
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
        })
    }

    /// Wire up the data-access layer: one credential store, one cache and
    /// the clients over them. Call once at startup and pass the result
    /// around.
    pub fn build_client(&self) -> Result<CachedClient> {
        let credentials = CredentialStore::new(self.storage_backend()?);
        let client =
            AuthenticatedClient::with_timeout(&self.base_url, credentials, self.request_timeout())
                .context("Failed to build HTTP client")?;
        let rules = InvalidationRules::new(self.invalidation.clone());

        Ok(CachedClient::new(client, ResponseCache::new(), rules)
            .with_ttls(self.default_ttl(), self.composite_ttl()))
    }
}
