//! Which cache entries a write makes stale.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix for keys of plain read-through entries
pub const API_KEY_PREFIX: &str = "api:";

/// Prefix for keys of aggregated views
pub const COMPOSITE_KEY_PREFIX: &str = "composite:";

/// Cache key for a read of `path`. Identical reads share one entry.
pub fn cache_key(path: &str) -> String {
    format!("{}{}", API_KEY_PREFIX, path)
}

pub fn composite_key(name: &str) -> String {
    format!("{}{}", COMPOSITE_KEY_PREFIX, name)
}

/// A write whose path contains `path_contains` also makes the listed keys
/// stale, typically the list endpoint of a nested record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct InvalidationRule {
    pub path_contains: String,
    pub invalidate: Vec<String>,
}

impl InvalidationRule {
    pub fn new(path_contains: impl Into<String>, invalidate: &[&str]) -> Self {
        Self {
            path_contains: path_contains.into(),
            invalidate: invalidate.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Rules shipped with the default configuration.
pub fn default_rules() -> Vec<InvalidationRule> {
    vec![InvalidationRule::new(
        "/api/riwayat-pendidikan",
        &["api:/api/riwayat-pendidikan"],
    )]
}

/// Everything a write to one path must evict.
#[derive(Debug, Clone)]
pub struct Invalidation {
    /// The written endpoint itself, with or without a query string
    pub endpoint: Regex,
    /// Fixed keys from matching rules
    pub keys: Vec<String>,
    /// Aggregated views, which may include the written resource
    pub composites: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    rules: Vec<InvalidationRule>,
}

impl InvalidationRules {
    pub fn new(rules: Vec<InvalidationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }

    /// Resolve the entries a write to `path` invalidates.
    pub fn for_path(&self, path: &str) -> Result<Invalidation, regex::Error> {
        let (base, _query) = path.split_once('?').unwrap_or((path, ""));

        let mut keys: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| base.contains(&rule.path_contains))
            .flat_map(|rule| rule.invalidate.iter().cloned())
            .collect();
        keys.sort();
        keys.dedup();

        Ok(Invalidation {
            endpoint: Regex::new(&format!(r"^{}(\?.*)?$", regex::escape(&cache_key(base))))?,
            keys,
            composites: composite_pattern().clone(),
        })
    }
}

fn composite_pattern() -> &'static Regex {
    static COMPOSITES: OnceLock<Regex> = OnceLock::new();
    COMPOSITES.get_or_init(|| Regex::new(r"^composite:").expect("composite key pattern is valid"))
}
