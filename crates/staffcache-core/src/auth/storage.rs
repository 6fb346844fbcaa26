//! Key/value backends for the persisted credential fields.
//!
//! The credential layout is four independent string keys. Backends never
//! fail outward: faults are logged and reads come back as absent, so the
//! credential store above them can keep answering plain booleans.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;
use tracing::warn;

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "staffcache";

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Storage for the persisted credential fields.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

/// JSON object file in the application data directory.
///
/// The whole map is rewritten on every change; the file is removed once the
/// last key is gone.
pub struct FileStorage {
    data_dir: PathBuf,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents =
            std::fs::read_to_string(&path).context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        let path = self.path();
        if map.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove credentials file")?;
            }
            return Ok(());
        }
        std::fs::create_dir_all(&self.data_dir).context("Failed to create data directory")?;
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&path, contents).context("Failed to write credentials file")?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        f(&mut map);
        self.write_map(&map)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock();
        match self.read_map() {
            Ok(mut map) => map.remove(key),
            Err(e) => {
                warn!(key, error = %e, "Credential file unreadable");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        }) {
            warn!(key, error = %e, "Failed to persist credential field");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.update(|map| {
            map.remove(key);
        }) {
            warn!(key, error = %e, "Failed to remove credential field");
        }
    }
}

/// OS keychain storage, one entry per key.
#[derive(Debug, Default)]
pub struct KeyringStorage;

impl KeyringStorage {
    pub fn new() -> Self {
        Self
    }

    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }
}

impl KeyValueStorage for KeyringStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Self::entry(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Keychain unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read keychain entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        let result = Self::entry(key).and_then(|entry| {
            entry
                .set_password(value)
                .context("Failed to store value in keychain")
        });
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to persist credential field");
        }
    }

    fn remove(&self, key: &str) {
        let result = Self::entry(key).and_then(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete keychain entry"),
        });
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to remove credential field");
        }
    }
}
