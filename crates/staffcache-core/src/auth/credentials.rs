use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::storage::KeyValueStorage;

const ACCESS_TOKEN_KEY: &str = "access_token";
const TOKEN_TYPE_KEY: &str = "token_type";
const USER_KEY: &str = "user";
const EXPIRES_AT_KEY: &str = "token_expires_at";

/// The bundle that authorizes requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: Value,
}

impl Credential {
    /// Build a credential from a server grant of `expires_in` seconds.
    ///
    /// `None` when the lifetime does not fit a timestamp.
    pub fn from_grant(
        access_token: String,
        token_type: String,
        expires_in: i64,
        user: Value,
    ) -> Option<Self> {
        let expires_at = expires_in
            .checked_mul(1000)
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))?;

        Some(Self {
            access_token,
            token_type,
            expires_at,
            user,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Single source of truth for "am I logged in, and with what token".
///
/// Validity is recomputed on every query, never cached. Every `save` and
/// `clear` bumps a generation counter so concurrent refreshes can tell
/// whether the credential they failed with has already been replaced.
/// The counter's lock is held across each storage update, so a `snapshot`
/// never pairs a credential with another credential's generation.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
    generation: Arc<Mutex<u64>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Persist all four fields, replacing any previous credential.
    pub fn save(&self, credential: &Credential) {
        let mut generation = self.generation.lock();
        self.storage.set(ACCESS_TOKEN_KEY, &credential.access_token);
        self.storage.set(TOKEN_TYPE_KEY, &credential.token_type);
        self.storage.set(USER_KEY, &credential.user.to_string());
        self.storage.set(
            EXPIRES_AT_KEY,
            &credential.expires_at.timestamp_millis().to_string(),
        );
        *generation += 1;
        debug!(expires_at = %credential.expires_at, "Credential saved");
    }

    /// The persisted credential, or `None` if never set (or unreadable).
    pub fn load(&self) -> Option<Credential> {
        let access_token = self.storage.get(ACCESS_TOKEN_KEY)?;
        let token_type = self.storage.get(TOKEN_TYPE_KEY)?;
        let expires_ms: i64 = self.storage.get(EXPIRES_AT_KEY)?.parse().ok()?;
        let expires_at = Utc.timestamp_millis_opt(expires_ms).single()?;
        let user = self
            .storage
            .get(USER_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(Value::Null);

        Some(Credential {
            access_token,
            token_type,
            expires_at,
            user,
        })
    }

    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        self.remove_all();
        *generation += 1;
        debug!("Credential cleared");
    }

    fn remove_all(&self) {
        for key in [ACCESS_TOKEN_KEY, TOKEN_TYPE_KEY, USER_KEY, EXPIRES_AT_KEY] {
            self.storage.remove(key);
        }
    }

    /// Whether a call is currently authorized. Clears a stale credential as a
    /// side effect.
    pub fn is_valid(&self) -> bool {
        self.valid_credential().is_some()
    }

    /// The credential if it is currently valid. Expired credentials are
    /// cleared on the way out.
    pub fn valid_credential(&self) -> Option<Credential> {
        self.snapshot().1
    }

    /// The valid credential together with the generation it belongs to,
    /// read atomically with respect to `save` and `clear`.
    pub fn snapshot(&self) -> (u64, Option<Credential>) {
        let mut generation = self.generation.lock();
        let credential = match self.load() {
            Some(credential) if credential.is_expired() => {
                debug!(expires_at = %credential.expires_at, "Credential expired, clearing");
                self.remove_all();
                *generation += 1;
                None
            }
            Some(credential) if credential.access_token.is_empty() => None,
            other => other,
        };
        (*generation, credential)
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.valid_credential().map(|c| c.authorization())
    }

    /// Cached user snapshot from the last login or refresh
    pub fn user(&self) -> Option<Value> {
        self.load().map(|c| c.user)
    }

    /// Remaining lifetime of the current credential
    pub fn expires_in(&self) -> Option<Duration> {
        let credential = self.valid_credential()?;
        (credential.expires_at - Utc::now()).to_std().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;
    use serde_json::json;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryStorage::new()))
    }

    fn credential(token: &str, expires_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: token.to_string(),
            token_type: "Bearer".to_string(),
            expires_at,
            user: json!({"id": 7, "name": "Siti"}),
        }
    }

    #[test]
    fn test_load_absent_when_never_set() {
        assert!(store().load().is_none());
        assert!(!store().is_valid());
    }

    #[test]
    fn test_save_then_load_round_trips_fields() {
        let store = store();
        let expires_at = Utc.timestamp_millis_opt(Utc::now().timestamp_millis() + 60_000).unwrap();
        let saved = credential("t1", expires_at);
        store.save(&saved);

        assert_eq!(store.load(), Some(saved));
        assert!(store.is_valid());
    }

    #[test]
    fn test_expired_credential_is_invalid_and_cleared() {
        let store = store();
        store.save(&credential("t1", Utc::now() - chrono::Duration::milliseconds(1)));

        assert!(!store.is_valid());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_expiry_at_exactly_now_is_invalid() {
        let store = store();
        store.save(&credential("t1", Utc::now()));

        assert!(!store.is_valid());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_empty_token_is_invalid() {
        let store = store();
        store.save(&credential("", Utc::now() + chrono::Duration::minutes(5)));
        assert!(!store.is_valid());
    }

    #[test]
    fn test_clear_removes_all_fields() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        store.save(&credential("t1", Utc::now() + chrono::Duration::minutes(5)));

        store.clear();

        assert!(store.load().is_none());
        for key in [ACCESS_TOKEN_KEY, TOKEN_TYPE_KEY, USER_KEY, EXPIRES_AT_KEY] {
            assert!(storage.get(key).is_none(), "{} should be removed", key);
        }
    }

    #[test]
    fn test_expires_at_persisted_as_millis() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        let expires_at = Utc.timestamp_millis_opt(1_800_000_000_123).unwrap();
        store.save(&credential("t1", expires_at));

        assert_eq!(
            storage.get(EXPIRES_AT_KEY).as_deref(),
            Some("1800000000123")
        );
    }

    #[test]
    fn test_generation_bumps_on_save_and_clear() {
        let store = store();
        let start = store.generation();

        store.save(&credential("t1", Utc::now() + chrono::Duration::minutes(5)));
        assert_eq!(store.generation(), start + 1);

        store.clear();
        assert_eq!(store.generation(), start + 2);
    }

    #[test]
    fn test_authorization_header() {
        let store = store();
        assert_eq!(store.authorization_header(), None);

        store.save(&credential("t1", Utc::now() + chrono::Duration::minutes(5)));
        assert_eq!(store.authorization_header().as_deref(), Some("Bearer t1"));
    }

    #[test]
    fn test_from_grant_sets_expiry_from_seconds() {
        let credential = Credential::from_grant(
            "t2".to_string(),
            "Bearer".to_string(),
            3600,
            Value::Null,
        )
        .unwrap();
        let remaining = credential.expires_at - Utc::now();
        assert!(remaining.num_seconds() > 3590 && remaining.num_seconds() <= 3600);
        assert!(credential.is_valid());
    }

    #[test]
    fn test_from_grant_rejects_unrepresentable_lifetime() {
        for expires_in in [10_000_000_000_000, i64::MAX] {
            let credential =
                Credential::from_grant("t2".to_string(), "Bearer".to_string(), expires_in, Value::Null);
            assert!(credential.is_none(), "expires_in {} should be rejected", expires_in);
        }
    }

    #[test]
    fn test_snapshot_pairs_credential_with_its_generation() {
        let store = store();
        assert_eq!(store.snapshot(), (store.generation(), None));

        store.save(&credential("t1", Utc::now() + chrono::Duration::minutes(5)));
        let (generation, current) = store.snapshot();
        assert_eq!(generation, store.generation());
        assert_eq!(current.unwrap().access_token, "t1");
    }

    #[test]
    fn test_snapshot_of_expired_credential_reports_cleared_generation() {
        let store = store();
        store.save(&credential("t1", Utc::now() - chrono::Duration::milliseconds(1)));
        let saved_generation = store.generation();

        let (generation, current) = store.snapshot();

        assert!(current.is_none());
        assert_eq!(generation, saved_generation + 1);
        assert!(store.load().is_none());
    }
}
