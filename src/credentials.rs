//! API key lookup

use crate::storage::{keys, KeyValueStore, StorageError, StorageResult, TypedStoreExt};
use std::sync::Arc;

/// Where the tracker finds the bearer token for the completion endpoint.
pub trait CredentialStore: Send + Sync {
    /// The stored key, or `None` if nothing usable is stored.
    fn api_key(&self) -> StorageResult<Option<String>>;
}

/// API key kept in the shared key-value store.
#[derive(Clone)]
pub struct StoredCredentials {
    store: Arc<dyn KeyValueStore>,
}

impl StoredCredentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Save a key; surrounding whitespace is dropped and an empty key is rejected.
    pub fn save_api_key(&self, key: &str) -> StorageResult<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(StorageError::InvalidValue("API key is empty".to_string()));
        }
        self.store.save(keys::API_KEY, key)
    }

    pub fn clear_api_key(&self) -> StorageResult<bool> {
        self.store.remove(keys::API_KEY)
    }
}

impl CredentialStore for StoredCredentials {
    fn api_key(&self) -> StorageResult<Option<String>> {
        let key: Option<String> = self.store.load(keys::API_KEY)?;
        Ok(key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()))
    }
}

/// A fixed key, for tests and environment-provided credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl CredentialStore for StaticCredentials {
    fn api_key(&self) -> StorageResult<Option<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};
    use serde_json::json;

    fn stored() -> (Arc<dyn KeyValueStore>, StoredCredentials) {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        (store.clone(), StoredCredentials::new(store))
    }

    #[test]
    fn missing_key_is_none() {
        let (_, creds) = stored();
        assert_eq!(creds.api_key().unwrap(), None);
    }

    #[test]
    fn saved_key_is_trimmed_and_readable() {
        let (store, creds) = stored();
        creds.save_api_key("  sk-123 ").unwrap();
        assert_eq!(creds.api_key().unwrap(), Some("sk-123".to_string()));
        assert_eq!(store.get(keys::API_KEY).unwrap(), Some(json!("sk-123")));
    }

    #[test]
    fn empty_key_is_rejected() {
        let (_, creds) = stored();
        assert!(matches!(
            creds.save_api_key("   "),
            Err(StorageError::InvalidValue(_))
        ));
    }

    #[test]
    fn blank_stored_value_counts_as_missing() {
        let (store, creds) = stored();
        store.set(keys::API_KEY, &json!("")).unwrap();
        assert_eq!(creds.api_key().unwrap(), None);
        assert!(creds.clear_api_key().unwrap());
    }
}
