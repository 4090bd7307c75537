//! Storage trait definitions

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A durable key-value blob store.
///
/// Values are JSON documents. A read-modify-write of one key is not atomic
/// against other writers of the same key; callers that share a key across
/// processes must serialize access themselves.
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Remove `key`; returns whether it existed
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// List all stored keys
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Remove every key
    fn clear(&self) -> StorageResult<()>;
}

/// Typed access on top of [`KeyValueStore`].
pub trait TypedStoreExt {
    /// Load and deserialize the value under `key`
    fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>>;

    /// Serialize and store `value` under `key`
    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()>;
}

impl<S: KeyValueStore + ?Sized> TypedStoreExt for S {
    fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, &value)
    }
}

/// Extension trait for opening stores from paths
pub trait OpenStore: KeyValueStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
