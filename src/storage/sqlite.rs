//! SQLite storage backend for VacLive

use super::traits::{KeyValueStore, OpenStore, StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed key-value store
///
/// One table of JSON documents keyed by name.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(value)?;
        conn.execute(
            r#"
            INSERT INTO entries (key, value_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn clear(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TypedStoreExt;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn get_missing_key_returns_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("absent").unwrap().is_none());
    }

    #[test]
    fn set_replaces_previous_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("k", &json!({"a": 1})).unwrap();
        store.set("k", &json!([1, 2, 3])).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!([1, 2, 3])));
        assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn remove_reports_existence() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("k", &json!("v")).unwrap();
        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
    }

    #[test]
    fn clear_drops_every_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("a", &json!(1)).unwrap();
        store.set("b", &json!(2)).unwrap();
        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn typed_helpers_round_trip_through_dyn_store() {
        let store: Box<dyn KeyValueStore> = Box::new(SqliteStore::open_in_memory().unwrap());
        store.save("list", &vec!["x".to_string(), "y".to_string()]).unwrap();
        let loaded: Option<Vec<String>> = store.load("list").unwrap();
        assert_eq!(loaded, Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("vaclive.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("deepseekApiKey", &json!("sk-test")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("deepseekApiKey").unwrap(), Some(json!("sk-test")));
    }
}
