//! Bounded history of completed analyses
//!
//! Stored as one JSON list under [`keys::HISTORY`], newest first. Appends load
//! the list, prepend, trim, and store it back.

use crate::factcheck::{char_prefix, FactCheckResult};
use crate::storage::{keys, KeyValueStore, StorageResult, TypedStoreExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    /// Input text, truncated
    pub text: String,
    pub result: FactCheckResult,
    pub timestamp: DateTime<Utc>,
}

/// A history snapshot for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub export_date: DateTime<Utc>,
    pub analyses: Vec<HistoryEntry>,
}

#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write of the list within this process
    write_lock: Arc<Mutex<()>>,
    capacity: usize,
    text_limit: usize,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            capacity: 50,
            text_limit: 500,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_text_limit(mut self, text_limit: usize) -> Self {
        self.text_limit = text_limit;
        self
    }

    /// Record a completed analysis, evicting the oldest entries beyond capacity.
    pub fn append(
        &self,
        id: &str,
        title: &str,
        text: &str,
        result: &FactCheckResult,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.entries()?;

        let mut stored_text = char_prefix(text, self.text_limit).to_string();
        if stored_text.len() < text.len() {
            stored_text.push_str("...");
        }

        entries.insert(
            0,
            HistoryEntry {
                id: id.to_string(),
                title: title.to_string(),
                text: stored_text,
                result: result.clone(),
                timestamp: at,
            },
        );
        entries.truncate(self.capacity);

        self.store.save(keys::HISTORY, &entries)
    }

    /// All entries, newest first.
    pub fn entries(&self) -> StorageResult<Vec<HistoryEntry>> {
        let entries: Option<Vec<HistoryEntry>> = self.store.load(keys::HISTORY)?;
        Ok(entries.unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<HistoryEntry>> {
        Ok(self.entries()?.into_iter().find(|e| e.id == id))
    }

    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store.save(keys::HISTORY, &Vec::<HistoryEntry>::new())
    }

    pub fn export(&self, at: DateTime<Utc>) -> StorageResult<HistoryExport> {
        Ok(HistoryExport {
            export_date: at,
            analyses: self.entries()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};
    use chrono::{Duration, TimeZone};

    fn log() -> HistoryLog {
        HistoryLog::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn empty_history_has_no_entries() {
        assert!(log().entries().unwrap().is_empty());
    }

    #[test]
    fn newest_entry_comes_first() {
        let log = log();
        let result = FactCheckResult::unparseable("x");
        log.append("a1", "first", "text", &result, at(0)).unwrap();
        log.append("a2", "second", "text", &result, at(1)).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries[0].id, "a2");
        assert_eq!(entries[1].id, "a1");
        assert_eq!(log.get("a1").unwrap().unwrap().title, "first");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = log().with_capacity(3);
        let result = FactCheckResult::unparseable("x");
        for i in 0..5 {
            log.append(&format!("a{}", i), "t", "text", &result, at(i)).unwrap();
        }
        let ids: Vec<_> = log.entries().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a4", "a3", "a2"]);
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let log = log().with_text_limit(5);
        let result = FactCheckResult::unparseable("x");
        log.append("a", "t", "Новость дня", &result, at(0)).unwrap();
        log.append("b", "t", "Коротк", &result, at(1)).unwrap();
        log.append("c", "t", "Город", &result, at(2)).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries[2].text, "Новос...");
        assert_eq!(entries[1].text, "Корот...");
        assert_eq!(entries[0].text, "Город");
    }

    #[test]
    fn clear_and_export() {
        let log = log();
        let result = FactCheckResult::unparseable("x");
        log.append("a", "t", "text", &result, at(0)).unwrap();

        let export = log.export(at(5)).unwrap();
        assert_eq!(export.export_date, at(5));
        assert_eq!(export.analyses.len(), 1);
        let json = serde_json::to_value(&export).unwrap();
        assert!(json.get("exportDate").is_some());

        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());
    }
}
