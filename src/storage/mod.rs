//! Storage backends for VacLive
//!
//! Everything durable (API key, analysis and chat history, usage statistics) lives in a
//! `KeyValueStore` under one of the well-known [`keys`].
//! The primary implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{KeyValueStore, OpenStore, StorageError, StorageResult, TypedStoreExt};

/// Keys shared with the browser-side UI.
pub mod keys {
    pub const API_KEY: &str = "deepseekApiKey";
    pub const HISTORY: &str = "analysisHistory";
    pub const CHAT_HISTORY: &str = "chatHistory";
    pub const USAGE_STATISTICS: &str = "usageStatistics";
}
