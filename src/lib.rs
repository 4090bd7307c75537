//! VacLive: background fact-checking of news text
//!
//! An [`AnalysisTracker`] accepts text, runs one chat-completion request per
//! analysis in the background, and reports progress and the final verdict to
//! subscribers.
//!
//! # Core Concepts
//!
//! - **Analyses**: in-flight requests, tracked by id until they settle
//! - **Events**: progress, completion and error pushes to any subscriber
//! - **Results**: model replies normalized into a [`FactCheckResult`], never a parse failure
//! - **History and statistics**: durable records of settled analyses
//! - **Chat**: a [`ChatRelay`] for free-form questions over the same endpoint
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaclive::{AnalysisTracker, HttpRequester, OpenStore, SqliteStore, TrackerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig::from_env()?;
//! let store = Arc::new(SqliteStore::open("vaclive.db")?);
//! let tracker = AnalysisTracker::builder(Arc::new(HttpRequester::from_config(&config)), store)
//!     .with_config(config)
//!     .build();
//!
//! let accepted = tracker.start(None, "Текст новости", "Заголовок")?;
//! let mut events = tracker.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if event.analysis_id() == accepted.analysis_id && event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod factcheck;
pub mod history;
pub mod mcp;
pub mod notify;
pub mod stats;
pub mod storage;
pub mod tracker;

pub use chat::{ChatLog, ChatMessage, ChatRelay, ChatReply};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, TrackerConfig};
pub use credentials::{CredentialStore, StaticCredentials, StoredCredentials};
pub use error::AnalysisError;
pub use factcheck::{
    FactCheckRequester, FactCheckResult, HttpRequester, MockRequester, RequesterError, Verdict,
};
pub use history::{HistoryEntry, HistoryExport, HistoryLog};
pub use notify::{LogNotifier, Notification, Notifier, RecordingNotifier};
pub use stats::{
    RequestKind, StatsExport, StatsSummary, UsageLog, UsageRecord, UsageStatistics,
};
pub use storage::{KeyValueStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use tracker::{
    Accepted, AnalysisEvent, AnalysisRequest, AnalysisStatus, AnalysisTracker, CancelOutcome,
    CancelReply, CancellationToken, ReportedStatus, Settlement, SettledOutcome, StatusReply,
    TrackerBuilder,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
