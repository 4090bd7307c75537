//! AnalysisTracker: the registry of in-flight analyses
//!
//! Each analysis lives in the active map from `start` until it settles or is
//! cancelled. The pipeline (see `pipeline.rs`) only touches a record while the
//! record's generation matches its own, so a cancelled or superseded run can
//! never write to, or emit events for, its successor.

use super::cancel::CancellationToken;
use super::events::{AnalysisEvent, EventBus};
use super::pipeline::Job;
use super::types::{
    Accepted, AnalysisRequest, AnalysisStatus, CancelOutcome, ReportedStatus, Settlement,
    SettledOutcome, StatusReply, STARTING_MESSAGE,
};
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::credentials::{CredentialStore, StoredCredentials};
use crate::error::AnalysisError;
use crate::factcheck::{char_prefix, FactCheckRequester};
use crate::history::HistoryLog;
use crate::notify::{LogNotifier, Notifier};
use crate::stats::{RequestKind, UsageLog, UsageRecord};
use crate::storage::{KeyValueStore, StorageResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub(super) struct ActiveAnalysis {
    pub(super) record: AnalysisRequest,
    /// Distinguishes successive runs under the same id
    pub(super) generation: u64,
    pub(super) token: CancellationToken,
}

pub(super) struct TrackerInner {
    pub(super) config: TrackerConfig,
    pub(super) active: DashMap<String, ActiveAnalysis>,
    settled: DashMap<String, Settlement>,
    next_generation: AtomicU64,
    pub(super) events: EventBus,
    pub(super) requester: Arc<dyn FactCheckRequester>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) history: HistoryLog,
    pub(super) usage: UsageLog,
    store: Arc<dyn KeyValueStore>,
    pub(super) clock: Arc<dyn Clock>,
}

impl TrackerInner {
    /// Remember how an analysis ended, dropping memories past the grace period.
    pub(super) fn settle(&self, id: &str, outcome: SettledOutcome) {
        let now = self.clock.now();
        self.prune_settled(now);
        self.settled.insert(
            id.to_string(),
            Settlement {
                outcome,
                settled_at: now,
            },
        );
    }

    fn prune_settled(&self, now: DateTime<Utc>) {
        let grace = self.config.settled_grace();
        self.settled.retain(|_, s| now - s.settled_at < grace);
    }

    pub(super) fn record_usage(&self, record: UsageRecord) {
        if let Err(e) = self.usage.record(record, self.clock.now()) {
            warn!(error = %e, "failed to update usage statistics");
        }
    }
}

/// Owns the lifecycle of concurrently running fact-check analyses.
///
/// Cheap to clone; clones share the same registry. `start` spawns onto the
/// current tokio runtime.
#[derive(Clone)]
pub struct AnalysisTracker {
    inner: Arc<TrackerInner>,
}

impl AnalysisTracker {
    /// Begin building a tracker around a requester and a durable store.
    pub fn builder(
        requester: Arc<dyn FactCheckRequester>,
        store: Arc<dyn KeyValueStore>,
    ) -> TrackerBuilder {
        TrackerBuilder {
            config: TrackerConfig::default(),
            requester,
            store,
            credentials: None,
            notifier: None,
            clock: None,
        }
    }

    /// Start an analysis of `text` and return immediately.
    ///
    /// Without an `id` one is generated. Starting an id that is still
    /// processing supersedes the earlier run: its token is cancelled and it
    /// emits nothing further. Empty text is rejected before any record is
    /// created.
    pub fn start(
        &self,
        id: Option<&str>,
        text: &str,
        title: &str,
    ) -> Result<Accepted, AnalysisError> {
        self.launch(RequestKind::Analysis, id, text, title)
    }

    /// Like [`start`](Self::start), for text selected in a host application.
    /// Counted separately in usage statistics.
    pub fn start_from_selection(
        &self,
        id: Option<&str>,
        text: &str,
        title: &str,
    ) -> Result<Accepted, AnalysisError> {
        self.launch(RequestKind::ContextMenu, id, text, title)
    }

    fn launch(
        &self,
        kind: RequestKind,
        id: Option<&str>,
        text: &str,
        title: &str,
    ) -> Result<Accepted, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("analysis_{}", Uuid::new_v4().simple()),
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let record = AnalysisRequest {
            id: id.clone(),
            status: AnalysisStatus::Processing,
            progress: 0,
            message: STARTING_MESSAGE.to_string(),
            title: title.to_string(),
            input_digest: char_prefix(text, self.inner.config.digest_limit).to_string(),
            started_at: self.inner.clock.now(),
            result: None,
            error: None,
        };

        let previous = self.inner.active.insert(
            id.clone(),
            ActiveAnalysis {
                record,
                generation,
                token: token.clone(),
            },
        );
        // A run that already claimed its terminal state finishes on its own.
        if let Some(previous) = previous {
            if previous.record.status == AnalysisStatus::Processing {
                previous.token.cancel();
                self.inner.settle(&id, SettledOutcome::Superseded);
                info!(analysis_id = %id, "earlier analysis superseded by restart");
            }
        }

        info!(
            analysis_id = %id,
            kind = ?kind,
            text_len = text.chars().count(),
            "analysis started"
        );

        let job = Job {
            id: id.clone(),
            generation,
            kind,
            token,
            text: text.to_string(),
            title: title.to_string(),
        };
        tokio::spawn(self.inner.clone().run(job));

        Ok(Accepted::new(id))
    }

    /// Snapshot of an active analysis.
    ///
    /// `None` once the analysis has left the active set, whatever the reason;
    /// see [`last_outcome`](Self::last_outcome) to tell the reasons apart.
    pub fn status(&self, id: &str) -> Option<AnalysisRequest> {
        self.inner.active.get(id).map(|a| a.record.clone())
    }

    /// How the most recent run under `id` ended, within the grace period.
    pub fn last_outcome(&self, id: &str) -> Option<Settlement> {
        self.inner.prune_settled(self.inner.clock.now());
        self.inner.settled.get(id).map(|s| s.clone())
    }

    /// The terminal event of a settled analysis, rebuilt from its settlement
    /// and history, for subscribers that lagged past the original.
    ///
    /// `None` while a run under `id` is processing, after a supersede, or
    /// once the settlement has expired.
    pub fn terminal_event(&self, id: &str) -> Option<AnalysisEvent> {
        if let Some(record) = self.status(id) {
            if record.status == AnalysisStatus::Processing {
                return None;
            }
        }
        let error = match self.last_outcome(id)?.outcome {
            SettledOutcome::Completed { .. } => {
                let entry = match self.inner.history.get(id) {
                    Ok(entry) => entry?,
                    Err(e) => {
                        warn!(analysis_id = %id, error = %e, "failed to read history for replay");
                        return None;
                    }
                };
                return Some(AnalysisEvent::AnalysisComplete {
                    analysis_id: id.to_string(),
                    result: entry.result,
                });
            }
            SettledOutcome::Failed { error } => error,
            SettledOutcome::Cancelled => AnalysisError::Cancelled.user_message(),
            SettledOutcome::Superseded => return None,
        };
        Some(AnalysisEvent::AnalysisError {
            analysis_id: id.to_string(),
            error,
        })
    }

    /// Status in the reply shape UIs poll for, with the last outcome once inactive.
    pub fn status_reply(&self, id: &str) -> StatusReply {
        match self.status(id) {
            Some(record) => StatusReply {
                status: record.status.into(),
                analysis: Some(record),
                last_outcome: None,
            },
            None => StatusReply {
                status: ReportedStatus::NotFound,
                analysis: None,
                last_outcome: self.last_outcome(id),
            },
        }
    }

    /// Cancel a processing analysis.
    ///
    /// The record is removed and the in-flight request aborted; no further
    /// events are published for this run. An analysis that has already
    /// settled cannot be cancelled.
    pub fn cancel(&self, id: &str) -> CancelOutcome {
        let removed = self
            .inner
            .active
            .remove_if(id, |_, a| a.record.status == AnalysisStatus::Processing);

        match removed {
            Some((_, analysis)) => {
                analysis.token.cancel();
                self.inner.settle(id, SettledOutcome::Cancelled);
                self.inner.record_usage(UsageRecord::Cancelled);
                info!(analysis_id = %id, "analysis cancelled");
                CancelOutcome::Cancelled
            }
            None => {
                debug!(analysis_id = %id, "cancel requested for unknown analysis");
                CancelOutcome::NotFound
            }
        }
    }

    /// Cancel everything still processing; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.active_ids()
            .iter()
            .filter(|id| self.cancel(id) == CancelOutcome::Cancelled)
            .count()
    }

    /// Cancel every running analysis, then wipe the store: API key, history,
    /// chat history and statistics. Returns the keys that were removed.
    pub fn clear_all_data(&self) -> StorageResult<Vec<String>> {
        let cancelled = self.cancel_all();
        let removed = self.inner.store.keys()?;
        self.inner.store.clear()?;
        info!(cancelled, keys = removed.len(), "all stored data cleared");
        Ok(removed)
    }

    /// Receive progress, completion and error events for every analysis.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.inner.events.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.inner.active.iter().map(|a| a.key().clone()).collect()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.inner.history
    }

    pub fn usage(&self) -> &UsageLog {
        &self.inner.usage
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}

/// Wires a tracker's collaborators; unset ones get production defaults.
pub struct TrackerBuilder {
    config: TrackerConfig,
    requester: Arc<dyn FactCheckRequester>,
    store: Arc<dyn KeyValueStore>,
    credentials: Option<Arc<dyn CredentialStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TrackerBuilder {
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to the API key kept in the store.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Defaults to [`LogNotifier`].
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> AnalysisTracker {
        let store = self.store;
        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(StoredCredentials::new(store.clone())) as Arc<dyn CredentialStore>
        });
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let history = HistoryLog::new(store.clone())
            .with_capacity(self.config.history_capacity)
            .with_text_limit(self.config.history_text_limit);
        let usage = UsageLog::new(store.clone());

        AnalysisTracker {
            inner: Arc::new(TrackerInner {
                events: EventBus::new(self.config.event_buffer),
                config: self.config,
                active: DashMap::new(),
                settled: DashMap::new(),
                next_generation: AtomicU64::new(0),
                requester: self.requester,
                credentials,
                notifier,
                history,
                usage,
                store,
                clock,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credentials::StaticCredentials;
    use crate::factcheck::MockRequester;
    use crate::storage::{OpenStore, SqliteStore};
    use chrono::TimeZone;
    use std::time::Duration;

    fn tracker_with(requester: MockRequester, clock: Arc<ManualClock>) -> AnalysisTracker {
        tracker_on(requester, clock, Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn tracker_on(
        requester: MockRequester,
        clock: Arc<ManualClock>,
        store: Arc<SqliteStore>,
    ) -> AnalysisTracker {
        AnalysisTracker::builder(Arc::new(requester), store)
        .with_credentials(Arc::new(StaticCredentials::new("sk-test")))
        .with_clock(clock)
        .with_config(TrackerConfig::default().with_settled_grace(Duration::from_secs(60)))
        .build()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn status_before_start_is_not_found() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        assert!(tracker.status("a0").is_none());
        assert!(tracker.last_outcome("a0").is_none());
    }

    #[tokio::test]
    async fn start_creates_processing_record() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        let accepted = tracker.start(Some("a1"), "Новость", "t1").unwrap();
        assert!(accepted.success);
        assert_eq!(accepted.analysis_id, "a1");

        let record = tracker.status("a1").unwrap();
        assert_eq!(record.status, AnalysisStatus::Processing);
        assert_eq!(record.title, "t1");
        assert_eq!(record.input_digest, "Новость");
        tracker.cancel_all();
    }

    #[tokio::test]
    async fn generated_ids_are_prefixed_and_unique() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        let a = tracker.start(None, "text", "t").unwrap().analysis_id;
        let b = tracker.start(Some("  "), "text", "t").unwrap().analysis_id;
        assert!(a.starts_with("analysis_"));
        assert_ne!(a, b);
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tracker.cancel_all(), 2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_record() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        assert_eq!(
            tracker.start(Some("a2"), "   ", "t2"),
            Err(AnalysisError::EmptyInput)
        );
        assert!(tracker.status("a2").is_none());
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn digest_is_bounded() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        let text = "я".repeat(300);
        tracker.start(Some("a"), &text, "t").unwrap();
        assert_eq!(tracker.status("a").unwrap().input_digest.chars().count(), 100);
        tracker.cancel_all();
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        tracker.start(Some("a"), "text", "t").unwrap();
        assert_eq!(tracker.cancel("a"), CancelOutcome::Cancelled);
        assert_eq!(tracker.cancel("a"), CancelOutcome::NotFound);
        assert!(tracker.status("a").is_none());
        assert_eq!(
            tracker.last_outcome("a").unwrap().outcome,
            SettledOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        assert_eq!(tracker.cancel("missing"), CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn restart_supersedes_previous_run() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        tracker.start(Some("a"), "first", "t").unwrap();
        tracker.start(Some("a"), "second", "t").unwrap();

        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.status("a").unwrap().input_digest, "second");
        assert_eq!(
            tracker.last_outcome("a").unwrap().outcome,
            SettledOutcome::Superseded
        );
        tracker.cancel_all();
    }

    #[tokio::test]
    async fn settled_outcomes_expire_after_grace() {
        let clock = clock();
        let tracker = tracker_with(MockRequester::hanging(), clock.clone());
        tracker.start(Some("a"), "text", "t").unwrap();
        tracker.cancel("a");

        clock.advance(chrono::Duration::seconds(59));
        assert!(tracker.last_outcome("a").is_some());
        clock.advance(chrono::Duration::seconds(2));
        assert!(tracker.last_outcome("a").is_none());
    }

    #[tokio::test]
    async fn cancellation_is_counted_in_usage() {
        let clock = clock();
        let tracker = tracker_with(MockRequester::hanging(), clock.clone());
        tracker.start(Some("a"), "text", "t").unwrap();
        tracker.cancel("a");
        let stats = tracker.usage().load(clock.now()).unwrap();
        assert_eq!(stats.cancelled_count, 1);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn restart_after_terminal_claim_is_not_a_supersede() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        tracker.start(Some("a"), "first", "t").unwrap();
        let first_token = {
            let mut first = tracker.inner.active.get_mut("a").unwrap();
            // The first run has claimed completion but not yet evicted itself.
            first.record.status = AnalysisStatus::Completed;
            first.token.clone()
        };

        tracker.start(Some("a"), "second", "t").unwrap();
        assert!(!first_token.is_cancelled());
        assert!(tracker.last_outcome("a").is_none());
        assert_eq!(tracker.status("a").unwrap().input_digest, "second");
        assert_eq!(tracker.status("a").unwrap().status, AnalysisStatus::Processing);
        tracker.cancel_all();
    }

    #[tokio::test]
    async fn clear_all_data_cancels_and_wipes_the_store() {
        let clock = clock();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tracker = tracker_on(MockRequester::hanging(), clock.clone(), store.clone());
        StoredCredentials::new(store.clone()).save_api_key("sk-saved").unwrap();
        tracker.start(Some("a"), "text", "t").unwrap();

        let mut removed = tracker.clear_all_data().unwrap();
        removed.sort();
        assert_eq!(removed, vec!["deepseekApiKey", "usageStatistics"]);
        assert_eq!(tracker.active_count(), 0);
        assert!(store.keys().unwrap().is_empty());
        assert_eq!(
            tracker.last_outcome("a").unwrap().outcome,
            SettledOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn selection_start_registers_an_active_analysis() {
        let clock = clock();
        let tracker = tracker_with(MockRequester::hanging(), clock.clone());
        tracker.start_from_selection(Some("s"), "выделенный текст", "").unwrap();
        assert_eq!(tracker.active_ids(), vec!["s".to_string()]);
        assert_eq!(tracker.cancel("s"), CancelOutcome::Cancelled);
    }

    #[tokio::test]
    async fn status_reply_reports_processing_then_not_found() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        assert_eq!(tracker.status_reply("a").status, ReportedStatus::NotFound);

        tracker.start(Some("a"), "text", "t").unwrap();
        let reply = tracker.status_reply("a");
        assert_eq!(reply.status, ReportedStatus::Processing);
        assert_eq!(reply.analysis.unwrap().id, "a");
        assert!(reply.last_outcome.is_none());

        tracker.cancel("a");
        let reply = tracker.status_reply("a");
        assert_eq!(reply.status, ReportedStatus::NotFound);
        assert!(reply.analysis.is_none());
        assert_eq!(reply.last_outcome.unwrap().outcome, SettledOutcome::Cancelled);
    }

    #[tokio::test]
    async fn terminal_event_waits_for_settlement() {
        let tracker = tracker_with(MockRequester::hanging(), clock());
        tracker.start(Some("a"), "text", "t").unwrap();
        assert!(tracker.terminal_event("a").is_none());

        tracker.cancel("a");
        assert_eq!(
            tracker.terminal_event("a"),
            Some(AnalysisEvent::AnalysisError {
                analysis_id: "a".into(),
                error: "Анализ отменен".into(),
            })
        );
        assert!(tracker.terminal_event("never-started").is_none());
    }
}
