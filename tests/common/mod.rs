//! Shared fixtures for tracker integration tests
//!
//! Every harness runs against an in-memory store, a manual clock, a static
//! API key and a recording notifier, so tests can observe every side effect.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use vaclive::{
    AnalysisEvent, AnalysisTracker, CredentialStore, ManualClock, MockRequester, OpenStore,
    RecordingNotifier, SqliteStore, StaticCredentials, TrackerConfig,
};

/// Long enough for any mock to settle, short enough to fail fast.
pub const SETTLE_WAIT: Duration = Duration::from_secs(120);

pub struct Harness {
    pub tracker: AnalysisTracker,
    pub requester: Arc<MockRequester>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteStore>,
}

pub struct HarnessBuilder {
    requester: MockRequester,
    credentials: Arc<dyn CredentialStore>,
    config: TrackerConfig,
}

impl HarnessBuilder {
    pub fn credentials(mut self, credentials: StaticCredentials) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let requester = Arc::new(self.requester);
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        let tracker = AnalysisTracker::builder(requester.clone(), store.clone())
            .with_config(self.config)
            .with_credentials(self.credentials)
            .with_notifier(notifier.clone())
            .with_clock(clock.clone())
            .build();

        Harness {
            tracker,
            requester,
            notifier,
            clock,
            store,
        }
    }
}

pub fn harness(requester: MockRequester) -> HarnessBuilder {
    HarnessBuilder {
        requester,
        credentials: Arc::new(StaticCredentials::new("sk-test")),
        config: TrackerConfig::default(),
    }
}

/// Events for `id` up to and including its terminal event.
pub async fn events_until_terminal(
    events: &mut broadcast::Receiver<AnalysisEvent>,
    id: &str,
) -> Vec<AnalysisEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(SETTLE_WAIT, events.recv())
            .await
            .expect("analysis did not settle in time")
            .expect("event stream closed");
        if event.analysis_id() != id {
            continue;
        }
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

/// Everything already buffered for `id`, without waiting.
pub fn drain_for(events: &mut broadcast::Receiver<AnalysisEvent>, id: &str) -> Vec<AnalysisEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.analysis_id() == id {
            seen.push(event);
        }
    }
    seen
}

/// Yield until the requester has been called `n` times.
pub async fn wait_for_calls(requester: &MockRequester, n: usize) {
    for _ in 0..1_000 {
        if requester.call_count() >= n {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "requester called {} times, expected {}",
        requester.call_count(),
        n
    );
}

pub fn progress_values(events: &[AnalysisEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            AnalysisEvent::AnalysisProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

pub fn completions(events: &[AnalysisEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AnalysisEvent::AnalysisComplete { .. }))
        .count()
}
