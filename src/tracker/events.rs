//! Progress events pushed to subscribed UIs
//!
//! Delivery is best-effort: with nobody subscribed an event is simply dropped,
//! and a lagging subscriber loses the oldest events. The record itself always
//! carries the latest progress for pollers.

use crate::factcheck::FactCheckResult;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// An event about one analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AnalysisEvent {
    #[serde(rename_all = "camelCase")]
    AnalysisProgress {
        analysis_id: String,
        message: String,
        progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    AnalysisComplete {
        analysis_id: String,
        result: FactCheckResult,
    },
    #[serde(rename_all = "camelCase")]
    AnalysisError { analysis_id: String, error: String },
}

impl AnalysisEvent {
    pub fn analysis_id(&self) -> &str {
        match self {
            Self::AnalysisProgress { analysis_id, .. }
            | Self::AnalysisComplete { analysis_id, .. }
            | Self::AnalysisError { analysis_id, .. } => analysis_id,
        }
    }

    /// Complete and error events are the last for their id.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AnalysisProgress { .. })
    }
}

/// Fan-out of analysis events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AnalysisEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AnalysisEvent) {
        if self.sender.send(event).is_err() {
            debug!("no subscribers listening, event dropped");
        }
    }
}
