//! One-shot user notifications
//!
//! The tracker sends exactly one notification per completed analysis. How it is
//! displayed (desktop toast, log line, UI badge) is up to the `Notifier`.

use crate::factcheck::Verdict;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

pub const COMPLETION_TITLE: &str = "VacLive - Анализ завершен";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Keyed by analysis id so a UI can route clicks back to the result
    pub id: String,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn analysis_complete(analysis_id: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            id: analysis_id.into(),
            title: COMPLETION_TITLE.to_string(),
            message: verdict.notification_text().to_string(),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Deliver a notification. Delivery problems are the notifier's to handle.
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            analysis_id = %notification.id,
            title = %notification.title,
            "{}",
            notification.message
        );
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_for(&self, analysis_id: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.id == analysis_id)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
    }
}
