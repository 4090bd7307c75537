//! Lifecycle records and operation outcomes

use crate::factcheck::{FactCheckResult, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Processing,
    Completed,
    Error,
}

/// Snapshot of one in-flight analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: String,
    pub status: AnalysisStatus,
    /// 0 to 100, never decreases while processing
    pub progress: u8,
    /// Label of the current step
    pub message: String,
    pub title: String,
    /// Bounded prefix of the input text
    pub input_digest: String,
    pub started_at: DateTime<Utc>,
    /// Set on the `Completed` transition, just before eviction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FactCheckResult>,
    /// User-facing message, set on the `Error` transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pipeline milestones, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Preparing,
    CredentialsChecked,
    SendingRequest,
    ProcessingResponse,
    Finishing,
}

impl Stage {
    pub fn progress(&self) -> u8 {
        match self {
            Self::Preparing => 10,
            Self::CredentialsChecked => 20,
            Self::SendingRequest => 40,
            Self::ProcessingResponse => 80,
            Self::Finishing => 100,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Preparing => "Подготовка анализа...",
            Self::CredentialsChecked => "Проверка API ключа...",
            Self::SendingRequest => "Отправка запроса к AI...",
            Self::ProcessingResponse => "Обработка результатов...",
            Self::Finishing => "Завершение анализа...",
        }
    }
}

pub(crate) const STARTING_MESSAGE: &str = "Запуск анализа...";

/// Acknowledgement returned by `start`; the analysis continues in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub success: bool,
    pub message: String,
    pub analysis_id: String,
}

impl Accepted {
    pub(crate) fn new(analysis_id: String) -> Self {
        Self {
            success: true,
            message: "Анализ запущен".to_string(),
            analysis_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Reply to a cancel request: `message` on success, `error` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CancelOutcome> for CancelReply {
    fn from(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::Cancelled => Self {
                success: true,
                message: Some("Анализ отменен".to_string()),
                error: None,
            },
            CancelOutcome::NotFound => Self {
                success: false,
                message: None,
                error: Some("Анализ не найден".to_string()),
            },
        }
    }
}

/// `status` of a [`StatusReply`]: the record's status, or `not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Processing,
    Completed,
    Error,
    NotFound,
}

impl From<AnalysisStatus> for ReportedStatus {
    fn from(status: AnalysisStatus) -> Self {
        match status {
            AnalysisStatus::Processing => Self::Processing,
            AnalysisStatus::Completed => Self::Completed,
            AnalysisStatus::Error => Self::Error,
        }
    }
}

/// Reply to a status request. `analysis` is null once the id is inactive;
/// `lastOutcome` then says how it ended, within the grace period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub status: ReportedStatus,
    pub analysis: Option<AnalysisRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<Settlement>,
}

/// How a no-longer-active analysis ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SettledOutcome {
    Completed { verdict: Verdict },
    Failed { error: String },
    Cancelled,
    /// Replaced by a newer `start` with the same id
    Superseded,
}

/// Remembered briefly after an analysis leaves the active set, so a poller
/// can tell "finished" from "never existed".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    #[serde(flatten)]
    pub outcome: SettledOutcome,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_progress_strictly_increases() {
        let stages = [
            Stage::Preparing,
            Stage::CredentialsChecked,
            Stage::SendingRequest,
            Stage::ProcessingResponse,
            Stage::Finishing,
        ];
        let progress: Vec<u8> = stages.iter().map(Stage::progress).collect();
        assert_eq!(progress, vec![10, 20, 40, 80, 100]);
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn settlement_serializes_flat() {
        let settlement = Settlement {
            outcome: SettledOutcome::Completed {
                verdict: Verdict::Truthful,
            },
            settled_at: chrono::DateTime::from_timestamp(0, 0).unwrap(),
        };
        let value = serde_json::to_value(&settlement).unwrap();
        assert_eq!(value["outcome"], json!("completed"));
        assert_eq!(value["verdict"], json!("Правдивые"));
        assert!(value.get("settledAt").is_some());
    }

    #[test]
    fn cancel_replies_match_the_ui_contract() {
        assert_eq!(
            serde_json::to_value(CancelReply::from(CancelOutcome::Cancelled)).unwrap(),
            json!({"success": true, "message": "Анализ отменен"})
        );
        assert_eq!(
            serde_json::to_value(CancelReply::from(CancelOutcome::NotFound)).unwrap(),
            json!({"success": false, "error": "Анализ не найден"})
        );
    }

    #[test]
    fn unknown_status_reply_is_not_found_with_null_analysis() {
        let reply = StatusReply {
            status: ReportedStatus::NotFound,
            analysis: None,
            last_outcome: None,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"status": "not_found", "analysis": null})
        );
        assert_eq!(
            serde_json::to_value(ReportedStatus::from(AnalysisStatus::Processing)).unwrap(),
            json!("processing")
        );
    }
}
