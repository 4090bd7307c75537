//! Error taxonomy for the analysis lifecycle

use crate::factcheck::RequesterError;
use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Errors that end (or prevent) an analysis.
///
/// Malformed model output is not here: the parser always falls back to a
/// placeholder result instead of failing the analysis.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("no API key stored")]
    CredentialMissing,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API returned status {status}")]
    Api { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    /// True for explicit cancellation, which is never reported to observers.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text shown to the user in the error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyInput => "Текст для анализа пуст".to_string(),
            Self::CredentialMissing => {
                "API ключ не найден. Сохраните ключ в настройках.".to_string()
            }
            Self::Transport(_) => "Не удалось связаться с сервером анализа".to_string(),
            Self::Api { status, .. } => format!("Ошибка API: {}", status),
            Self::Timeout(_) => "Таймаут запроса".to_string(),
            Self::Cancelled => "Анализ отменен".to_string(),
            Self::MalformedResponse(_) => "Неверный формат ответа от API".to_string(),
            Self::Storage(_) => "Ошибка хранилища данных".to_string(),
        }
    }
}

impl From<RequesterError> for AnalysisError {
    fn from(err: RequesterError) -> Self {
        match err {
            RequesterError::Network(msg) => Self::Transport(msg),
            RequesterError::Api { status, body } => Self::Api { status, body },
            RequesterError::MalformedResponse(msg) => Self::MalformedResponse(msg),
            RequesterError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<StorageError> for AnalysisError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_cancel_have_distinct_user_text() {
        let timeout = AnalysisError::Timeout(Duration::from_secs(30));
        assert_ne!(timeout.user_message(), AnalysisError::Cancelled.user_message());
        assert!(!timeout.is_cancellation());
        assert!(AnalysisError::Cancelled.is_cancellation());
    }

    #[test]
    fn requester_errors_map_onto_taxonomy() {
        let api: AnalysisError = RequesterError::Api {
            status: 401,
            body: "unauthorized".into(),
        }
        .into();
        assert_eq!(api.user_message(), "Ошибка API: 401");

        let cancelled: AnalysisError = RequesterError::Cancelled.into();
        assert!(cancelled.is_cancellation());

        let network: AnalysisError = RequesterError::Network("refused".into()).into();
        assert!(matches!(network, AnalysisError::Transport(_)));
    }

    #[test]
    fn timeout_display_reports_seconds() {
        let err = AnalysisError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "request timed out after 30s");
    }
}
