//! Free-form chat with the model over a short rolling transcript
//!
//! The transcript lives under [`keys::CHAT_HISTORY`], oldest first. Each new
//! message goes out with the most recent turns as context; failed exchanges
//! are kept in the transcript but never sent back to the model.

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::credentials::{CredentialStore, StoredCredentials};
use crate::error::AnalysisError;
use crate::factcheck::{ChatRequest, Completion, FactCheckRequester, Message};
use crate::stats::{RequestKind, UsageLog, UsageRecord};
use crate::storage::{keys, KeyValueStore, StorageResult, TypedStoreExt};
use crate::tracker::CancellationToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Marks a transcript entry that records a failed exchange.
pub const ERROR_PREFIX: &str = "❌ Ошибка: ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            timestamp: at,
        }
    }

    pub fn assistant(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            timestamp: at,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.is_user && self.text.starts_with(ERROR_PREFIX)
    }

    fn to_message(&self) -> Message {
        if self.is_user {
            Message::user(self.text.clone())
        } else {
            Message::assistant(self.text.clone())
        }
    }
}

/// The stored transcript, trimmed to `capacity` messages.
#[derive(Clone)]
pub struct ChatLog {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            capacity: 20,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> StorageResult<Vec<ChatMessage>> {
        let messages: Option<Vec<ChatMessage>> = self.store.load(keys::CHAT_HISTORY)?;
        Ok(messages.unwrap_or_default())
    }

    pub fn append(&self, message: ChatMessage) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages = self.messages()?;
        messages.push(message);
        let overflow = messages.len().saturating_sub(self.capacity);
        messages.drain(..overflow);
        self.store.save(keys::CHAT_HISTORY, &messages)
    }

    pub fn clear(&self) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store.remove(keys::CHAT_HISTORY)
    }
}

/// What one chat exchange produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Sends chat messages through the same requester as fact-checks.
#[derive(Clone)]
pub struct ChatRelay {
    config: TrackerConfig,
    requester: Arc<dyn FactCheckRequester>,
    credentials: Arc<dyn CredentialStore>,
    log: ChatLog,
    usage: UsageLog,
    clock: Arc<dyn Clock>,
}

impl ChatRelay {
    pub fn new(requester: Arc<dyn FactCheckRequester>, store: Arc<dyn KeyValueStore>) -> Self {
        let config = TrackerConfig::default();
        Self {
            log: ChatLog::new(store.clone()).with_capacity(config.chat_history_capacity),
            credentials: Arc::new(StoredCredentials::new(store.clone())),
            usage: UsageLog::new(store),
            config,
            requester,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.log = self.log.with_capacity(config.chat_history_capacity);
        self.config = config;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a statistics handle (and its write lock) with a tracker.
    pub fn with_usage(mut self, usage: UsageLog) -> Self {
        self.usage = usage;
        self
    }

    pub fn history(&self) -> &ChatLog {
        &self.log
    }

    /// Send `text` with the recent transcript as context and wait for the reply.
    ///
    /// Both turns are appended to the transcript. A failure is appended as an
    /// error entry instead of a reply; a cancellation appends nothing further.
    pub async fn send(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let mut messages: Vec<Message> = {
            let transcript = self.log.messages()?;
            let skip = transcript.len().saturating_sub(self.config.chat_context_messages);
            transcript[skip..]
                .iter()
                .filter(|m| !m.is_error())
                .map(ChatMessage::to_message)
                .collect()
        };
        messages.push(Message::user(text));
        self.log.append(ChatMessage::user(text, self.clock.now()))?;

        let started = Instant::now();
        match self.exchange(messages, cancel).await {
            Ok(completion) => {
                let now = self.clock.now();
                self.log
                    .append(ChatMessage::assistant(completion.content.clone(), now))?;
                self.record_usage(UsageRecord::Completed {
                    kind: RequestKind::Chat,
                    tokens: completion.total_tokens.unwrap_or(0),
                    elapsed: started.elapsed(),
                    cross_check_score: None,
                });
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "chat reply received"
                );
                Ok(ChatReply {
                    content: completion.content,
                    total_tokens: completion.total_tokens,
                })
            }
            Err(err) if err.is_cancellation() => {
                debug!("chat request cancelled");
                self.record_usage(UsageRecord::Cancelled);
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "chat request failed");
                let entry = format!("{}{}", ERROR_PREFIX, err.user_message());
                if let Err(e) = self.log.append(ChatMessage::assistant(entry, self.clock.now())) {
                    warn!(error = %e, "failed to save chat error to history");
                }
                self.record_usage(UsageRecord::Failed {
                    kind: RequestKind::Chat,
                });
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Completion, AnalysisError> {
        let api_key = self
            .credentials
            .api_key()?
            .ok_or(AnalysisError::CredentialMissing)?;
        let request = ChatRequest::chat(&self.config, messages);
        let timeout = self.config.request_timeout();
        debug!(model = %request.model, turns = request.messages.len(), "sending chat request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            outcome = tokio::time::timeout(
                timeout,
                self.requester.complete(&api_key, &request, cancel),
            ) => match outcome {
                Ok(result) => result.map_err(AnalysisError::from),
                Err(_) => Err(AnalysisError::Timeout(timeout)),
            },
        }
    }

    fn record_usage(&self, record: UsageRecord) {
        if let Err(e) = self.usage.record(record, self.clock.now()) {
            warn!(error = %e, "failed to update usage statistics");
        }
    }
}
