//! Fact-check requester: the single outbound call to the chat-completion API
//!
//! Two implementations:
//! - `HttpRequester`: POSTs to the configured endpoint with reqwest (production)
//! - `MockRequester`: returns a preconfigured outcome (testing)

use super::request::{ChatRequest, ChatResponseRaw, Completion};
use super::types::Verdict;
use crate::config::TrackerConfig;
use crate::tracker::CancellationToken;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Errors from the outbound completion call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequesterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("request cancelled")]
    Cancelled,
}

/// Makes one completion call per analysis.
///
/// Implementations must abort promptly once `cancel` fires; the tracker also
/// races the token, so a requester that ignores it only wastes the socket.
#[async_trait]
pub trait FactCheckRequester: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, RequesterError>;
}

/// reqwest-backed requester.
#[derive(Clone)]
pub struct HttpRequester {
    http_client: Client,
    endpoint: String,
}

impl HttpRequester {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.endpoint.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, api_key: &str, request: &ChatRequest) -> Result<Completion, RequesterError> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "fact-check request failed");
                RequesterError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(status = %status, error = %e, "failed to read fact-check error body");
                    String::new()
                }
            };
            warn!(status = %status, error = %body, "fact-check API error");
            return Err(RequesterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| RequesterError::MalformedResponse(e.to_string()))?;

        let completion = raw.into_completion().ok_or_else(|| {
            RequesterError::MalformedResponse("response contained no choices".to_string())
        })?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            total_tokens = ?completion.total_tokens,
            "chat completion received"
        );

        Ok(completion)
    }
}

#[async_trait]
impl FactCheckRequester for HttpRequester {
    async fn complete(
        &self,
        api_key: &str,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, RequesterError> {
        // Dropping the send future closes the connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequesterError::Cancelled),
            result = self.send(api_key, request) => result,
        }
    }
}

#[derive(Debug, Clone)]
enum MockBehavior {
    Respond(Completion),
    Fail(RequesterError),
    Hang,
}

/// Mock requester for testing; returns a preconfigured outcome.
pub struct MockRequester {
    behavior: MockBehavior,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    honor_cancel: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl MockRequester {
    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            gate: None,
            honor_cancel: true,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Respond with `content` as the assistant message.
    pub fn responding(content: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Respond(Completion::new(content)))
    }

    pub fn completing(completion: Completion) -> Self {
        Self::with_behavior(MockBehavior::Respond(completion))
    }

    pub fn failing(error: RequesterError) -> Self {
        Self::with_behavior(MockBehavior::Fail(error))
    }

    /// Never resolve.
    pub fn hanging() -> Self {
        Self::with_behavior(MockBehavior::Hang)
    }

    /// Wait this long before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Wait for `gate` to be notified before resolving.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Keep running after cancellation, like a transport that cannot abort.
    pub fn ignoring_cancellation(mut self) -> Self {
        self.honor_cancel = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn resolve(&self) -> Result<Completion, RequesterError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            MockBehavior::Respond(completion) => Ok(completion.clone()),
            MockBehavior::Fail(error) => Err(error.clone()),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl FactCheckRequester for MockRequester {
    async fn complete(
        &self,
        _api_key: &str,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, RequesterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());

        if !self.honor_cancel {
            return self.resolve().await;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequesterError::Cancelled),
            result = self.resolve() => result,
        }
    }
}

/// Helper to construct a model reply for testing: prose around a verdict object.
pub fn mock_response(verdict: Verdict, summary: &str) -> String {
    let body = serde_json::json!({
        "verdict": verdict.label(),
        "confidence_level": "высокий",
        "summary": summary,
        "fact_check": {
            "verified_facts": [{"fact": summary, "source": "https://example.org/news"}],
            "false_claims": [],
            "unverified_claims": []
        },
        "sources_validation": {
            "working_sources": 1,
            "broken_sources": 0,
            "official_sources_count": 1,
            "cross_verification_score": 7
        },
        "recommendations": ["Проверьте первоисточник"]
    });
    format!("Результат проверки:\n{}\nКонец ответа.", body)
}
