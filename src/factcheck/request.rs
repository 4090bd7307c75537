//! Chat-completion wire types

use crate::config::TrackerConfig;
use serde::{Deserialize, Serialize};

use super::prompt::build_prompt;

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// The single-message fact-check request for `text`.
    pub fn fact_check(config: &TrackerConfig, text: &str) -> Self {
        Self {
            model: config.model.clone(),
            messages: vec![Message::user(build_prompt(text, config.prompt_input_limit))],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// A conversational request; `messages` ends with the new user turn.
    pub fn chat(config: &TrackerConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            max_tokens: config.chat_max_tokens,
            temperature: config.chat_temperature,
        }
    }
}

/// What the requester hands back: the assistant text plus token usage.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub total_tokens: Option<u64>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            total_tokens: None,
        }
    }

    pub fn with_total_tokens(mut self, tokens: u64) -> Self {
        self.total_tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseRaw {
    #[serde(default)]
    pub choices: Vec<ChoiceRaw>,
    #[serde(default)]
    pub usage: Option<UsageRaw>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceRaw {
    pub message: ChoiceMessageRaw,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessageRaw {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsageRaw {
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl ChatResponseRaw {
    /// `choices[0].message.content`, if present.
    pub fn into_completion(self) -> Option<Completion> {
        let content = self.choices.into_iter().next()?.message.content?;
        Some(Completion {
            content,
            total_tokens: self.usage.and_then(|u| u.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_matches_endpoint_contract() {
        let request = ChatRequest::fact_check(&TrackerConfig::default(), "Новость");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], json!("deepseek-chat"));
        assert_eq!(body["max_tokens"], json!(2000));
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with("Текст для анализа: Новость"));
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn envelope_yields_first_choice() {
        let raw: ChatResponseRaw = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"verdict\": \"Правдивые\"}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();
        let completion = raw.into_completion().unwrap();
        assert_eq!(completion.total_tokens, Some(15));
        assert!(completion.content.contains("Правдивые"));
    }

    #[test]
    fn envelope_without_choices_yields_none() {
        let raw: ChatResponseRaw = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(raw.into_completion().is_none());
    }
}
