//! MCP tool parameter structs with schemars-derived JSON schemas.

use schemars::JsonSchema;
use serde::Deserialize;

// ── Analysis params ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartAnalysisParams {
    #[schemars(description = "News text to fact-check")]
    pub text: String,
    #[schemars(description = "Title shown in history (optional)")]
    pub title: Option<String>,
    #[schemars(description = "Analysis ID to use; generated when omitted. Reusing a live ID restarts it")]
    pub analysis_id: Option<String>,
    #[schemars(description = "True when the text is a selection from another application")]
    pub from_selection: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalysisIdParams {
    #[schemars(description = "The analysis ID")]
    pub analysis_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecentEventsParams {
    #[schemars(description = "Only drain events for this analysis")]
    pub analysis_id: Option<String>,
    #[schemars(description = "Maximum number of events to return")]
    pub limit: Option<usize>,
}

// ── History params ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListHistoryParams {
    #[schemars(description = "Maximum number of entries, newest first")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoryEntryParams {
    #[schemars(description = "ID of the completed analysis")]
    pub analysis_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConfirmParams {
    #[schemars(description = "Must be true; the deletion cannot be undone")]
    pub confirm: bool,
}

// ── Chat params ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChatMessageParams {
    #[schemars(description = "Message to send; the recent conversation goes along as context")]
    pub message: String,
}

// ── Statistics params ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportStatisticsParams {
    #[schemars(description = "json (default) or csv")]
    pub format: Option<ExportFormat>,
}

// ── Settings params ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveApiKeyParams {
    #[schemars(description = "API key for the chat-completion service")]
    pub api_key: String,
}
