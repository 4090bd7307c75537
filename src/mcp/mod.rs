//! MCP server for VacLive: exposes the analysis tracker, history, chat, usage
//! statistics and settings via the Model Context Protocol.
//!
//! Tools: 4 analysis + 4 history + 3 chat + 3 statistics + 2 settings = 16 total.

pub mod params;

use params::*;
use crate::{
    AnalysisEvent, AnalysisTracker, CancelReply, CancellationToken, ChatRelay, HttpRequester,
    KeyValueStore, OpenStore, SqliteStore, StoredCredentials, TrackerConfig,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Events kept for clients that poll instead of subscribing.
const EVENT_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ok_text(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn err_text(msg: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg)]))
}

fn ok_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => ok_text(text),
        Err(e) => err_text(format!("failed to serialize response: {}", e)),
    }
}

type EventBuffer = Arc<Mutex<VecDeque<AnalysisEvent>>>;

/// Copy every published event into `buffer`, dropping the oldest when full.
fn spawn_event_feed(mut events: broadcast::Receiver<AnalysisEvent>, buffer: EventBuffer) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    if buffer.len() == EVENT_BUFFER {
                        buffer.pop_front();
                    }
                    buffer.push_back(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event feed lagged, events lost");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

// ---------------------------------------------------------------------------
// VacliveMcpServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct VacliveMcpServer {
    tracker: AnalysisTracker,
    chat: ChatRelay,
    credentials: StoredCredentials,
    events: EventBuffer,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl VacliveMcpServer {
    /// Must be called inside a tokio runtime; starts buffering events immediately.
    pub fn new(tracker: AnalysisTracker, chat: ChatRelay, store: Arc<dyn KeyValueStore>) -> Self {
        let events: EventBuffer = Arc::new(Mutex::new(VecDeque::new()));
        spawn_event_feed(tracker.subscribe(), events.clone());

        Self {
            tracker,
            chat,
            credentials: StoredCredentials::new(store),
            events,
            tool_router: Self::tool_router(),
        }
    }

    // ── Analysis tools ──────────────────────────────────────────────────

    #[tool(description = "Start fact-checking a news text in the background; returns the analysis ID")]
    fn start_analysis(
        &self,
        Parameters(p): Parameters<StartAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        let title = p.title.unwrap_or_default();
        let id = p.analysis_id.as_deref();
        let started = if p.from_selection.unwrap_or(false) {
            self.tracker.start_from_selection(id, &p.text, &title)
        } else {
            self.tracker.start(id, &p.text, &title)
        };
        match started {
            Ok(accepted) => ok_json(&accepted),
            Err(e) => err_text(e.user_message()),
        }
    }

    #[tool(description = "Get {status, analysis} for an analysis; status is not_found once it left the active set, with lastOutcome telling how it ended")]
    fn get_analysis_status(
        &self,
        Parameters(p): Parameters<AnalysisIdParams>,
    ) -> Result<CallToolResult, McpError> {
        ok_json(&self.tracker.status_reply(&p.analysis_id))
    }

    #[tool(description = "Cancel a running analysis; replies {success, message} or {success: false, error}")]
    fn cancel_analysis(
        &self,
        Parameters(p): Parameters<AnalysisIdParams>,
    ) -> Result<CallToolResult, McpError> {
        ok_json(&CancelReply::from(self.tracker.cancel(&p.analysis_id)))
    }

    #[tool(description = "Drain buffered progress, completion and error events, oldest first")]
    fn recent_events(
        &self,
        Parameters(p): Parameters<RecentEventsParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = p.limit.unwrap_or(usize::MAX);
        let drained: Vec<AnalysisEvent> = {
            let mut buffer = self.events.lock().unwrap_or_else(|e| e.into_inner());
            let mut drained = Vec::new();
            let mut kept = VecDeque::with_capacity(buffer.len());
            for event in buffer.drain(..) {
                let wanted = p
                    .analysis_id
                    .as_deref()
                    .map_or(true, |id| event.analysis_id() == id);
                if wanted && drained.len() < limit {
                    drained.push(event);
                } else {
                    kept.push_back(event);
                }
            }
            *buffer = kept;
            drained
        };
        ok_json(&drained)
    }

    // ── History tools ───────────────────────────────────────────────────

    #[tool(description = "List completed analyses, newest first")]
    fn list_history(
        &self,
        Parameters(p): Parameters<ListHistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.tracker.history().entries() {
            Ok(mut entries) => {
                if let Some(limit) = p.limit {
                    entries.truncate(limit);
                }
                ok_json(&entries)
            }
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Show one completed analysis from history")]
    fn get_history_entry(
        &self,
        Parameters(p): Parameters<HistoryEntryParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.tracker.history().get(&p.analysis_id) {
            Ok(Some(entry)) => ok_json(&entry),
            Ok(None) => err_text(format!("no history entry for {}", p.analysis_id)),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Export the full analysis history as a dated JSON document")]
    fn export_history(&self) -> Result<CallToolResult, McpError> {
        match self.tracker.history().export(self.tracker.now()) {
            Ok(export) => ok_json(&export),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Delete the analysis history")]
    fn clear_history(
        &self,
        Parameters(p): Parameters<ConfirmParams>,
    ) -> Result<CallToolResult, McpError> {
        if !p.confirm {
            return err_text("refusing to clear history without confirm=true".to_string());
        }
        match self.tracker.history().clear() {
            Ok(()) => ok_text("history cleared".to_string()),
            Err(e) => err_text(e.to_string()),
        }
    }

    // ── Chat tools ──────────────────────────────────────────────────────

    #[tool(description = "Ask the model a free-form question; the recent conversation is sent along")]
    async fn send_chat_message(
        &self,
        Parameters(p): Parameters<ChatMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.chat.send(&p.message, &CancellationToken::new()).await {
            Ok(reply) => ok_json(&reply),
            Err(e) => err_text(e.user_message()),
        }
    }

    #[tool(description = "Show the stored chat conversation, oldest first")]
    fn chat_history(&self) -> Result<CallToolResult, McpError> {
        match self.chat.history().messages() {
            Ok(messages) => ok_json(&messages),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Delete the chat conversation")]
    fn clear_chat_history(
        &self,
        Parameters(p): Parameters<ConfirmParams>,
    ) -> Result<CallToolResult, McpError> {
        if !p.confirm {
            return err_text("refusing to clear chat history without confirm=true".to_string());
        }
        match self.chat.history().clear() {
            Ok(_) => ok_text("chat history cleared".to_string()),
            Err(e) => err_text(e.to_string()),
        }
    }

    // ── Statistics tools ────────────────────────────────────────────────

    #[tool(description = "Show usage statistics: requests, tokens, errors, per-function and daily breakdown, recent requests")]
    fn usage_statistics(&self) -> Result<CallToolResult, McpError> {
        match self.tracker.usage().load(self.tracker.now()) {
            Ok(stats) => {
                let buckets = &stats.function_stats;
                ok_json(&serde_json::json!({
                    "errorRate": stats.error_rate(),
                    "averageTimeMs": {
                        "chat": buckets.chat.average_time_ms(),
                        "analysis": buckets.analysis.average_time_ms(),
                        "contextMenu": buckets.context_menu.average_time_ms(),
                    },
                    "statistics": stats,
                }))
            }
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Export usage statistics with a summary, as JSON or CSV")]
    fn export_statistics(
        &self,
        Parameters(p): Parameters<ExportStatisticsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.tracker.usage().export(self.tracker.now()) {
            Ok(export) => match p.format.unwrap_or_default() {
                ExportFormat::Json => ok_json(&export),
                ExportFormat::Csv => ok_text(export.to_csv()),
            },
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Reset usage statistics")]
    fn clear_statistics(
        &self,
        Parameters(p): Parameters<ConfirmParams>,
    ) -> Result<CallToolResult, McpError> {
        if !p.confirm {
            return err_text("refusing to reset statistics without confirm=true".to_string());
        }
        match self.tracker.usage().reset(self.tracker.now()) {
            Ok(_) => ok_text("statistics reset".to_string()),
            Err(e) => err_text(e.to_string()),
        }
    }

    // ── Settings tools ──────────────────────────────────────────────────

    #[tool(description = "Save the API key used for fact-check requests")]
    fn save_api_key(
        &self,
        Parameters(p): Parameters<SaveApiKeyParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.credentials.save_api_key(&p.api_key) {
            Ok(()) => ok_text("API key saved".to_string()),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Cancel running analyses and delete everything stored: API key, history, chat, statistics")]
    fn clear_all_data(
        &self,
        Parameters(p): Parameters<ConfirmParams>,
    ) -> Result<CallToolResult, McpError> {
        if !p.confirm {
            return err_text("refusing to clear all data without confirm=true".to_string());
        }
        match self.tracker.clear_all_data() {
            Ok(removed) => ok_json(&serde_json::json!({ "removed": removed })),
            Err(e) => err_text(e.to_string()),
        }
    }
}

#[tool_handler]
impl ServerHandler for VacliveMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "VacLive MCP server: background fact-checking of news text, chat, history and usage statistics"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run_mcp_server(db_path: PathBuf, config: TrackerConfig) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let store: Arc<dyn KeyValueStore> = match SqliteStore::open(&db_path) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("failed to open database at {}: {}", db_path.display(), e);
                return 1;
            }
        };

        let requester = Arc::new(HttpRequester::from_config(&config));
        let tracker = AnalysisTracker::builder(requester.clone(), store.clone())
            .with_config(config.clone())
            .build();
        let chat = ChatRelay::new(requester, store.clone())
            .with_config(config)
            .with_usage(tracker.usage().clone());
        let server = VacliveMcpServer::new(tracker.clone(), chat, store);

        info!(db = %db_path.display(), "vaclive mcp server starting on stdio");

        let service = match server.serve(rmcp::transport::stdio()).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("failed to start MCP server: {}", e);
                return 1;
            }
        };

        let code = match service.waiting().await {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("MCP server error: {}", e);
                1
            }
        };

        let cancelled = tracker.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "cancelled analyses still running at shutdown");
        }
        code
    })
}
