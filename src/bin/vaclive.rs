//! VacLive CLI: fact-check news text, with an MCP server for UIs.
//!
//! Usage:
//!   vaclive mcp [--db path]
//!   vaclive analyze <text> | --file <path> [--title title] [--selection]
//!   vaclive chat send <message> | history | clear
//!   vaclive history list | show <id> | export | clear
//!   vaclive stats show | export [--format json|csv] | reset
//!   vaclive key set <key> | clear
//!   vaclive clear-all --yes

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaclive::{
    AnalysisEvent, AnalysisTracker, CancellationToken, ChatRelay, HttpRequester, KeyValueStore,
    OpenStore, SqliteStore, StoredCredentials, TrackerConfig,
};

#[derive(Parser)]
#[command(
    name = "vaclive",
    version,
    about = "Background fact-checking of news text"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Model name, overriding VACLIVE_MODEL
    #[arg(long, global = true)]
    model: Option<String>,
    /// Request timeout in seconds, overriding VACLIVE_TIMEOUT_SECS
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP (Model Context Protocol) server on stdio
    Mcp,
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that run against the database directly.
#[derive(Subcommand)]
enum StoreCommand {
    /// Fact-check one text and print the result as JSON
    Analyze {
        /// Text to check
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,
        /// Read the text from a file instead
        #[arg(long)]
        file: Option<PathBuf>,
        /// Title recorded in history
        #[arg(long, default_value = "")]
        title: String,
        /// Count the run as a selection handed over by another application
        #[arg(long)]
        selection: bool,
    },
    /// Talk to the model, keeping a short conversation
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
    /// Inspect or clear the analysis history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Inspect, export or reset usage statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Delete everything stored: API key, history, chat and statistics
    ClearAll {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Send a message and print the reply
    Send {
        /// The message
        message: String,
    },
    /// Print the stored conversation, oldest first
    History,
    /// Delete the stored conversation
    Clear,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List past analyses, newest first
    List,
    /// Print one past analysis as JSON
    Show {
        /// Analysis ID
        id: String,
    },
    /// Print the full history as a dated JSON export
    Export,
    /// Delete all history entries
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum StatsAction {
    /// Print usage statistics
    Show,
    /// Print statistics with a summary, for saving to a file
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
    },
    /// Reset all counters
    Reset,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Save the API key
    Set {
        /// The API key
        key: String,
    },
    /// Remove the stored API key
    Clear,
}

/// Get the default database path (~/.local/share/vaclive/vaclive.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let vaclive_dir = data_dir.join("vaclive");
    std::fs::create_dir_all(&vaclive_dir).ok();
    vaclive_dir.join("vaclive.db")
}

fn open_store(db: &Path) -> Result<Arc<dyn KeyValueStore>, String> {
    let store =
        SqliteStore::open(db).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

fn load_config(model: Option<String>, timeout: Option<u64>) -> Result<TrackerConfig, String> {
    let mut config =
        TrackerConfig::from_env().map_err(|e| format!("Invalid configuration: {}", e))?;
    if let Some(model) = model {
        config = config.with_model(model);
    }
    match timeout {
        Some(0) => return Err("--timeout must be at least 1 second".to_string()),
        Some(secs) => config = config.with_request_timeout(Duration::from_secs(secs)),
        None => {}
    }
    Ok(config)
}

fn build_tracker(store: Arc<dyn KeyValueStore>, config: TrackerConfig) -> AnalysisTracker {
    let requester = Arc::new(HttpRequester::from_config(&config));
    AnalysisTracker::builder(requester, store)
        .with_config(config)
        .build()
}

fn new_runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            None
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Print a terminal event; `None` for anything else.
fn finish(event: AnalysisEvent) -> Option<i32> {
    match event {
        AnalysisEvent::AnalysisComplete { result, .. } => Some(print_json(&result)),
        AnalysisEvent::AnalysisError { error, .. } => {
            eprintln!("Error: {}", error);
            Some(1)
        }
        AnalysisEvent::AnalysisProgress { .. } => None,
    }
}

fn cmd_analyze(
    store: Arc<dyn KeyValueStore>,
    config: TrackerConfig,
    text: String,
    title: String,
    selection: bool,
) -> i32 {
    let Some(rt) = new_runtime() else {
        return 1;
    };

    rt.block_on(async {
        let tracker = build_tracker(store, config);
        let mut events = tracker.subscribe();
        let started = if selection {
            tracker.start_from_selection(None, &text, &title)
        } else {
            tracker.start(None, &text, &title)
        };
        let id = match started {
            Ok(accepted) => accepted.analysis_id,
            Err(e) => {
                eprintln!("Error: {}", e.user_message());
                return 1;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracker.cancel(&id);
                    eprintln!("Analysis cancelled");
                    return 130;
                }
                event = events.recv() => match event {
                    Ok(event) if event.analysis_id() != id => {}
                    Ok(AnalysisEvent::AnalysisProgress { message, progress, .. }) => {
                        eprintln!("[{:>3}%] {}", progress, message);
                    }
                    Ok(event) => {
                        if let Some(code) = finish(event) {
                            return code;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "progress events skipped");
                        // The terminal event may have been among the skipped ones.
                        if let Some(code) = tracker.terminal_event(&id).and_then(finish) {
                            return code;
                        }
                    }
                    Err(RecvError::Closed) => {
                        eprintln!("Error: event stream closed");
                        return 1;
                    }
                }
            }
        }
    })
}

fn cmd_chat(store: Arc<dyn KeyValueStore>, config: TrackerConfig, action: ChatAction) -> i32 {
    let requester = Arc::new(HttpRequester::from_config(&config));
    let relay = ChatRelay::new(requester, store).with_config(config);
    match action {
        ChatAction::Send { message } => {
            let Some(rt) = new_runtime() else {
                return 1;
            };
            rt.block_on(async {
                let cancel = CancellationToken::new();
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                        eprintln!("Chat request cancelled");
                        130
                    }
                    reply = relay.send(&message, &cancel) => match reply {
                        Ok(reply) => {
                            println!("{}", reply.content);
                            0
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e.user_message());
                            1
                        }
                    },
                }
            })
        }
        ChatAction::History => match relay.history().messages() {
            Ok(messages) => {
                for message in &messages {
                    let who = if message.is_user { "you" } else { "bot" };
                    println!(
                        "{}  {}: {}",
                        message.timestamp.format("%Y-%m-%d %H:%M"),
                        who,
                        message.text
                    );
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        ChatAction::Clear => match relay.history().clear() {
            Ok(_) => {
                println!("Chat history cleared");
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    }
}

fn cmd_history(store: Arc<dyn KeyValueStore>, config: TrackerConfig, action: HistoryAction) -> i32 {
    let history = vaclive::HistoryLog::new(store)
        .with_capacity(config.history_capacity)
        .with_text_limit(config.history_text_limit);
    let result = match action {
        HistoryAction::List => history.entries().map(|entries| {
            if entries.is_empty() {
                println!("No analyses yet");
            }
            for entry in &entries {
                println!(
                    "{}  {:<24}  {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.result.verdict,
                    entry.id,
                    entry.title
                );
            }
            0
        }),
        HistoryAction::Show { id } => history.get(&id).map(|entry| match entry {
            Some(entry) => print_json(&entry),
            None => {
                eprintln!("No analysis {} in history", id);
                1
            }
        }),
        HistoryAction::Export => history
            .export(chrono::Utc::now())
            .map(|export| print_json(&export)),
        HistoryAction::Clear => history.clear().map(|()| {
            println!("History cleared");
            0
        }),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        1
    })
}

fn cmd_stats(store: Arc<dyn KeyValueStore>, action: StatsAction) -> i32 {
    let usage = vaclive::UsageLog::new(store);
    let now = chrono::Utc::now();
    let result = match action {
        StatsAction::Show => usage.load(now).map(|stats| {
            println!("Since:          {}", stats.start_date);
            println!("Requests:       {}", stats.total_requests);
            println!("Tokens:         {}", stats.total_tokens);
            println!("Errors:         {} ({:.1}%)", stats.error_count, stats.error_rate());
            println!("Cancelled:      {}", stats.cancelled_count);
            println!("Cross-check:    {:.1}/10", stats.cross_check_score);
            let today = stats.day(now);
            println!(
                "Today:          {} requests, {} tokens, {} errors",
                today.requests, today.tokens, today.errors
            );
            println!();
            println!("{:<18} {:>8} {:>8} {:>10}", "Function", "Requests", "Tokens", "Avg ms");
            for (kind, bucket) in stats.function_stats.iter() {
                println!(
                    "{:<18} {:>8} {:>8} {:>10}",
                    kind.label(),
                    bucket.count,
                    bucket.tokens,
                    bucket.average_time_ms()
                );
            }
            if !stats.recent_requests.is_empty() {
                println!();
                println!("Recent requests:");
                for request in stats.recent(10) {
                    println!(
                        "  {}  {:<18} {:>6}  {:?}",
                        request.timestamp.format("%d.%m %H:%M"),
                        request.kind.label(),
                        request.tokens,
                        request.status
                    );
                }
            }
            0
        }),
        StatsAction::Export { format } => usage.export(now).map(|export| match format {
            ExportFormat::Json => print_json(&export),
            ExportFormat::Csv => {
                println!("{}", export.to_csv());
                0
            }
        }),
        StatsAction::Reset => usage.reset(now).map(|_| {
            println!("Statistics reset");
            0
        }),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        1
    })
}

fn cmd_key(store: Arc<dyn KeyValueStore>, action: KeyAction) -> i32 {
    let credentials = StoredCredentials::new(store);
    let result = match action {
        KeyAction::Set { key } => credentials.save_api_key(&key).map(|()| {
            println!("API key saved");
            0
        }),
        KeyAction::Clear => credentials.clear_api_key().map(|removed| {
            if removed {
                println!("API key removed");
            } else {
                println!("No API key was stored");
            }
            0
        }),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        1
    })
}

fn cmd_clear_all(store: Arc<dyn KeyValueStore>, config: TrackerConfig, yes: bool) -> i32 {
    if !yes {
        eprintln!("Refusing to delete all data without --yes");
        return 1;
    }
    match build_tracker(store, config).clear_all_data() {
        Ok(removed) => {
            println!("All data cleared ({} entries)", removed.len());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn read_input(text: Option<String>, file: Option<PathBuf>) -> Result<String, String> {
    match (text, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e)),
        (None, None) => Err("provide text or --file".to_string()),
    }
}

fn run_store_command(
    store: Arc<dyn KeyValueStore>,
    config: TrackerConfig,
    command: StoreCommand,
) -> i32 {
    match command {
        StoreCommand::Analyze {
            text,
            file,
            title,
            selection,
        } => match read_input(text, file) {
            Ok(text) => cmd_analyze(store, config, text, title, selection),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        StoreCommand::Chat { action } => cmd_chat(store, config, action),
        StoreCommand::History { action } => cmd_history(store, config, action),
        StoreCommand::Stats { action } => cmd_stats(store, action),
        StoreCommand::Key { action } => cmd_key(store, action),
        StoreCommand::ClearAll { yes } => cmd_clear_all(store, config, yes),
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(default_db_path);
    let config = match load_config(cli.model, cli.timeout) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Mcp => vaclive::mcp::run_mcp_server(db_path, config),
        Commands::Store(command) => match open_store(&db_path) {
            Ok(store) => run_store_command(store, config, command),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    };
    std::process::exit(code);
}
