//! Fact-check against the live chat-completion endpoint
//!
//! Needs network access and `VACLIVE_API_KEY`.
//! Run with: `cargo test --features real_llm --test live_endpoint -- --nocapture`

#![cfg(feature = "real_llm")]

mod common;

use common::events_until_terminal;
use std::sync::Arc;
use vaclive::{
    AnalysisEvent, AnalysisTracker, HttpRequester, OpenStore, SqliteStore, StaticCredentials,
    TrackerConfig,
};

#[tokio::test]
async fn live_fact_check_produces_a_result() {
    let api_key = std::env::var("VACLIVE_API_KEY").expect("VACLIVE_API_KEY must be set");
    let config = TrackerConfig::from_env().unwrap();
    let tracker = AnalysisTracker::builder(
        Arc::new(HttpRequester::from_config(&config)),
        Arc::new(SqliteStore::open_in_memory().unwrap()),
    )
    .with_config(config)
    .with_credentials(Arc::new(StaticCredentials::new(api_key)))
    .build();
    let mut events = tracker.subscribe();

    tracker
        .start(Some("live"), "Вода кипит при 100 градусах Цельсия на уровне моря.", "")
        .unwrap();
    let seen = events_until_terminal(&mut events, "live").await;

    match seen.last().unwrap() {
        AnalysisEvent::AnalysisComplete { result, .. } => {
            println!("{}", serde_json::to_string_pretty(result).unwrap());
            assert!(!result.summary.is_empty());
        }
        other => panic!("live analysis failed: {:?}", other),
    }
}
