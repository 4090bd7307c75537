//! Fact-check request and result handling
//!
//! Builds the completion request, performs it through a `FactCheckRequester`,
//! and turns the free-form reply into a `FactCheckResult`.

mod client;
mod parse;
mod prompt;
mod request;
mod types;

pub use client::{mock_response, FactCheckRequester, HttpRequester, MockRequester, RequesterError};
pub use parse::{extract_json_object, normalize, parse_object, parse_response, ParseError};
pub use prompt::build_prompt;
pub(crate) use prompt::char_prefix;
pub use request::{ChatRequest, Completion, Message};
pub use types::{
    ConfidenceLevel, FactCheck, FactCheckResult, FalseClaim, SourcesValidation, UnverifiedClaim,
    Verdict, VerifiedFact,
};
