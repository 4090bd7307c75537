//! Lenient extraction of a fact-check verdict from free-form model output
//!
//! The model is asked for JSON but routinely wraps it in prose or code fences,
//! truncates it, or drifts from the requested shape. Parsing never fails the
//! analysis: anything unrecoverable becomes [`FactCheckResult::unparseable`].

use super::prompt::char_prefix;
use super::types::{
    ConfidenceLevel, FactCheck, FactCheckResult, FalseClaim, SourcesValidation, UnverifiedClaim,
    VerifiedFact, Verdict,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const MISSING_SUMMARY: &str = "Краткое описание не предоставлено";

/// Why no object could be recovered from a response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("response contains no JSON object")]
    NoJsonObject,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

/// Find the first balanced `{…}` span starting at or after byte `from`.
///
/// Braces inside JSON string literals are ignored. Returns `None` if the
/// first opening brace is never closed.
fn balanced_span(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = from + text.get(from..)?.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset));
                }
            }
            _ => {}
        }
    }
    None
}

/// First `{` to last `}`, whatever lies between.
fn greedy_span(text: &str) -> Option<(usize, usize)> {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some((start, end)),
        _ => None,
    }
}

/// Locate the first brace-delimited object in `text`.
///
/// Prefers the first balanced span; falls back to the greedy span when the
/// braces never balance (e.g. a truncated response).
pub fn extract_json_object(text: &str) -> Option<&str> {
    balanced_span(text, 0)
        .or_else(|| greedy_span(text))
        .map(|(start, end)| &text[start..=end])
}

fn parse_candidate(candidate: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("not a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Recover the first JSON object embedded in `text`.
///
/// Tries each balanced span in order, then the greedy span.
pub fn parse_object(text: &str) -> Result<Value, ParseError> {
    let mut first_error: Option<String> = None;
    let mut from = 0;

    while let Some((start, end)) = balanced_span(text, from) {
        match parse_candidate(&text[start..=end]) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        from = start + 1;
    }

    if let Some((start, end)) = greedy_span(text) {
        match parse_candidate(&text[start..=end]) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(ParseError::InvalidJson(e)),
        None => Err(ParseError::NoJsonObject),
    }
}

/// Turn raw model output into a result, never failing.
pub fn parse_response(content: &str) -> FactCheckResult {
    match parse_object(content) {
        Ok(value) => normalize(&value),
        Err(ParseError::NoJsonObject) => {
            debug!("model response has no JSON object, using placeholder result");
            let excerpt = char_prefix(content.trim(), 200);
            let summary = if excerpt.is_empty() {
                "Модель вернула пустой ответ. Рекомендуется проверить источники вручную.".to_string()
            } else {
                format!(
                    "Анализ выполнен, но ответ не содержит структурированных данных. {}",
                    excerpt
                )
            };
            FactCheckResult::unparseable(summary)
        }
        Err(err @ ParseError::InvalidJson(_)) => {
            warn!(error = %err, "model response JSON could not be parsed");
            FactCheckResult::unparseable(format!(
                "Произошла ошибка при анализе текста: {}",
                err
            ))
        }
    }
}

/// First present field among `names` (snake_case and camelCase spellings).
fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| value.get(*name))
}

fn text_field(value: &Value, names: &[&str]) -> Option<String> {
    let text = match field(value, names)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Finite numbers only; "NaN" and "inf" strings parse as floats but cannot be stored.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn counter(value: &Value, names: &[&str]) -> u32 {
    field(value, names)
        .and_then(number)
        .map(|n| n.max(0.0).round() as u32)
        .unwrap_or(0)
}

fn items<'a>(container: &'a Value, names: &[&str]) -> &'a [Value] {
    match field(container, names) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn item_text(item: &Value, names: &[&str]) -> Option<String> {
    match item {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => text_field(item, names),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn verified_facts(container: &Value) -> Vec<VerifiedFact> {
    items(container, &["verified_facts", "verifiedFacts"])
        .iter()
        .enumerate()
        .map(|(i, item)| VerifiedFact {
            fact: item_text(item, &["fact", "text"]).unwrap_or_else(|| format!("Факт {}", i + 1)),
            source: match item {
                Value::String(_) => "Источник не указан в анализе".to_string(),
                _ => text_field(item, &["source"])
                    .unwrap_or_else(|| "Источник не указан".to_string()),
            },
        })
        .collect()
}

fn false_claims(container: &Value) -> Vec<FalseClaim> {
    items(container, &["false_claims", "falseClaims"])
        .iter()
        .enumerate()
        .map(|(i, item)| FalseClaim {
            claim: item_text(item, &["claim", "text"])
                .unwrap_or_else(|| format!("Ложное утверждение {}", i + 1)),
            contradiction_source: text_field(
                item,
                &["contradiction_source", "contradictionSource", "source"],
            )
            .unwrap_or_else(|| "Источник опровержения не указан".to_string()),
        })
        .collect()
}

fn unverified_claims(container: &Value) -> Vec<UnverifiedClaim> {
    items(container, &["unverified_claims", "unverifiedClaims"])
        .iter()
        .enumerate()
        .map(|(i, item)| UnverifiedClaim {
            claim: item_text(item, &["claim", "text"])
                .unwrap_or_else(|| format!("Утверждение {}", i + 1)),
            reason: text_field(item, &["reason"])
                .unwrap_or_else(|| "Причина непроверенности не указана".to_string()),
        })
        .collect()
}

fn sources_validation(value: &Value) -> SourcesValidation {
    let empty = Value::Object(Map::new());
    let sv = field(value, &["sources_validation", "sourcesValidation"]).unwrap_or(&empty);
    SourcesValidation {
        working_sources: counter(sv, &["working_sources", "workingSources"]),
        broken_sources: counter(sv, &["broken_sources", "brokenSources"]),
        official_sources_count: counter(sv, &["official_sources_count", "officialSourcesCount"]),
        cross_verification_score: field(sv, &["cross_verification_score", "crossVerificationScore"])
            .and_then(number)
            .map(|n| n.clamp(0.0, 10.0))
            .unwrap_or(0.0),
    }
}

fn recommendations(value: &Value) -> Vec<String> {
    match field(value, &["recommendations"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item_text(item, &["text", "recommendation"]))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Coerce a parsed object into the result shape, filling gaps with placeholders.
pub fn normalize(value: &Value) -> FactCheckResult {
    // Claim lists are usually nested under `fact_check`, occasionally top-level.
    let container = field(value, &["fact_check", "factCheck"])
        .filter(|v| v.is_object())
        .unwrap_or(value);

    FactCheckResult {
        verdict: text_field(value, &["verdict"])
            .and_then(|v| Verdict::from_label(&v))
            .unwrap_or(Verdict::Unparseable),
        confidence_level: text_field(value, &["confidence_level", "confidenceLevel", "confidence"])
            .and_then(|c| ConfidenceLevel::from_label(&c))
            .unwrap_or(ConfidenceLevel::Low),
        summary: text_field(value, &["summary"]).unwrap_or_else(|| MISSING_SUMMARY.to_string()),
        fact_check: FactCheck {
            verified_facts: verified_facts(container),
            false_claims: false_claims(container),
            unverified_claims: unverified_claims(container),
        },
        sources_validation: sources_validation(value),
        recommendations: recommendations(value),
    }
}
