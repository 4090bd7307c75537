//! Fact-check result model
//!
//! Field names and enum labels follow the JSON the browser UI already renders.

use serde::{Deserialize, Serialize};

/// Overall truthfulness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Правдивые")]
    Truthful,
    #[serde(rename = "Недостоверные")]
    False,
    #[serde(rename = "Частично правдивые")]
    PartiallyTrue,
    #[serde(rename = "Не удалось проанализировать")]
    Unparseable,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Truthful => "Правдивые",
            Self::False => "Недостоверные",
            Self::PartiallyTrue => "Частично правдивые",
            Self::Unparseable => "Не удалось проанализировать",
        }
    }

    /// Match a free-form model label, Russian or English.
    ///
    /// "Partially" is checked first since "частично правдивые" also contains "правдив".
    pub fn from_label(raw: &str) -> Option<Self> {
        let label = raw.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        if label.starts_with("частично") || label.starts_with("partially") || label == "mixed" {
            Some(Self::PartiallyTrue)
        } else if label.starts_with("недостовер")
            || label.starts_with("ложн")
            || label.starts_with("false")
            || label.starts_with("fake")
        {
            Some(Self::False)
        } else if label.starts_with("правдив")
            || label.starts_with("достовер")
            || label.starts_with("true")
            || label.starts_with("truthful")
        {
            Some(Self::Truthful)
        } else if label.starts_with("не удалось") || label.starts_with("unparseable") {
            Some(Self::Unparseable)
        } else {
            None
        }
    }

    /// Body of the desktop notification sent on completion.
    pub fn notification_text(&self) -> &'static str {
        match self {
            Self::Truthful => "✅ Анализ завершен: Новости правдивые",
            Self::False => "❌ Анализ завершен: Новости недостоверные",
            Self::PartiallyTrue => "⚠️ Анализ завершен: Новости частично правдивые",
            Self::Unparseable => "⚠️ Анализ завершен: не удалось определить достоверность",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// How sure the model claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "высокий")]
    High,
    #[serde(rename = "средний")]
    Medium,
    #[serde(rename = "низкий")]
    Low,
}

impl ConfidenceLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "высокий",
            Self::Medium => "средний",
            Self::Low => "низкий",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let label = raw.trim().to_lowercase();
        if label.starts_with("высок") || label.starts_with("high") {
            Some(Self::High)
        } else if label.starts_with("средн") || label.starts_with("medium") {
            Some(Self::Medium)
        } else if label.starts_with("низк") || label.starts_with("low") {
            Some(Self::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFact {
    pub fact: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalseClaim {
    pub claim: String,
    pub contradiction_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiedClaim {
    pub claim: String,
    pub reason: String,
}

/// The three claim lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheck {
    #[serde(default)]
    pub verified_facts: Vec<VerifiedFact>,
    #[serde(default)]
    pub false_claims: Vec<FalseClaim>,
    #[serde(default)]
    pub unverified_claims: Vec<UnverifiedClaim>,
}

/// Source-quality counters reported by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesValidation {
    #[serde(default)]
    pub working_sources: u32,
    #[serde(default)]
    pub broken_sources: u32,
    #[serde(default)]
    pub official_sources_count: u32,
    /// 0 to 10
    #[serde(default)]
    pub cross_verification_score: f64,
}

/// Structured verdict for one analysis. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub verdict: Verdict,
    pub confidence_level: ConfidenceLevel,
    pub summary: String,
    #[serde(default)]
    pub fact_check: FactCheck,
    #[serde(default)]
    pub sources_validation: SourcesValidation,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl FactCheckResult {
    /// Placeholder shown when the model output could not be interpreted.
    pub fn unparseable(summary: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unparseable,
            confidence_level: ConfidenceLevel::Low,
            summary: summary.into(),
            fact_check: FactCheck::default(),
            sources_validation: SourcesValidation::default(),
            recommendations: vec![
                "Попробуйте проанализировать другой текст".to_string(),
                "Проверьте источники вручную".to_string(),
            ],
        }
    }

    pub fn claim_count(&self) -> usize {
        self.fact_check.verified_facts.len()
            + self.fact_check.false_claims.len()
            + self.fact_check.unverified_claims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_labels_match_leniently() {
        assert_eq!(Verdict::from_label("Правдивые"), Some(Verdict::Truthful));
        assert_eq!(Verdict::from_label(" недостоверные "), Some(Verdict::False));
        assert_eq!(
            Verdict::from_label("Частично правдивые"),
            Some(Verdict::PartiallyTrue)
        );
        assert_eq!(Verdict::from_label("Partially true"), Some(Verdict::PartiallyTrue));
        assert_eq!(Verdict::from_label("FALSE"), Some(Verdict::False));
        assert_eq!(Verdict::from_label("maybe"), None);
        assert_eq!(Verdict::from_label(""), None);
    }

    #[test]
    fn confidence_labels_match_leniently() {
        assert_eq!(ConfidenceLevel::from_label("Высокий"), Some(ConfidenceLevel::High));
        assert_eq!(ConfidenceLevel::from_label("medium"), Some(ConfidenceLevel::Medium));
        assert_eq!(ConfidenceLevel::from_label("низкая"), Some(ConfidenceLevel::Low));
        assert_eq!(ConfidenceLevel::from_label("?"), None);
    }

    #[test]
    fn result_serializes_with_ui_labels() {
        let result = FactCheckResult::unparseable("нет данных");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["verdict"], json!("Не удалось проанализировать"));
        assert_eq!(value["confidence_level"], json!("низкий"));
        assert_eq!(value["fact_check"]["verified_facts"], json!([]));
        assert_eq!(value["sources_validation"]["working_sources"], json!(0));
    }

    #[test]
    fn stored_result_deserializes_with_missing_sections() {
        let value = json!({
            "verdict": "Правдивые",
            "confidence_level": "высокий",
            "summary": "ok"
        });
        let result: FactCheckResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.verdict, Verdict::Truthful);
        assert_eq!(result.claim_count(), 0);
        assert!(result.recommendations.is_empty());
    }
}
