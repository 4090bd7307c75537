//! Prompt construction for the fact-check request

/// The longest prefix of `text` with at most `limit` characters.
pub(crate) fn char_prefix(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

const INSTRUCTIONS: &str = r#"Проанализируй этот текст новости и оцени его достоверность. Для каждого факта укажи конкретный источник. Ответь только JSON-объектом следующего вида:

{
  "verdict": "Правдивые|Недостоверные|Частично правдивые",
  "confidence_level": "высокий|средний|низкий",
  "summary": "краткое описание",
  "fact_check": {
    "verified_facts": [{"fact": "проверенный факт", "source": "URL или название источника"}],
    "false_claims": [{"claim": "ложное утверждение", "contradiction_source": "источник опровержения"}],
    "unverified_claims": [{"claim": "непроверенное утверждение", "reason": "почему не удалось проверить"}]
  },
  "sources_validation": {
    "working_sources": 0,
    "broken_sources": 0,
    "official_sources_count": 0,
    "cross_verification_score": 0
  },
  "recommendations": []
}

Если источник неизвестен, пиши "Источник не указан в тексте". Не используй общие фразы."#;

/// Build the user prompt, truncating the article to `input_limit` characters.
pub fn build_prompt(text: &str, input_limit: usize) -> String {
    format!(
        "{}\n\nТекст для анализа: {}",
        INSTRUCTIONS,
        char_prefix(text, input_limit)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_prefix_respects_multibyte_boundaries() {
        assert_eq!(char_prefix("Город X", 3), "Гор");
        assert_eq!(char_prefix("abc", 10), "abc");
        assert_eq!(char_prefix("", 5), "");
        assert_eq!(char_prefix("abc", 0), "");
    }

    #[test]
    fn prompt_truncates_input() {
        let text = "я".repeat(5000);
        let prompt = build_prompt(&text, 4000);
        assert!(prompt.ends_with(&"я".repeat(4000)));
        assert!(!prompt.contains(&"я".repeat(4001)));
    }
}
