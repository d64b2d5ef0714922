//! Strict-JSON extraction for the intent classifier (C9).
//!
//! The intent classifier asks the LLM for a single JSON object and must cope
//! with models that wrap it in a markdown code fence anyway. Mirrors
//! [`super::parser::parse_llm_response`]'s fence-stripping but deserializes
//! the result instead of treating it as opaque SQL text.

use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;

/// Parses `response` as JSON, tolerating a ```json ... ``` or bare ``` ... ```
/// fence around the object. Fails with `IntentParse` if no fenced or bare JSON
/// object can be deserialized into `T`.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Result<T> {
    let candidates = [
        extract_fenced(response, "json"),
        extract_fenced(response, ""),
        Some(response.trim().to_string()),
    ];

    let mut last_error = String::new();
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(AppError::intent_parse(format!(
        "no valid JSON object found in LLM response: {last_error}"
    )))
}

fn extract_fenced(text: &str, lang: &str) -> Option<String> {
    let start_pattern = if lang.is_empty() { "```".to_string() } else { format!("```{lang}") };
    let start_idx = text.find(&start_pattern)?;
    let content_start = text[start_idx + start_pattern.len()..]
        .find('\n')
        .map(|i| start_idx + start_pattern.len() + i + 1)?;
    let end_idx = text[content_start..].find("```")?;
    Some(text[content_start..content_start + end_idx].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Intent {
        is_data_question: bool,
        rewritten_query: String,
    }

    #[test]
    fn parses_bare_json() {
        let response = r#"{"is_data_question": true, "rewritten_query": "all users"}"#;
        let intent: Intent = parse_json_response(response).unwrap();
        assert!(intent.is_data_question);
        assert_eq!(intent.rewritten_query, "all users");
    }

    #[test]
    fn parses_json_fenced_block() {
        let response = "Here you go:\n```json\n{\"is_data_question\": false, \"rewritten_query\": \"\"}\n```";
        let intent: Intent = parse_json_response(response).unwrap();
        assert!(!intent.is_data_question);
    }

    #[test]
    fn parses_generic_fenced_block() {
        let response = "```\n{\"is_data_question\": true, \"rewritten_query\": \"x\"}\n```";
        let intent: Intent = parse_json_response(response).unwrap();
        assert!(intent.is_data_question);
    }

    #[test]
    fn fails_on_unparseable_text() {
        let response = "I don't understand your question.";
        let result: Result<Intent> = parse_json_response(response);
        assert_eq!(result.unwrap_err().error_code(), "IntentParse");
    }
}
