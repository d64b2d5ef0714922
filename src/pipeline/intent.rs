//! Intent classifier & rewriter (C9).
//!
//! Single LLM call: classify `sql`/`general`/`mixed` and, for the former two,
//! rewrite follow-up questions into a standalone form using recent history.

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::llm::{parse_json_response, LlmClient, Message};
use crate::session::Exchange;

use super::state::Intent;

#[derive(Debug, Clone, Deserialize)]
struct IntentResponse {
    intent: String,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default)]
    general_answer: Option<String>,
}

/// Result of classification: resolved intent, the standalone query to use
/// downstream, and a general-knowledge answer when applicable.
pub struct IntentResult {
    pub intent: Intent,
    pub rewritten_query: String,
    pub general_answer: Option<String>,
}

/// Classifies `query` given the last `SESSION_HISTORY_INJECTED` exchanges,
/// a compact schema header, and the suggested-query list. Retries once on
/// JSON parse failure with a stricter prompt; on a second failure, degrades
/// to treating the raw query as `sql` without rewriting (per §4.4).
pub async fn classify(
    llm: &dyn LlmClient,
    query: &str,
    history: &[Exchange],
    schema_header: &str,
    suggested_queries: &[String],
) -> Result<IntentResult> {
    let prompt = build_prompt(query, history, schema_header, suggested_queries, false);
    let messages = vec![Message::user(prompt)];

    match llm.complete(&messages).await {
        Ok(text) => match parse_json_response::<IntentResponse>(&text) {
            Ok(parsed) => return Ok(resolve(parsed, query)),
            Err(e) => warn!("intent classifier returned unparsable JSON, retrying: {e}"),
        },
        Err(e) => warn!("intent classifier LLM call failed, retrying: {e}"),
    }

    let strict_prompt = build_prompt(query, history, schema_header, suggested_queries, true);
    let messages = vec![Message::user(strict_prompt)];
    match llm.complete(&messages).await {
        Ok(text) => match parse_json_response::<IntentResponse>(&text) {
            Ok(parsed) => Ok(resolve(parsed, query)),
            Err(e) => {
                warn!("intent classifier failed after retry, defaulting to sql intent: {e}");
                Ok(IntentResult {
                    intent: Intent::Sql,
                    rewritten_query: query.to_string(),
                    general_answer: None,
                })
            }
        },
        Err(e) => {
            warn!("intent classifier LLM call failed after retry, defaulting to sql intent: {e}");
            Ok(IntentResult {
                intent: Intent::Sql,
                rewritten_query: query.to_string(),
                general_answer: None,
            })
        }
    }
}

fn resolve(parsed: IntentResponse, original: &str) -> IntentResult {
    let intent = match parsed.intent.to_lowercase().as_str() {
        "general" => Intent::General,
        "mixed" => Intent::Mixed,
        _ => Intent::Sql,
    };
    let rewritten_query = parsed.rewritten_query.unwrap_or_else(|| original.to_string());
    IntentResult {
        intent,
        rewritten_query,
        general_answer: parsed.general_answer,
    }
}

fn build_prompt(
    query: &str,
    history: &[Exchange],
    schema_header: &str,
    suggested_queries: &[String],
    strict: bool,
) -> String {
    let history_block = if history.is_empty() {
        "(none)".to_string()
    } else {
        history
            .iter()
            .map(|e| format!("- user: {}", e.user_message))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let strictness = if strict {
        "Return ONLY a single JSON object with no prose, no markdown fence, and no trailing text."
    } else {
        "Return a JSON object, optionally inside a ```json fenced block."
    };

    format!(
        "Classify the user's question as one of \"sql\", \"general\", or \"mixed\".\n\
         For \"sql\" and \"mixed\", rewrite the question into a standalone form \
         resolving pronouns and ellipses from the recent conversation (\"which ones\", \
         \"those\", \"remove column X\"); for a question that is already standalone, \
         rewritten_query must equal the original question verbatim.\n\
         For \"general\" and \"mixed\", include a markdown general_answer.\n\n\
         Recent conversation:\n{history_block}\n\n\
         Available tables:\n{schema_header}\n\n\
         Suggested queries: {suggested}\n\n\
         Question: {query}\n\n\
         {strictness}\n\
         JSON shape: {{\"intent\": \"sql\"|\"general\"|\"mixed\", \"rewritten_query\": string, \"general_answer\": string|null}}",
        suggested = suggested_queries.join(", "),
    )
}
