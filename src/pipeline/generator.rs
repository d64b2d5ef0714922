//! SQL generator (C11, §4.6).
//!
//! One LLM call producing a dialect-specific `SELECT`, extracted from the
//! response via [`crate::llm::parse_llm_response`]. On a downstream
//! validation or execution failure the caller re-invokes [`generate`] with
//! the previous SQL and error folded into the prompt, up to the pipeline's
//! global retry budget.

use crate::error::{AppError, Result};
use crate::llm::{parse_llm_response, LlmClient, Message};
use crate::schema::DatabaseType;

/// Previous attempt's SQL and the reason it failed, fed back into the prompt
/// on a retry so the model can self-correct instead of repeating itself.
pub struct PriorAttempt<'a> {
    pub sql: &'a str,
    pub error: &'a str,
}

/// Generates a single SQL statement for `query` against `schema_context`.
/// Returns [`AppError::sql_gen`] if the response contains no extractable SQL.
pub async fn generate(
    llm: &dyn LlmClient,
    query: &str,
    schema_context: &str,
    dialect: DatabaseType,
    prior: Option<PriorAttempt<'_>>,
) -> Result<String> {
    let prompt = build_prompt(query, schema_context, dialect, prior);
    let response = llm.complete(&[Message::user(prompt)]).await?;
    let parsed = parse_llm_response(&response);
    parsed
        .sql
        .ok_or_else(|| AppError::sql_gen("model response contained no SQL code block"))
}

fn build_prompt(
    query: &str,
    schema_context: &str,
    dialect: DatabaseType,
    prior: Option<PriorAttempt<'_>>,
) -> String {
    let dialect_rules = match dialect {
        DatabaseType::Sqlite => "Use SQLite syntax (no RIGHT JOIN/FULL JOIN, use strftime for dates).",
        DatabaseType::Postgres => "Use PostgreSQL syntax (ILIKE for case-insensitive matching, date_trunc for dates).",
    };

    let retry_block = match prior {
        Some(p) => format!(
            "\nThe previous attempt failed:\n```sql\n{}\n```\nError: {}\n\
             Produce a corrected query that avoids this error.\n",
            p.sql, p.error
        ),
        None => String::new(),
    };

    format!(
        "Write a single read-only SELECT statement answering the question below.\n\
         {dialect_rules}\n\
         Only use the tables and columns listed. Return exactly one SQL statement \
         inside a ```sql fenced code block, with no other statements.\n\n\
         Schema:\n{schema_context}\n\
         {retry_block}\n\
         Question: {query}"
    )
}
