//! Result interpreter (C13, §4.9).
//!
//! Two independent jobs run on the executor's output: a synchronous
//! rule-based chart recommendation (no LLM call, can't fail) and an async
//! LLM insight call producing a short natural-language summary. "Trivial"
//! result sets (no rows, or a single scalar cell) skip the LLM call
//! entirely and get a templated answer instead.

use crate::constants::INTERPRETER_GROUPING_CARDINALITY;
use crate::db::{ColumnInfo, Row, TotalCount, Value};
use crate::error::Result;
use crate::llm::{LlmClient, Message};

use super::state::{VizSpec, VizType};

const TEMPORAL_HINTS: &[&str] = &["date", "time", "timestamp", "created_at", "updated_at", "month", "year", "day"];
const NUMERIC_TYPES: &[&str] = &["int", "integer", "float", "real", "double", "decimal", "numeric", "bigint"];

fn is_temporal(col: &ColumnInfo) -> bool {
    let name = col.name.to_lowercase();
    TEMPORAL_HINTS.iter().any(|hint| name.contains(hint))
}

fn is_numeric(col: &ColumnInfo) -> bool {
    let data_type = col.data_type.to_lowercase();
    NUMERIC_TYPES.iter().any(|t| data_type.contains(t))
}

fn distinct_count(rows: &[Row], col_idx: usize) -> usize {
    let mut seen = std::collections::HashSet::new();
    for row in rows {
        if let Some(value) = row.get(col_idx) {
            seen.insert(format!("{value:?}"));
        }
    }
    seen.len()
}

/// Rule-based visualization selection (§4.9): temporal+numeric → line,
/// low-cardinality-grouping+numeric → bar or pie, two numeric columns →
/// scatter, otherwise no chart (table view only).
pub fn recommend_visualization(columns: &[ColumnInfo], rows: &[Row]) -> Option<VizSpec> {
    if rows.is_empty() || columns.len() < 2 {
        return None;
    }

    let temporal_idx = columns.iter().position(is_temporal);
    let numeric_idxs: Vec<usize> = columns.iter().enumerate().filter(|(_, c)| is_numeric(c)).map(|(i, _)| i).collect();

    if let (Some(t), Some(&y)) = (temporal_idx, numeric_idxs.first()) {
        return Some(VizSpec {
            viz_type: VizType::Line,
            title: format!("{} over {}", columns[y].name, columns[t].name),
            x_column: columns[t].name.clone(),
            y_column: columns[y].name.clone(),
            group_column: None,
            reason: "temporal column paired with a numeric measure".to_string(),
        });
    }

    let grouping_idx = columns.iter().enumerate().find(|(i, c)| {
        !is_numeric(c) && !is_temporal(c) && distinct_count(rows, *i) <= INTERPRETER_GROUPING_CARDINALITY
    });

    if let (Some((g, group_col)), Some(&y)) = (grouping_idx, numeric_idxs.first()) {
        let group_cardinality = distinct_count(rows, g);
        let viz_type = if group_cardinality <= 6 { VizType::Pie } else { VizType::Bar };
        return Some(VizSpec {
            viz_type,
            title: format!("{} by {}", columns[y].name, group_col.name),
            x_column: group_col.name.clone(),
            y_column: columns[y].name.clone(),
            group_column: None,
            reason: "low-cardinality grouping column paired with a numeric measure".to_string(),
        });
    }

    if numeric_idxs.len() >= 2 {
        let x = numeric_idxs[0];
        let y = numeric_idxs[1];
        return Some(VizSpec {
            viz_type: VizType::Scatter,
            title: format!("{} vs {}", columns[y].name, columns[x].name),
            x_column: columns[x].name.clone(),
            y_column: columns[y].name.clone(),
            group_column: None,
            reason: "two numeric measures with no grouping or temporal axis".to_string(),
        });
    }

    None
}

/// Returns true for result sets trivial enough to skip the LLM insight call:
/// no rows, a single scalar cell, or a single-column listing with no
/// temporal axis (a plain list of names has nothing for the LLM to add).
fn is_trivial(columns: &[ColumnInfo], rows: &[Row]) -> bool {
    if rows.is_empty() || (rows.len() == 1 && rows[0].len() == 1) {
        return true;
    }
    columns.len() == 1 && !columns.first().is_some_and(is_temporal)
}

fn trivial_summary(columns: &[ColumnInfo], rows: &[Row], total_count: Option<TotalCount>) -> String {
    if rows.is_empty() {
        return "No rows matched this query.".to_string();
    }
    if rows.len() == 1 && rows[0].len() == 1 {
        let value = &rows[0][0];
        if let Value::Int(n) = value {
            return format!("Found {n} item(s).");
        }
        let label = columns.first().map(|c| c.name.as_str()).unwrap_or("value");
        return format!("{label}: {value}");
    }
    let count_label = match total_count {
        Some(TotalCount::Exact(n)) => n.to_string(),
        Some(TotalCount::Unknown) => "more than the displayed".to_string(),
        None => rows.len().to_string(),
    };
    format!("Found {count_label} items.")
}

/// Produces the natural-language insight text for the interpretation panel.
/// Skips the LLM entirely for trivial result sets (§4.9).
pub async fn interpret(
    llm: &dyn LlmClient,
    query: &str,
    columns: &[ColumnInfo],
    rows: &[Row],
    total_count: Option<TotalCount>,
) -> Result<String> {
    if is_trivial(columns, rows) {
        return Ok(trivial_summary(columns, rows, total_count));
    }

    let prompt = build_prompt(query, columns, rows, total_count);
    match llm.complete(&[Message::user(prompt)]).await {
        Ok(text) => Ok(text),
        Err(e) => Err(crate::error::AppError::interpret(format!(
            "insight generation failed: {e}"
        ))),
    }
}

fn build_prompt(query: &str, columns: &[ColumnInfo], rows: &[Row], total_count: Option<TotalCount>) -> String {
    use crate::constants::INTERPRETER_MAX_ROWS;

    let header = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(" | ");
    let body = rows
        .iter()
        .take(INTERPRETER_MAX_ROWS)
        .map(|row| row.iter().map(|v| v.to_display_string()).collect::<Vec<_>>().join(" | "))
        .collect::<Vec<_>>()
        .join("\n");

    let count_note = match total_count {
        Some(TotalCount::Exact(n)) => format!("Total matching rows: {n}."),
        Some(TotalCount::Unknown) => "Total matching rows exceeds the display cap.".to_string(),
        None => String::new(),
    };

    format!(
        "Summarize these query results in plain language, at most 200 words and \
         up to 5 bullet points, for the question: \"{query}\"\n\n\
         {header}\n{body}\n\n{count_note}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo::new(name, data_type)
    }

    #[test]
    fn temporal_plus_numeric_yields_line_chart() {
        let columns = vec![col("created_at", "text"), col("revenue", "real")];
        let rows = vec![
            vec![Value::String("2024-01-01".into()), Value::Float(100.0)],
            vec![Value::String("2024-01-02".into()), Value::Float(150.0)],
        ];
        let viz = recommend_visualization(&columns, &rows).unwrap();
        assert_eq!(viz.viz_type, VizType::Line);
    }

    #[test]
    fn low_cardinality_grouping_yields_pie() {
        let columns = vec![col("category", "text"), col("total", "integer")];
        let rows = vec![
            vec![Value::String("a".into()), Value::Int(1)],
            vec![Value::String("b".into()), Value::Int(2)],
            vec![Value::String("a".into()), Value::Int(3)],
        ];
        let viz = recommend_visualization(&columns, &rows).unwrap();
        assert_eq!(viz.viz_type, VizType::Pie);
    }

    #[test]
    fn two_numeric_columns_yield_scatter() {
        let columns = vec![col("height", "real"), col("weight", "real")];
        let rows = vec![vec![Value::Float(1.7), Value::Float(70.0)]];
        let viz = recommend_visualization(&columns, &rows).unwrap();
        assert_eq!(viz.viz_type, VizType::Scatter);
    }

    #[test]
    fn empty_rows_yield_no_visualization() {
        let columns = vec![col("a", "text"), col("b", "integer")];
        assert!(recommend_visualization(&columns, &[]).is_none());
    }

    #[tokio::test]
    async fn empty_result_skips_llm_and_returns_template() {
        let llm = MockLlmClient::new();
        let text = interpret(&llm, "how many users", &[], &[], None).await.unwrap();
        assert_eq!(text, "No rows matched this query.");
    }

    #[tokio::test]
    async fn single_scalar_skips_llm_and_formats_count() {
        let llm = MockLlmClient::new();
        let columns = vec![col("count", "integer")];
        let rows = vec![vec![Value::Int(42)]];
        let text = interpret(&llm, "how many users", &columns, &rows, Some(TotalCount::Exact(42)))
            .await
            .unwrap();
        assert_eq!(text, "Found 42 item(s).");
    }

    #[tokio::test]
    async fn multi_row_result_calls_llm() {
        let llm = MockLlmClient::new().with_response("summarize", "Users are mostly active.");
        let columns = vec![col("id", "integer"), col("name", "text")];
        let rows = vec![
            vec![Value::Int(1), Value::String("Alice".into())],
            vec![Value::Int(2), Value::String("Bob".into())],
        ];
        let text = interpret(&llm, "list users", &columns, &rows, Some(TotalCount::Exact(2)))
            .await
            .unwrap();
        assert_eq!(text, "Users are mostly active.");
    }

    #[tokio::test]
    async fn single_column_listing_skips_llm_and_formats_count() {
        let llm = MockLlmClient::new();
        let columns = vec![col("name", "text")];
        let rows = vec![
            vec![Value::String("web-01".into())],
            vec![Value::String("web-02".into())],
            vec![Value::String("web-03".into())],
        ];
        let text = interpret(&llm, "list all server names", &columns, &rows, Some(TotalCount::Exact(3)))
            .await
            .unwrap();
        assert_eq!(text, "Found 3 items.");
    }

    #[tokio::test]
    async fn single_temporal_column_listing_still_calls_llm() {
        let llm = MockLlmClient::new().with_response("summarize", "Orders span three days.");
        let columns = vec![col("created_at", "text")];
        let rows = vec![
            vec![Value::String("2024-01-01".into())],
            vec![Value::String("2024-01-02".into())],
        ];
        let text = interpret(&llm, "list order dates", &columns, &rows, Some(TotalCount::Exact(2)))
            .await
            .unwrap();
        assert_eq!(text, "Orders span three days.");
    }
}
