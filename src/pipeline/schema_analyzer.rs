//! Schema analyzer (C10) — "the hard part" (§4.3).
//!
//! Two phases: semantic retrieval against the embedding store narrows the
//! full schema to the handful of tables that look relevant, then FK expansion
//! pulls in directly connected neighbors so joins stay resolvable. The result
//! is rendered into a token-budgeted schema context string for the generator.

use indexmap::IndexSet;
use tracing::warn;

use crate::constants::{estimate_tokens, SCHEMA_CONTEXT_SAMPLE_ROWS};
use crate::embeddings::EmbeddingClient;
use crate::embeddings::EmbeddingStore;
use crate::error::{AppError, Result};
use crate::schema::Schema;

pub struct AnalyzerConfig {
    pub max_relevant_tables: usize,
    pub max_expanded_tables: usize,
    pub similarity_threshold: f32,
    pub max_schema_tokens: usize,
}

pub struct AnalysisResult {
    pub relevant_tables: Vec<String>,
    pub schema_context: String,
    pub token_estimate: usize,
}

/// Runs both phases and renders the final schema context string.
///
/// Retries the embedding call once on failure; a second failure surfaces as
/// [`AppError::schema_embed`]. An empty namespace surfaces as
/// [`AppError::schema_empty`] without ever calling the embedding client.
pub async fn analyze(
    schema: &Schema,
    embeddings: &EmbeddingStore,
    embedding_client: &dyn EmbeddingClient,
    namespace: &str,
    query: &str,
    config: &AnalyzerConfig,
) -> Result<AnalysisResult> {
    if embeddings.is_empty(namespace).await? {
        return Err(AppError::schema_empty(format!(
            "no table embeddings stored for namespace '{namespace}'"
        )));
    }

    let query_vector = match embedding_client.embed(query).await {
        Ok(v) => v,
        Err(first_err) => {
            warn!("embedding call failed, retrying once: {first_err}");
            embedding_client.embed(query).await.map_err(|e| {
                AppError::schema_embed(format!("embedding call failed twice: {e}"))
            })?
        }
    };

    let ranked = embeddings
        .top_k(namespace, &query_vector, config.max_relevant_tables)
        .await?;

    let mut semantic_tables: Vec<String> = ranked
        .iter()
        .filter(|(_, score)| *score >= config.similarity_threshold)
        .map(|(name, _)| name.clone())
        .collect();

    if semantic_tables.is_empty() {
        if let Some((name, _)) = ranked.first() {
            semantic_tables.push(name.clone());
        }
    }

    let expanded = expand_via_fk_graph(schema, &semantic_tables, config.max_expanded_tables);

    let schema_context = render_context(
        schema,
        &semantic_tables,
        &expanded,
        config.max_schema_tokens,
    );
    let token_estimate = estimate_tokens(&schema_context);

    let mut relevant_tables = semantic_tables;
    for t in &expanded {
        if !relevant_tables.contains(t) {
            relevant_tables.push(t.clone());
        }
    }

    Ok(AnalysisResult {
        relevant_tables,
        schema_context,
        token_estimate,
    })
}

/// Expands `semantic_tables` one outbound hop then one inbound hop through
/// the foreign-key graph, capped at `max_expanded_tables` total tables.
/// Insertion-ordered so the result (and everything rendered from it) is
/// deterministic for a fixed schema and semantic ranking (§4.3).
fn expand_via_fk_graph(schema: &Schema, semantic_tables: &[String], max_expanded_tables: usize) -> Vec<String> {
    let mut selected: IndexSet<String> = semantic_tables.iter().cloned().collect();

    for table in semantic_tables {
        if selected.len() >= max_expanded_tables {
            break;
        }
        for neighbor in schema.fk_graph.outbound(table) {
            if selected.len() >= max_expanded_tables {
                break;
            }
            selected.insert(neighbor);
        }
    }

    for table in semantic_tables {
        if selected.len() >= max_expanded_tables {
            break;
        }
        for neighbor in schema.fk_graph.inbound(table) {
            if selected.len() >= max_expanded_tables {
                break;
            }
            selected.insert(neighbor);
        }
    }

    selected
        .into_iter()
        .filter(|t| !semantic_tables.contains(t))
        .collect()
}

/// Renders the selected tables into a schema-context string, including
/// sample values only for the semantically-matched tables (not FK-expanded
/// ones), truncating once the token budget is reached and logging how many
/// tables were skipped.
fn render_context(
    schema: &Schema,
    semantic_tables: &[String],
    expanded_tables: &[String],
    max_tokens: usize,
) -> String {
    let mut context = String::new();
    let mut skipped = 0usize;

    for name in semantic_tables.iter().chain(expanded_tables.iter()) {
        let Some(table) = schema.table(name) else { continue };
        let include_samples = semantic_tables.contains(name);
        let block = render_table(table, include_samples);

        if !context.is_empty() && estimate_tokens(&context) + estimate_tokens(&block) > max_tokens {
            skipped += 1;
            continue;
        }
        context.push_str(&block);
        context.push('\n');
    }

    if skipped > 0 {
        warn!("schema context truncated at {max_tokens} tokens, skipped {skipped} table(s)");
    }

    context
}

fn render_table(table: &crate::schema::TableDef, include_samples: bool) -> String {
    let mut out = format!("### {} — {}\n", table.name, table.description);
    for col in table.columns_ordered() {
        out.push_str(&format!("- {} ({})", col.name, col.data_type));
        if col.is_primary_key {
            out.push_str(" [PK]");
        }
        if col.is_foreign_key {
            out.push_str(" [FK]");
        }
        if include_samples {
            if let Some(samples) = &col.sample_values {
                let shown: Vec<_> = samples.iter().take(SCHEMA_CONTEXT_SAMPLE_ROWS).cloned().collect();
                if !shown.is_empty() {
                    out.push_str(&format!(" e.g. {}", shown.join(", ")));
                }
            }
        }
        out.push('\n');
    }
    for rel in &table.relationships {
        out.push_str(&format!(
            "- FK: {} -> {}.{}\n",
            rel.from_column, rel.referenced_table, rel.referenced_column
        ));
    }
    out
}
