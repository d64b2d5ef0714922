//! Canonical schema model (C1).
//!
//! A process-wide, immutable-after-load value describing tables, columns,
//! relationships, and curated suggested queries. Loaded once at bootstrap
//! from a JSON file (§6.1) and shared read-only (`Arc<Schema>`) by every
//! pipeline stage.

mod fk_graph;

pub use fk_graph::FkGraph;

use crate::error::{AppError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source the canonical schema was distilled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Database,
    Excel,
}

/// SQL dialect the live database speaks; drives generator prompt rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// A foreign key declared on a column: `{from_column, referenced_table, referenced_column}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// A single column within a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    /// Up to ~10 example values, included verbatim in LLM prompts.
    #[serde(default)]
    pub sample_values: Option<Vec<String>>,
}

/// A single table: its description, columns (declaration order preserved),
/// and outbound relationships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: IndexMap<String, ColumnDef>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl TableDef {
    /// Columns in declaration order.
    pub fn columns_ordered(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.values()
    }
}

/// Raw on-disk representation (§6.1), deserialized then validated into [`Schema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSchema {
    schema_id: String,
    source_type: SourceType,
    database_type: DatabaseType,
    tables: IndexMap<String, TableDef>,
    suggested_queries: Vec<String>,
}

/// The canonical schema: process-wide, immutable after [`Schema::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: String,
    pub source_type: SourceType,
    pub database_type: DatabaseType,
    pub tables: IndexMap<String, TableDef>,
    pub suggested_queries: Vec<String>,
    /// Derived at load time; not part of the on-disk representation.
    #[serde(skip)]
    pub fk_graph: FkGraph,
}

impl Schema {
    /// Parses and validates a canonical schema JSON file (§4.1).
    ///
    /// Fails with `SchemaInvalid` if `suggested_queries` is empty, `schema_id`
    /// is empty, or a relationship references an unknown table.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::schema_invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parses and validates canonical schema JSON from a string (used by tests
    /// and by [`Self::load`]).
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawSchema = serde_json::from_str(content)
            .map_err(|e| AppError::schema_invalid(format!("invalid schema JSON: {e}")))?;

        if raw.schema_id.trim().is_empty() {
            return Err(AppError::schema_invalid("schema_id must not be empty"));
        }
        if raw.suggested_queries.is_empty() {
            return Err(AppError::schema_invalid("suggested_queries must not be empty"));
        }
        for table in raw.tables.values() {
            for rel in &table.relationships {
                if !raw.tables.contains_key(&rel.referenced_table) {
                    return Err(AppError::schema_invalid(format!(
                        "table '{}' has a relationship referencing unknown table '{}'",
                        table.name, rel.referenced_table
                    )));
                }
            }
        }

        let fk_graph = FkGraph::build(&raw.tables);

        Ok(Self {
            schema_id: raw.schema_id,
            source_type: raw.source_type,
            database_type: raw.database_type,
            tables: raw.tables,
            suggested_queries: raw.suggested_queries,
            fk_graph,
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// A compact header (table names + one-line descriptions) for the intent classifier.
    pub fn compact_header(&self) -> String {
        self.tables
            .values()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `{tables: [...], suggested_queries: [...]}` for `GET /api/schema/overview` (§6.3).
    pub fn overview(&self) -> SchemaOverview {
        SchemaOverview {
            tables: self
                .tables
                .values()
                .map(|t| TableOverview {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    columns: t
                        .columns_ordered()
                        .map(|c| ColumnOverview {
                            name: c.name.clone(),
                            data_type: c.data_type.clone(),
                            description: c.description.clone(),
                            sample_values: c.sample_values.clone(),
                        })
                        .collect(),
                    relationships: t.relationships.clone(),
                })
                .collect(),
            suggested_queries: self.suggested_queries.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SchemaOverview {
    pub tables: Vec<TableOverview>,
    pub suggested_queries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TableOverview {
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnOverview>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Serialize)]
pub struct ColumnOverview {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_values: Option<Vec<String>>,
}
