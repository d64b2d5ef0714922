//! Foreign-key graph derived from the canonical schema (C2).
//!
//! Built once alongside [`super::Schema`] from each table's `relationships`.
//! Used by the schema analyzer (C10) to expand a semantically-relevant table
//! set to its directly connected neighbors before the token budget is applied.

use super::TableDef;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Outbound and inbound foreign-key adjacency, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct FkGraph {
    /// table -> set of tables it declares a foreign key toward.
    outbound: IndexMap<String, HashSet<String>>,
    /// table -> set of tables that declare a foreign key toward it.
    inbound: IndexMap<String, HashSet<String>>,
}

impl FkGraph {
    /// Builds the graph from every table's declared relationships.
    pub fn build(tables: &IndexMap<String, TableDef>) -> Self {
        let mut outbound: IndexMap<String, HashSet<String>> = IndexMap::new();
        let mut inbound: IndexMap<String, HashSet<String>> = IndexMap::new();

        for name in tables.keys() {
            outbound.entry(name.clone()).or_default();
            inbound.entry(name.clone()).or_default();
        }

        for table in tables.values() {
            for rel in &table.relationships {
                outbound
                    .entry(table.name.clone())
                    .or_default()
                    .insert(rel.referenced_table.clone());
                inbound
                    .entry(rel.referenced_table.clone())
                    .or_default()
                    .insert(table.name.clone());
            }
        }

        Self { outbound, inbound }
    }

    /// Tables `table` directly references via a foreign key.
    pub fn outbound(&self, table: &str) -> HashSet<String> {
        self.outbound.get(table).cloned().unwrap_or_default()
    }

    /// Tables that directly reference `table` via a foreign key.
    pub fn inbound(&self, table: &str) -> HashSet<String> {
        self.inbound.get(table).cloned().unwrap_or_default()
    }

    /// Union of outbound and inbound neighbors of `table`.
    pub fn neighbors(&self, table: &str) -> HashSet<String> {
        let mut n = self.outbound(table);
        n.extend(self.inbound(table));
        n
    }
}
