//! Schema-related data models.
//!
//! A [`SchemaSnapshot`] is an immutable, point-in-time view of the tables and
//! columns in the served schema. Snapshots are shared behind an `Arc` and
//! replaced wholesale on refresh, so readers never observe a partial update.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column metadata as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i32>,
}

impl ColumnInfo {
    /// Create a column with no default and no length limit.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            column_name: name.into(),
            data_type: data_type.into(),
            is_nullable,
            column_default: None,
            character_maximum_length: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.column_default = Some(default.into());
        self
    }

    pub fn with_max_length(mut self, len: i32) -> Self {
        self.character_maximum_length = Some(len);
        self
    }
}

/// Entry in the list_tables response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSummary {
    pub table_name: String,
    pub column_count: usize,
}

/// Immutable table-to-columns map for one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSnapshot {
    /// Table name to columns in ordinal order.
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
    pub loaded_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(tables: BTreeMap<String, Vec<ColumnInfo>>) -> Self {
        Self {
            tables,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn columns(&self, table: &str) -> Option<&[ColumnInfo]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Tables in name order with their column counts.
    pub fn summaries(&self) -> Vec<TableSummary> {
        self.tables
            .iter()
            .map(|(name, cols)| TableSummary {
                table_name: name.clone(),
                column_count: cols.len(),
            })
            .collect()
    }
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        let mut tables = BTreeMap::new();
        tables.insert(
            "users".to_string(),
            vec![
                ColumnInfo::new("id", "integer", false).with_default("nextval('users_id_seq'::regclass)"),
                ColumnInfo::new("email", "character varying", false).with_max_length(255),
                ColumnInfo::new("active", "boolean", true),
            ],
        );
        tables.insert(
            "orders".to_string(),
            vec![ColumnInfo::new("id", "integer", false)],
        );
        SchemaSnapshot::new(tables)
    }

    #[test]
    fn test_summaries_sorted_with_counts() {
        let summaries = snapshot().summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].table_name, "orders");
        assert_eq!(summaries[1].table_name, "users");
        assert_eq!(summaries[1].column_count, 3);
    }

    #[test]
    fn test_columns_preserve_order() {
        let snap = snapshot();
        let cols = snap.columns("users").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "active"]);
        assert_eq!(cols[1].character_maximum_length, Some(255));
    }

    #[test]
    fn test_missing_table() {
        assert!(snapshot().columns("ghosts").is_none());
        assert!(!snapshot().contains("ghosts"));
    }
}
