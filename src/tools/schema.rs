//! Schema introspection tools and table resources.
//!
//! Both tools answer from the schema cache rather than querying the catalog
//! per call. Each table is also published as an MCP resource at
//! `postgresql://table/{name}` whose content is the table's column list.

use crate::db::SchemaCache;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, TableSummary};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Table name as returned by list_tables
    pub table_name: String,
}

/// Output from the list_tables tool.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output from the describe_table tool.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Columns in ordinal order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// URI prefix of table resources.
pub const TABLE_URI_PREFIX: &str = "postgresql://table/";

pub fn table_uri(table: &str) -> String {
    format!("{}{}", TABLE_URI_PREFIX, table)
}

/// Table name addressed by a resource URI.
pub fn table_from_uri(uri: &str) -> DbResult<&str> {
    uri.strip_prefix(TABLE_URI_PREFIX)
        .map(str::trim)
        .filter(|table| !table.is_empty())
        .ok_or_else(|| DbError::invalid_input(format!("Invalid resource URI: {}", uri)))
}

/// Content of a table resource.
#[derive(Debug, Clone, Serialize)]
pub struct TableDocument {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

/// Handler for schema introspection.
pub struct SchemaToolHandler {
    schema: Arc<SchemaCache>,
}

impl SchemaToolHandler {
    pub fn new(schema: Arc<SchemaCache>) -> Self {
        Self { schema }
    }

    pub async fn list_tables(&self) -> ListTablesOutput {
        match self.schema.list_tables().await {
            Ok(tables) => ListTablesOutput {
                success: true,
                tables: Some(tables),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "list_tables failed");
                ListTablesOutput {
                    success: false,
                    tables: None,
                    error: Some(e.caller_message()),
                }
            }
        }
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DescribeTableOutput {
        let table = input.table_name.trim();
        match self.schema.describe_table(table).await {
            Ok(columns) => DescribeTableOutput {
                success: true,
                table: Some(table.to_string()),
                columns: Some(columns),
                error: None,
            },
            Err(e) => {
                warn!(table = %table, error = %e, "describe_table failed");
                DescribeTableOutput {
                    success: false,
                    error: Some(e.caller_message()),
                    ..Default::default()
                }
            }
        }
    }

    /// Names of every table published as a resource.
    pub async fn resource_tables(&self) -> DbResult<Vec<String>> {
        let tables = self.schema.list_tables().await?;
        Ok(tables.into_iter().map(|t| t.table_name).collect())
    }

    /// Pretty-printed JSON for the table a resource URI names.
    pub async fn read_table_resource(&self, uri: &str) -> DbResult<String> {
        let table = table_from_uri(uri)?;
        let columns = self.schema.describe_table(table).await?;
        let document = TableDocument {
            table: table.to_string(),
            columns,
        };
        serde_json::to_string_pretty(&document)
            .map_err(|e| DbError::internal(format!("Failed to encode table resource: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_input_deserialization() {
        let input: DescribeTableInput =
            serde_json::from_value(json!({"table_name": "users"})).unwrap();
        assert_eq!(input.table_name, "users");
    }

    #[test]
    fn test_table_not_found_mentions_list_tables() {
        let text = DbError::table_not_found("ghosts").caller_message();
        assert!(text.contains("ghosts"));
        assert!(text.contains("list_tables"));
    }

    #[test]
    fn test_table_uri_round_trip() {
        assert_eq!(table_uri("orders"), "postgresql://table/orders");
        assert_eq!(table_from_uri("postgresql://table/orders").unwrap(), "orders");
    }

    #[test]
    fn test_foreign_uri_rejected() {
        for uri in ["file:///etc/passwd", "postgresql://table/", "postgresql://view/x"] {
            let err = table_from_uri(uri).unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }), "{}", uri);
        }
    }

    #[test]
    fn test_describe_output_shape() {
        let out = DescribeTableOutput {
            success: true,
            table: Some("users".to_string()),
            columns: Some(vec![ColumnInfo::new("id", "integer", false)]),
            error: None,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["table"], "users");
        assert_eq!(json["columns"][0]["column_name"], "id");
        assert_eq!(json["columns"][0]["is_nullable"], false);
        assert!(json.get("error").is_none());
    }
}
