//! Query-related data models.
//!
//! This module defines bound parameters, raw fetched rows and the final
//! result returned to tool callers.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default cap on rows returned by a single query.
pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Maximum allowed row cap.
pub const MAX_ROW_LIMIT: usize = 10_000;

/// A parameter value bound to internal catalog queries.
///
/// Caller-supplied SQL is never parameterized; only the gateway's own
/// metadata queries bind values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl QueryParam {
    pub fn text(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

/// A single row keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Rows as read off a connection, before timing is attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRows {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    /// More rows were available than the requested cap.
    pub truncated: bool,
}

impl FetchedRows {
    /// Build from rows that may exceed `row_limit` by one.
    ///
    /// Callers fetch `row_limit + 1` rows so that truncation can be detected
    /// without reading the full result set.
    pub fn from_capped(columns: Vec<String>, mut rows: Vec<JsonRow>, row_limit: usize) -> Self {
        let truncated = rows.len() > row_limit;
        rows.truncate(row_limit);
        Self {
            columns,
            rows,
            truncated,
        }
    }
}

/// Result of a successful read query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub truncated: bool,
}

impl QueryResult {
    pub fn from_fetched(fetched: FetchedRows, execution_time_ms: u64) -> Self {
        Self {
            row_count: fetched.rows.len(),
            columns: fetched.columns,
            rows: fetched.rows,
            execution_time_ms,
            truncated: fetched.truncated,
        }
    }

    /// Get a column value from the first row.
    pub fn first_value(&self, column: &str) -> Option<&JsonValue> {
        self.rows.first().and_then(|row| row.get(column))
    }
}
