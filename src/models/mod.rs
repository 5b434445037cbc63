//! Data models for the PostgreSQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{
    DEFAULT_ROW_LIMIT, FetchedRows, JsonRow, MAX_ROW_LIMIT, QueryParam, QueryResult,
};
pub use schema::{ColumnInfo, SchemaSnapshot, TableSummary};
