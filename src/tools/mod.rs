//! MCP tool implementations.
//!
//! - `query`: `query_database` and `natural_language_query`
//! - `schema`: `list_tables`, `describe_table` and the table resources

pub mod query;
pub mod schema;

pub use query::{
    NaturalLanguageQueryInput, NaturalLanguageQueryOutput, QueryDatabaseInput,
    QueryDatabaseOutput, QueryToolHandler,
};
pub use schema::{
    DescribeTableInput, DescribeTableOutput, ListTablesOutput, SchemaToolHandler,
};
