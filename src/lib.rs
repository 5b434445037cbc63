//! PostgreSQL MCP Gateway Library
//!
//! Read-only access to a PostgreSQL database for AI assistants over the
//! Model Context Protocol. Every statement, whether written by the caller or
//! generated from a natural language question, passes the SQL validator
//! before it can reach a pooled connection.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod nl;
pub mod sql;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use mcp::GatewayService;
