//! MCP server integration module.
//!
//! Binds the gateway's tool handlers to the MCP protocol via rmcp.

pub mod service;

pub use service::GatewayService;
