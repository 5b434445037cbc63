//! MCP service implementation using rmcp.
//!
//! Exposes the four gateway tools and one resource per table. Every tool
//! returns a structured result with a `success` flag; only malformed tool
//! calls and resource failures become protocol errors.

use crate::tools::query::{
    NaturalLanguageQueryInput, NaturalLanguageQueryOutput, QueryDatabaseInput,
    QueryDatabaseOutput, QueryToolHandler,
};
use crate::tools::schema::{
    DescribeTableInput, DescribeTableOutput, ListTablesOutput, SchemaToolHandler, table_uri,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam,
        ProtocolVersion, RawResource, ReadResourceRequestParam, ReadResourceResult,
        ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use tracing::warn;
use std::sync::Arc;

const JSON_MIME: &str = "application/json";

#[derive(Clone)]
pub struct GatewayService {
    query_handler: Arc<QueryToolHandler>,
    schema_handler: Arc<SchemaToolHandler>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(query_handler: Arc<QueryToolHandler>, schema_handler: Arc<SchemaToolHandler>) -> Self {
        Self {
            query_handler,
            schema_handler,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Execute a read-only SQL query against the PostgreSQL database.\nOnly a single SELECT or WITH statement is accepted; anything that could modify data is rejected before reaching the database.\nReturns success, row_count and data (rows as column-to-value objects)."
    )]
    async fn query_database(
        &self,
        Parameters(input): Parameters<QueryDatabaseInput>,
    ) -> Json<QueryDatabaseOutput> {
        Json(self.query_handler.query_database(input).await)
    }

    #[tool(
        description = "Answer a question in plain language by generating a read-only SQL query, validating it and running it.\nReturns the question, the generated sql, an explanation, row_count and data."
    )]
    async fn natural_language_query(
        &self,
        Parameters(input): Parameters<NaturalLanguageQueryInput>,
    ) -> Json<NaturalLanguageQueryOutput> {
        Json(self.query_handler.natural_language_query(input).await)
    }

    #[tool(description = "List all tables in the configured schema with their column counts.")]
    async fn list_tables(&self) -> Json<ListTablesOutput> {
        Json(self.schema_handler.list_tables().await)
    }

    #[tool(
        description = "Describe the columns of a table: name, data type, nullability, default and maximum character length, in ordinal order."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Json<DescribeTableOutput> {
        Json(self.schema_handler.describe_table(input).await)
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "pg-gateway-mcp".to_owned(),
                title: Some("PostgreSQL Read-Only Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only access to a PostgreSQL database.\n\
                \n\
                ## Workflow\n\
                1. Call `list_tables` to see what is available\n\
                2. Call `describe_table` for the columns of a table\n\
                3. Use `query_database` with a SELECT statement, or `natural_language_query` with a question\n\
                \n\
                ## Rules\n\
                - One statement per call; a single trailing semicolon is allowed\n\
                - Only SELECT and WITH queries run; writes, DDL and side-effecting functions are rejected\n\
                - Results are capped; `truncated: true` means more rows exist, add a LIMIT or filter\n\
                - Failures come back as `success: false` with an `error` message\n\
                \n\
                ## Resources\n\
                Every table is also readable as `postgresql://table/{name}`, returning its columns as JSON"
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let tables = self.schema_handler.resource_tables().await.map_err(|e| {
            warn!(error = %e, "list_resources failed");
            McpError::from(e)
        })?;
        let resources = tables
            .into_iter()
            .map(|table| {
                let mut resource = RawResource::new(table_uri(&table), format!("Table: {}", table));
                resource.description = Some(format!("PostgreSQL table: {}", table));
                resource.mime_type = Some(JSON_MIME.to_string());
                resource.no_annotation()
            })
            .collect();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self
            .schema_handler
            .read_table_resource(&request.uri)
            .await
            .map_err(|e| {
                warn!(uri = %request.uri, error = %e, "read_resource failed");
                McpError::from(e)
            })?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: request.uri,
                mime_type: Some(JSON_MIME.to_string()),
                text,
                meta: None,
            }],
        })
    }
}
