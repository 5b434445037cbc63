//! PostgreSQL MCP Gateway - Main entry point.
//!
//! Serves read-only PostgreSQL tools to AI assistants over stdio.

use pg_gateway_mcp::config::Config;
use pg_gateway_mcp::db::{
    ConnectionPool, PgConnectionFactory, QueryExecutor, SchemaCache,
};
use pg_gateway_mcp::mcp::GatewayService;
use pg_gateway_mcp::nl::{OpenAiGenerator, SqlGenerator, Translator};
use pg_gateway_mcp::sql::SqlValidator;
use pg_gateway_mcp::tools::{QueryToolHandler, SchemaToolHandler};
use pg_gateway_mcp::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// stdout carries the MCP protocol, so every layer writes to stderr.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    info!(
        dsn = %config.redacted_dsn(),
        min_pool_size = config.min_pool_size,
        max_pool_size = config.max_pool_size,
        "Starting PostgreSQL MCP Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let factory = Arc::new(PgConnectionFactory::new(
        config.connect_options()?,
        config.connect_timeout_duration(),
    ));
    let pool = ConnectionPool::new(factory, config.pool_options())?;

    if let Err(e) = pool.initialize().await {
        error!(error = %e, "Failed to initialize connection pool");
        pool.shutdown().await;
        std::process::exit(1);
    }
    if !pool.health_check().await {
        error!("Database health check failed");
        pool.shutdown().await;
        std::process::exit(1);
    }

    if let Some(interval) = config.health_interval_duration() {
        pool.spawn_health_monitor(interval);
    }

    let schema = Arc::new(SchemaCache::new(
        pool.clone(),
        config.schema.clone(),
        config.schema_ttl_duration(),
    ));
    if let Err(e) = schema.load(false).await {
        // Not fatal: the first tool call retries the load
        warn!(error = %e, "Initial schema load failed");
    }
    schema.spawn_refresh_task(config.schema_ttl_duration());

    let validator = Arc::new(SqlValidator::default());
    let executor = Arc::new(QueryExecutor::new(
        pool.clone(),
        validator.clone(),
        config.executor_options(),
    ));

    let generator: Option<Arc<dyn SqlGenerator>> = match config.openai_options() {
        Some(options) => match OpenAiGenerator::new(options) {
            Ok(generator) => Some(Arc::new(generator)),
            Err(e) => {
                warn!(error = %e, "Language model client unavailable");
                None
            }
        },
        None => None,
    };
    let translator = Arc::new(Translator::new(generator, validator));

    let service = GatewayService::new(
        Arc::new(QueryToolHandler::new(executor, translator, schema.clone())),
        Arc::new(SchemaToolHandler::new(schema)),
    );

    let transport = StdioTransport::new(service, pool);
    info!(transport = transport.name(), "Serving MCP tools");
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
