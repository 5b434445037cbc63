//! Stdio transport for the MCP server.
//!
//! stdout carries JSON-RPC frames only; all logging goes to stderr.

use crate::db::ConnectionPool;
use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::Transport;
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Stdio transport implementation.
pub struct StdioTransport {
    service: GatewayService,
    pool: Arc<ConnectionPool>,
}

impl StdioTransport {
    /// The pool is shut down when the transport stops, whatever the reason.
    pub fn new(service: GatewayService, pool: Arc<ConnectionPool>) -> Self {
        Self { service, pool }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let running_service = match self.service.clone().serve(stdio()).await {
            Ok(running) => running,
            Err(e) => {
                self.pool.shutdown().await;
                return Err(DbError::internal(format!(
                    "Failed to start stdio transport: {}",
                    e
                )));
            }
        };

        let (shutdown_requested, outcome) = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => {
                        info!("Stdio transport completed normally");
                        (false, Ok(()))
                    }
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        (false, Err(DbError::internal(format!("Stdio transport error: {}", e))))
                    }
                }
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                (true, Ok(()))
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Shutting down connection pool");
        self.pool.shutdown().await;

        if shutdown_requested {
            // stdin reads cannot be interrupted by select!, so leave explicitly
            info!("Exiting process");
            std::process::exit(0);
        }

        outcome
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
