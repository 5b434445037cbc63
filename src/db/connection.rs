//! Database sessions.
//!
//! The pool manages sessions through the [`DbConnection`] and
//! [`ConnectionFactory`] traits so that pool behaviour can be exercised
//! without a running PostgreSQL server. [`PgConnectionFactory`] is the
//! production implementation backed by a single `sqlx::PgConnection` per
//! session.

use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{FetchedRows, QueryParam};
use async_trait::async_trait;
use futures_util::StreamExt;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::{ConnectOptions, Connection, PgConnection, Postgres};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// One live database session.
///
/// Implementations are exclusively owned by the pool and handed to exactly
/// one caller at a time, so methods take `&mut self`.
#[async_trait]
pub trait DbConnection: Send {
    /// Run a trivial read to prove the session is usable.
    async fn ping(&mut self) -> DbResult<()>;

    /// Run a read statement and return at most `row_limit` rows.
    ///
    /// The text is executed as a single prepared statement, never as a
    /// simple query.
    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        row_limit: usize,
    ) -> DbResult<FetchedRows>;

    /// Close the session, ignoring errors.
    async fn close(self: Box<Self>);
}

/// Opens new sessions on demand.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> DbResult<Box<dyn DbConnection>>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Factory producing real PostgreSQL sessions.
pub struct PgConnectionFactory {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgConnectionFactory {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }
}

impl std::fmt::Debug for PgConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnectionFactory")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> DbResult<Box<dyn DbConnection>> {
        let conn = match timeout(self.connect_timeout, self.options.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                let suggestion = connection_suggestion(&e);
                return Err(DbError::connection(
                    format!("Failed to connect: {}", e),
                    suggestion,
                ));
            }
            Err(_) => {
                return Err(DbError::timeout(
                    "connect",
                    self.connect_timeout.as_secs(),
                ));
            }
        };
        debug!("Opened PostgreSQL session");
        Ok(Box::new(PgSession { conn }))
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> &'static str {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the PostgreSQL server is running and accessible";
    }
    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify POSTGRES_USER and POSTGRES_PASSWORD";
    }
    if error_str.contains("does not exist") {
        return "Check that POSTGRES_DB names an existing database";
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check POSTGRES_SSL_MODE or the server's TLS configuration";
    }
    "Verify POSTGRES_HOST and POSTGRES_PORT"
}

struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl DbConnection for PgSession {
    async fn ping(&mut self) -> DbResult<()> {
        use sqlx::Executor;
        (&mut self.conn)
            .execute("SELECT 1")
            .await
            .map(|_| ())
            .map_err(DbError::from)
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        row_limit: usize,
    ) -> DbResult<FetchedRows> {
        // Fetch one extra row to detect truncation without reading everything
        let fetch_limit = row_limit.saturating_add(1);
        // Unnamed prepared statement: the server refuses multi-statement text
        // and caller SQL does not fill the statement cache.
        let mut query = sqlx::query(sql).persistent(false);
        for param in params {
            query = bind_param(query, param);
        }
        let results: Vec<Result<PgRow, sqlx::Error>> =
            query.fetch(&mut self.conn).take(fetch_limit).collect().await;

        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            rows.push(result.map_err(DbError::from)?);
        }

        let columns = rows
            .first()
            .map(|r| r.column_names())
            .unwrap_or_default();
        let json_rows = rows.iter().map(|r| r.to_json_map()).collect();
        Ok(FetchedRows::from_capped(columns, json_rows, row_limit))
    }

    async fn close(self: Box<Self>) {
        let PgSession { conn } = *self;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error while closing session");
        }
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_suggestion_refused() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        ));
        assert!(connection_suggestion(&err).contains("running"));
    }

    #[test]
    fn test_connection_suggestion_fallback() {
        let err = sqlx::Error::Protocol("unexpected".into());
        assert!(connection_suggestion(&err).contains("POSTGRES_HOST"));
    }
}
