//! Query execution engine.
//!
//! Every statement goes through the same sequence:
//! 1. Validate against the read-only policy (rejections never touch the pool)
//! 2. Acquire a pooled connection
//! 3. Execute the normalized text under a timeout, streaming at most
//!    `row_limit + 1` rows
//! 4. Release the connection (the guard does this on every exit path)
//!
//! A connection-level failure evicts the session and the statement is retried
//! once on a fresh one. Pool exhaustion and database errors are not retried.

use crate::db::pool::ConnectionPool;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryResult};
use crate::sql::SqlValidator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Client-side slack on top of the server's statement_timeout so the server
/// normally cancels first and the session stays usable.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub statement_timeout: Duration,
    pub acquire_timeout: Duration,
    pub row_limit: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

/// Query executor that handles database query execution.
#[derive(Debug)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
    validator: Arc<SqlValidator>,
    options: ExecutorOptions,
}

impl QueryExecutor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        validator: Arc<SqlValidator>,
        mut options: ExecutorOptions,
    ) -> Self {
        // Clamp to [1, MAX_ROW_LIMIT] so a zero limit never reports everything as truncated
        options.row_limit = options.row_limit.clamp(1, MAX_ROW_LIMIT);
        Self {
            pool,
            validator,
            options,
        }
    }

    pub fn row_limit(&self) -> usize {
        self.options.row_limit
    }

    /// Validate and execute a caller-supplied statement.
    pub async fn run(&self, query: &str) -> DbResult<QueryResult> {
        let verdict = self.validator.validate(query);
        if !verdict.allowed {
            warn!(reason = ?verdict.reason, "Query rejected by validator");
        }
        let sql = verdict.into_result()?;

        match self.execute_once(&sql).await {
            Err(e) if e.is_connection_fault() => {
                warn!(error = %e, "Connection failed during query, retrying on a fresh connection");
                self.execute_once(&sql).await
            }
            other => other,
        }
    }

    async fn execute_once(&self, sql: &str) -> DbResult<QueryResult> {
        let mut conn = self.pool.acquire(self.options.acquire_timeout).await?;
        let connection_id = conn.id();
        let query_timeout = self.options.statement_timeout + CLIENT_TIMEOUT_MARGIN;

        debug!(
            connection_id,
            sql = %sql,
            limit = self.options.row_limit,
            timeout_secs = self.options.statement_timeout.as_secs(),
            "Executing query"
        );

        let start = Instant::now();
        let fetched = match timeout(query_timeout, conn.fetch(sql, &[], self.options.row_limit))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                "query execution",
                self.options.statement_timeout.as_secs(),
            )),
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        self.pool.release(conn);

        let fetched = fetched?;
        if fetched.truncated {
            warn!(
                limit = self.options.row_limit,
                "Query result truncated"
            );
        }
        let result = QueryResult::from_fetched(fetched, execution_time_ms);
        info!(
            connection_id,
            row_count = result.row_count,
            execution_time_ms,
            "Query executed"
        );
        Ok(result)
    }
}
