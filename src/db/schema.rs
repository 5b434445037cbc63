//! Schema cache.
//!
//! Reads table and column metadata from `information_schema` and keeps it as
//! an immutable [`SchemaSnapshot`]. Refreshes build a complete new snapshot
//! and swap it in under a short write lock, so readers see either the old or
//! the new snapshot and never a mix.

use crate::db::pool::ConnectionPool;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, JsonRow, QueryParam, SchemaSnapshot, TableSummary};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on catalog rows read per refresh.
const MAX_CATALOG_ROWS: usize = 100_000;

/// A snapshot younger than this (or the TTL, if shorter) answers unknown
/// table names without another catalog read.
const MISS_REFRESH_MIN_AGE: Duration = Duration::from_secs(10);

// =============================================================================
// SQL Query Constants
// =============================================================================

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#;

    pub const LIST_COLUMNS: &str = r#"
        SELECT
            c.table_name::text AS table_name,
            c.column_name::text AS column_name,
            c.data_type::text AS data_type,
            (c.is_nullable = 'YES') AS is_nullable,
            c.column_default::text AS column_default,
            c.character_maximum_length::int4 AS character_maximum_length
        FROM information_schema.columns c
        JOIN information_schema.tables t
            ON t.table_schema = c.table_schema AND t.table_name = c.table_name
        WHERE c.table_schema = $1
        AND t.table_type = 'BASE TABLE'
        ORDER BY c.table_name, c.ordinal_position
        "#;
}

struct CachedSnapshot {
    snapshot: Arc<SchemaSnapshot>,
    fetched_at: Instant,
}

pub struct SchemaCache {
    pool: Arc<ConnectionPool>,
    schema: String,
    ttl: Duration,
    current: RwLock<Option<CachedSnapshot>>,
    // Single-flight guard so concurrent misses trigger one catalog read
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SchemaCache {
    pub fn new(pool: Arc<ConnectionPool>, schema: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pool,
            schema: schema.into(),
            ttl,
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Return the cached snapshot, reloading it when stale or when
    /// `force_refresh` is set.
    ///
    /// A failed background-style reload (not forced) falls back to the
    /// previous snapshot if one exists.
    pub async fn load(&self, force_refresh: bool) -> DbResult<Arc<SchemaSnapshot>> {
        if !force_refresh {
            if let Some(snapshot) = self.fresh_snapshot() {
                return Ok(snapshot);
            }
        }

        let requested_at = Instant::now();
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some((snapshot, fetched_at)) = self.cached() {
            let refreshed_meanwhile = fetched_at > requested_at;
            let still_fresh = !force_refresh && fetched_at.elapsed() < self.ttl;
            if refreshed_meanwhile || still_fresh {
                return Ok(snapshot);
            }
        }

        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                info!(
                    schema = %self.schema,
                    tables = snapshot.table_count(),
                    forced = force_refresh,
                    "Schema snapshot refreshed"
                );
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(CachedSnapshot {
                        snapshot: Arc::clone(&snapshot),
                        fetched_at: Instant::now(),
                    });
                Ok(snapshot)
            }
            Err(e) => match self.cached() {
                Some((stale, _)) if !force_refresh => {
                    warn!(error = %e, "Schema refresh failed, serving previous snapshot");
                    Ok(stale)
                }
                _ => Err(e),
            },
        }
    }

    /// Current snapshot without triggering a load.
    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.cached().map(|(snapshot, _)| snapshot)
    }

    /// Drop the cached snapshot so the next `load` reads the catalog.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Tables with their column counts.
    pub async fn list_tables(&self) -> DbResult<Vec<TableSummary>> {
        Ok(self.load(false).await?.summaries())
    }

    /// Columns of one table, exactly as held in the snapshot.
    ///
    /// An unknown table triggers one forced refresh before reporting
    /// `TableNotFound`, so newly created tables become visible. Misses
    /// against a recent snapshot do not refresh again.
    pub async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        if table.trim().is_empty() {
            return Err(DbError::invalid_input("table_name must not be empty"));
        }

        let snapshot = self.load(false).await?;
        if let Some(columns) = snapshot.columns(table) {
            return Ok(columns.to_vec());
        }

        let min_age = self.ttl.min(MISS_REFRESH_MIN_AGE);
        let age = self.cached().map(|(_, fetched_at)| fetched_at.elapsed());
        if age.is_some_and(|age| age < min_age) {
            debug!(table = %table, "Table not in recent snapshot");
            return Err(DbError::table_not_found(table));
        }

        debug!(table = %table, "Table not in snapshot, forcing refresh");
        let snapshot = self.load(true).await?;
        snapshot
            .columns(table)
            .map(<[ColumnInfo]>::to_vec)
            .ok_or_else(|| DbError::table_not_found(table))
    }

    /// Reload the snapshot every `interval` in the background.
    ///
    /// Uses a Weak reference so the task exits when the cache is dropped or
    /// the pool has been shut down.
    pub fn spawn_refresh_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak_cache = Arc::downgrade(self);
        tokio::spawn(async move {
            Self::refresh_task(weak_cache, interval).await;
        })
    }

    async fn refresh_task(weak_cache: Weak<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(cache) = weak_cache.upgrade() else {
                debug!("Schema cache dropped, refresh task exiting");
                return;
            };
            if cache.pool.is_closed() {
                debug!("Connection pool closed, schema refresh task exiting");
                return;
            }
            if let Err(e) = cache.load(true).await {
                warn!(error = %e, "Periodic schema refresh failed");
            }
        }
    }

    fn cached(&self) -> Option<(Arc<SchemaSnapshot>, Instant)> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| (Arc::clone(&c.snapshot), c.fetched_at))
    }

    fn fresh_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.cached()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(snapshot, _)| snapshot)
    }

    async fn fetch_snapshot(&self) -> DbResult<SchemaSnapshot> {
        let params = [QueryParam::text(&self.schema)];
        let mut conn = self.pool.acquire_default().await?;

        let tables = conn
            .fetch(queries::LIST_TABLES, &params, MAX_CATALOG_ROWS)
            .await?;
        let columns = conn
            .fetch(queries::LIST_COLUMNS, &params, MAX_CATALOG_ROWS)
            .await?;
        drop(conn);

        if tables.truncated || columns.truncated {
            warn!(
                limit = MAX_CATALOG_ROWS,
                "Catalog result truncated, schema snapshot is partial"
            );
        }

        build_snapshot(&tables.rows, &columns.rows)
    }
}

// =============================================================================
// Row Parsing
// =============================================================================

/// Assemble a snapshot from catalog rows.
///
/// Every listed table appears, even one without columns. Column order follows
/// the row order, which the query sorts by ordinal position.
pub fn build_snapshot(table_rows: &[JsonRow], column_rows: &[JsonRow]) -> DbResult<SchemaSnapshot> {
    let mut tables: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();

    for row in table_rows {
        let name = required_str(row, "table_name")?;
        tables.entry(name).or_default();
    }

    for row in column_rows {
        let table = required_str(row, "table_name")?;
        let column = ColumnInfo {
            column_name: required_str(row, "column_name")?,
            data_type: required_str(row, "data_type")?,
            is_nullable: row
                .get("is_nullable")
                .and_then(JsonValue::as_bool)
                .unwrap_or(true),
            column_default: row
                .get("column_default")
                .and_then(JsonValue::as_str)
                .map(String::from),
            character_maximum_length: row
                .get("character_maximum_length")
                .and_then(JsonValue::as_i64)
                .and_then(|v| i32::try_from(v).ok()),
        };
        tables.entry(table).or_default().push(column);
    }

    Ok(SchemaSnapshot::new(tables))
}

fn required_str(row: &JsonRow, key: &str) -> DbResult<String> {
    row.get(key)
        .and_then(JsonValue::as_str)
        .map(String::from)
        .ok_or_else(|| DbError::internal(format!("catalog row missing '{}'", key)))
}
