//! Database access layer.
//!
//! - `connection`: session traits and the PostgreSQL implementation
//! - `pool`: bounded connection pool with RAII checkout
//! - `executor`: validate, acquire, execute, release
//! - `schema`: cached catalog snapshot
//! - `types`: row to JSON decoding

pub mod connection;
pub mod executor;
pub mod pool;
pub mod schema;
pub mod types;

pub use connection::{ConnectionFactory, DbConnection, PgConnectionFactory};
pub use executor::{ExecutorOptions, QueryExecutor};
pub use pool::{
    ConnectionPool, ConnectionState, HealthReport, PoolOptions, PoolStatus, ScopedConnection,
};
pub use schema::SchemaCache;
