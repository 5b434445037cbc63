//! Configuration handling for the PostgreSQL gateway.
//!
//! Every setting can be given as a CLI flag or an environment variable. The
//! parsed [`Config`] is validated once at startup and is read-only afterwards.

use crate::db::executor::ExecutorOptions;
use crate::db::pool::PoolOptions;
use crate::nl::OpenAiOptions;
use crate::error::{DbError, DbResult};
use clap::Parser;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_PG_HOST: &str = "localhost";
pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_SSL_MODE: &str = "prefer";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_MIN_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 20;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCHEMA_TTL_SECS: u64 = 300;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_ROWS: usize = 1000;

const APPLICATION_NAME: &str = "pg-gateway-mcp";

/// A credential that never appears in logs or debug output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

/// Configuration for the gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg-gateway-mcp",
    about = "Read-only PostgreSQL MCP gateway - validated SQL and natural-language queries",
    version,
    author
)]
pub struct Config {
    /// PostgreSQL host
    #[arg(long, default_value = DEFAULT_PG_HOST, env = "POSTGRES_HOST")]
    pub host: String,

    /// PostgreSQL port
    #[arg(long, default_value_t = DEFAULT_PG_PORT, env = "POSTGRES_PORT")]
    pub port: u16,

    /// Database name
    #[arg(long, env = "POSTGRES_DB")]
    pub database: String,

    /// Database user
    #[arg(long, env = "POSTGRES_USER")]
    pub user: String,

    /// Database password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: Secret,

    /// SSL mode (disable, allow, prefer, require, verify-ca, verify-full)
    #[arg(long, default_value = DEFAULT_SSL_MODE, env = "POSTGRES_SSL_MODE")]
    pub ssl_mode: String,

    /// Schema exposed through list_tables / describe_table
    #[arg(long, default_value = DEFAULT_SCHEMA, env = "POSTGRES_SCHEMA")]
    pub schema: String,

    /// Connections opened eagerly at startup
    #[arg(long, default_value_t = DEFAULT_MIN_POOL_SIZE, env = "POSTGRES_MIN_POOL_SIZE")]
    pub min_pool_size: u32,

    /// Hard upper bound on live connections
    #[arg(long, default_value_t = DEFAULT_MAX_POOL_SIZE, env = "POSTGRES_MAX_POOL_SIZE")]
    pub max_pool_size: u32,

    /// API key for the language model; natural-language queries are disabled without it
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<Secret>,

    /// Language model identifier
    #[arg(long, default_value = DEFAULT_OPENAI_MODEL, env = "OPENAI_MODEL")]
    pub openai_model: String,

    /// Base URL of an OpenAI-compatible chat completions API
    #[arg(long, default_value = DEFAULT_OPENAI_BASE_URL, env = "OPENAI_BASE_URL")]
    pub openai_base_url: String,

    /// Statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "MCP_QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Seconds to wait for a free pooled connection
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS, env = "MCP_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "MCP_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Seconds to let in-flight queries finish on shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS, env = "MCP_SHUTDOWN_GRACE")]
    pub shutdown_grace: u64,

    /// Language model request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_LLM_TIMEOUT_SECS, env = "MCP_LLM_TIMEOUT")]
    pub llm_timeout: u64,

    /// Schema cache lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_SCHEMA_TTL_SECS, env = "MCP_SCHEMA_TTL")]
    pub schema_ttl: u64,

    /// Pool health check interval in seconds (0 disables the monitor)
    #[arg(long, default_value_t = DEFAULT_HEALTH_INTERVAL_SECS, env = "MCP_HEALTH_INTERVAL")]
    pub health_interval: u64,

    /// Maximum rows returned per query
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "MCP_MAX_ROWS")]
    pub max_rows: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            host: DEFAULT_PG_HOST.to_string(),
            port: DEFAULT_PG_PORT,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: Secret::default(),
            ssl_mode: DEFAULT_SSL_MODE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE_SECS,
            llm_timeout: DEFAULT_LLM_TIMEOUT_SECS,
            schema_ttl: DEFAULT_SCHEMA_TTL_SECS,
            health_interval: DEFAULT_HEALTH_INTERVAL_SECS,
            max_rows: DEFAULT_MAX_ROWS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Check invariants that clap cannot express.
    ///
    /// Any failure here is fatal at startup.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::config("POSTGRES_DB must not be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(DbError::config("POSTGRES_USER must not be empty"));
        }
        if self.port == 0 {
            return Err(DbError::config("POSTGRES_PORT must be greater than 0"));
        }
        if self.min_pool_size == 0 {
            return Err(DbError::config(
                "POSTGRES_MIN_POOL_SIZE must be greater than 0",
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(DbError::config(format!(
                "POSTGRES_MIN_POOL_SIZE ({}) cannot exceed POSTGRES_MAX_POOL_SIZE ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.query_timeout == 0 || self.acquire_timeout == 0 {
            return Err(DbError::config(
                "query and acquire timeouts must be greater than 0",
            ));
        }
        if self.max_rows == 0 {
            return Err(DbError::config("max rows must be greater than 0"));
        }
        Url::parse(&self.openai_base_url)
            .map_err(|e| DbError::config(format!("Invalid OPENAI_BASE_URL: {e}")))?;
        self.pg_ssl_mode()?;
        Ok(())
    }

    /// Parse the configured SSL mode.
    pub fn pg_ssl_mode(&self) -> DbResult<PgSslMode> {
        PgSslMode::from_str(&self.ssl_mode.to_ascii_lowercase())
            .map_err(|_| DbError::config(format!("Unknown POSTGRES_SSL_MODE '{}'", self.ssl_mode)))
    }

    /// Build driver connection options.
    ///
    /// Every session is opened read-only with a server-side statement timeout.
    pub fn connect_options(&self) -> DbResult<PgConnectOptions> {
        let statement_timeout_ms = self.query_timeout_duration().as_millis().to_string();
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(self.pg_ssl_mode()?)
            .application_name(APPLICATION_NAME)
            .options([
                ("default_transaction_read_only", "on".to_string()),
                ("statement_timeout", statement_timeout_ms),
            ]);
        if !self.password.is_empty() {
            options = options.password(self.password.expose());
        }
        Ok(options)
    }

    /// Connection URL with the password masked, for logging.
    pub fn redacted_dsn(&self) -> String {
        let raw = format!(
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        );
        match Url::parse(&raw) {
            Ok(mut url) => {
                if !self.password.is_empty() {
                    let _ = url.set_password(Some("***"));
                }
                url.query_pairs_mut().append_pair("sslmode", &self.ssl_mode);
                url.to_string()
            }
            Err(_) => format!("postgresql://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    /// Whether natural-language translation can be offered.
    pub fn llm_enabled(&self) -> bool {
        self.openai_api_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_size: self.min_pool_size as usize,
            max_size: self.max_pool_size as usize,
            acquire_timeout: self.acquire_timeout_duration(),
            shutdown_grace: self.shutdown_grace_duration(),
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            statement_timeout: self.query_timeout_duration(),
            acquire_timeout: self.acquire_timeout_duration(),
            row_limit: self.max_rows,
        }
    }

    /// Language model client settings, or None when no API key is set.
    pub fn openai_options(&self) -> Option<OpenAiOptions> {
        let api_key = self.openai_api_key.clone().filter(|k| !k.is_empty())?;
        Some(OpenAiOptions {
            api_key,
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.clone(),
            request_timeout: self.llm_timeout_duration(),
        })
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn shutdown_grace_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    pub fn llm_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.llm_timeout)
    }

    pub fn schema_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.schema_ttl)
    }

    /// Health monitor interval, or None when disabled.
    pub fn health_interval_duration(&self) -> Option<Duration> {
        (self.health_interval > 0).then(|| Duration::from_secs(self.health_interval))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, DEFAULT_PG_PORT);
        assert_eq!(config.min_pool_size, 5);
        assert_eq!(config.max_pool_size, 20);
    }

    #[test]
    fn test_min_pool_size_zero_rejected() {
        let config = Config {
            min_pool_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(DbError::Config { .. })));
    }

    #[test]
    fn test_min_exceeds_max_rejected() {
        let config = Config {
            min_pool_size: 10,
            max_pool_size: 2,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_min_equals_max_allowed() {
        let config = Config {
            min_pool_size: 3,
            max_pool_size: 3,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_ssl_mode_rejected() {
        let config = Config {
            ssl_mode: "sometimes".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(DbError::Config { .. })));
    }

    #[test]
    fn test_ssl_mode_case_insensitive() {
        let config = Config {
            ssl_mode: "REQUIRE".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.pg_ssl_mode(), Ok(PgSslMode::Require)));
    }

    #[test]
    fn test_secret_is_redacted() {
        let config = Config {
            password: Secret::from("hunter2"),
            ..Config::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert!(!config.redacted_dsn().contains("hunter2"));
        assert!(config.redacted_dsn().contains("sslmode=prefer"));
    }

    #[test]
    fn test_llm_enabled_requires_key() {
        assert!(!Config::default().llm_enabled());
        let config = Config {
            openai_api_key: Some(Secret::from("sk-test")),
            ..Config::default()
        };
        assert!(config.llm_enabled());
        let options = config.openai_options().unwrap();
        assert_eq!(options.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(options.request_timeout, Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS));
    }

    #[test]
    fn test_empty_key_disables_llm() {
        let config = Config {
            openai_api_key: Some(Secret::from("")),
            ..Config::default()
        };
        assert!(!config.llm_enabled());
        assert!(config.openai_options().is_none());
    }

    #[test]
    fn test_executor_options_follow_config() {
        let config = Config {
            query_timeout: 15,
            max_rows: 50,
            ..Config::default()
        };
        let options = config.executor_options();
        assert_eq!(options.statement_timeout, Duration::from_secs(15));
        assert_eq!(options.row_limit, 50);
    }

    #[test]
    fn test_health_interval_zero_disables() {
        let config = Config {
            health_interval: 0,
            ..Config::default()
        };
        assert!(config.health_interval_duration().is_none());
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "pg-gateway-mcp",
            "--database",
            "shop",
            "--user",
            "reader",
            "--max-pool-size",
            "4",
            "--min-pool-size",
            "2",
        ])
        .unwrap();
        assert_eq!(config.database, "shop");
        assert_eq!(config.pool_options().max_size, 4);
        assert!(config.validate().is_ok());
    }
}
