//! Configuration handling.
//!
//! Pool and retry settings are plain structs so that library callers can build
//! them in code; the binary fills them from CLI arguments and environment
//! variables through [`Config`].

use crate::db::backoff::{Backoff, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS};
use clap::Parser;
use std::time::Duration;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
/// Zero means the wait queue is unbounded.
pub const DEFAULT_MAX_QUEUED_WAITERS: usize = 0;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 30;

// Retry configuration defaults
pub const DEFAULT_QUERY_RETRIES: u32 = 2;
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 1;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 3306;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upper bound on connections checked out at once
    pub max_connections: u32,
    /// Connections opened eagerly by `Pool::connect`
    pub min_connections: u32,
    /// Callers allowed to wait for a slot before acquire fails fast (0 = unbounded)
    pub max_queued_waiters: usize,
    /// Bound on waiting for a slot and on opening a physical connection
    pub connect_timeout: Duration,
    /// Ping idle connections at this interval; None disables keepalive
    pub keepalive_interval: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_queued_waiters: DEFAULT_MAX_QUEUED_WAITERS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keepalive_interval: Some(Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS)),
        }
    }
}

impl PoolOptions {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_max_queued_waiters(mut self, max_queued_waiters: usize) -> Self {
        self.max_queued_waiters = max_queued_waiters;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_keepalive_interval(mut self, keepalive_interval: Option<Duration>) -> Self {
        self.keepalive_interval = keepalive_interval;
        self
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.keepalive_interval.is_some_and(|i| i.is_zero()) {
            return Err("keepalive_interval must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

/// Retry budget and backoff shared by the executor and transaction coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt of `query`/`execute`
    pub query_retries: u32,
    /// Retries after the first attempt of a whole transaction
    pub transaction_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            query_retries: DEFAULT_QUERY_RETRIES,
            transaction_retries: DEFAULT_TRANSACTION_RETRIES,
            backoff: Backoff::default(),
        }
    }
}

impl RetryOptions {
    pub fn with_query_retries(mut self, retries: u32) -> Self {
        self.query_retries = retries;
        self
    }

    pub fn with_transaction_retries(mut self, retries: u32) -> Self {
        self.transaction_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts allowed for a single statement.
    pub fn query_attempts(&self) -> u32 {
        self.query_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backoff.base().is_zero() {
            return Err("backoff base must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for the `resilient-db` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "resilient-db",
    about = "Run SQL through a retrying, pool-backed executor",
    version,
    author
)]
pub struct Config {
    /// Full connection URL (mysql://, postgres://, sqlite:).
    /// When absent, a MySQL URL is assembled from the DB_* settings.
    #[arg(long, value_name = "URL", env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Database host
    #[arg(long, default_value = DEFAULT_DB_HOST, env = "DB_HOST")]
    pub db_host: String,

    /// Database port
    #[arg(long, default_value_t = DEFAULT_DB_PORT, env = "DB_PORT")]
    pub db_port: u16,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database (schema) name
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Maximum connections checked out at once
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "DB_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Connections opened at startup
    #[arg(long, default_value_t = DEFAULT_MIN_CONNECTIONS, env = "DB_MIN_CONNECTIONS")]
    pub min_connections: u32,

    /// Callers allowed to queue for a connection (0 = unbounded)
    #[arg(long, default_value_t = DEFAULT_MAX_QUEUED_WAITERS, env = "DB_QUEUE_LIMIT")]
    pub max_queued_waiters: usize,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "DB_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Keepalive ping interval for idle connections in seconds (0 = disabled)
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_INTERVAL_SECS, env = "DB_KEEPALIVE_INTERVAL")]
    pub keepalive_interval: u64,

    /// Retries for a single statement after the first attempt
    #[arg(long, default_value_t = DEFAULT_QUERY_RETRIES, env = "DB_QUERY_RETRIES")]
    pub query_retries: u32,

    /// Retries for a whole transaction after the first attempt
    #[arg(long, default_value_t = DEFAULT_TRANSACTION_RETRIES, env = "DB_TRANSACTION_RETRIES")]
    pub transaction_retries: u32,

    /// Backoff before the second attempt, in milliseconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF_BASE_MS, env = "DB_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    /// Upper bound on any backoff delay, in milliseconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF_CAP_MS, env = "DB_BACKOFF_CAP_MS")]
    pub backoff_cap_ms: u64,

    /// Read statements to run; rows are printed as JSON
    #[arg(long = "query", value_name = "SQL")]
    pub queries: Vec<String>,

    /// Write statements to run; write metadata is printed as JSON
    #[arg(long = "execute", value_name = "SQL")]
    pub executes: Vec<String>,

    /// Run all --execute statements inside a single transaction
    #[arg(long)]
    pub atomic: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The connection URL, either given directly or assembled from DB_* parts.
    pub fn connection_string(&self) -> Result<String, String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        let mut url = Url::parse(&format!("mysql://{}", self.db_host))
            .map_err(|e| format!("Invalid DB_HOST '{}': {e}", self.db_host))?;
        url.set_port(Some(self.db_port))
            .map_err(|_| "DB_HOST cannot carry a port".to_string())?;
        if let Some(user) = &self.db_user {
            url.set_username(user)
                .map_err(|_| "DB_HOST cannot carry credentials".to_string())?;
        }
        if let Some(password) = &self.db_password {
            url.set_password(Some(password))
                .map_err(|_| "DB_HOST cannot carry credentials".to_string())?;
        }
        if let Some(name) = &self.db_name {
            url.set_path(&format!("/{}", name.trim_start_matches('/')));
        }
        Ok(url.to_string())
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            max_queued_waiters: self.max_queued_waiters,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            keepalive_interval: (self.keepalive_interval > 0)
                .then(|| Duration::from_secs(self.keepalive_interval)),
        }
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            query_retries: self.query_retries,
            transaction_retries: self.transaction_retries,
            backoff: Backoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_cap_ms),
            ),
        }
    }

    /// Validate every derived option.
    pub fn validate(&self) -> Result<(), String> {
        self.pool_options().validate()?;
        self.retry_options().validate()
    }
}
