//! Connection configuration for the Redis backend

use std::time::Duration;

use redis::{ConnectionInfo, IntoConnectionInfo};
use rill_core::{
    DEFAULT_MIN_IDLE_CONNS, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT, Operation, StreamError,
    StreamResult,
};
use serde::{Deserialize, Serialize};

/// Where and how to reach the Redis server
///
/// Zero values for the pool sizes and the timeout fall back to the
/// defaults, so a partially filled config file still yields a usable setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` of the server
    pub address: String,
    /// Password for `AUTH`; empty means none
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    /// Connect over TLS (`rediss://`)
    pub tls: bool,
    /// Upper bound on dedicated connections for blocking reads
    pub pool_size: usize,
    /// Dedicated connections opened up front
    pub min_idle_conns: usize,
    /// Dial and command timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: None,
            db: 0,
            tls: false,
            pool_size: DEFAULT_POOL_SIZE,
            min_idle_conns: DEFAULT_MIN_IDLE_CONNS,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl RedisConfig {
    /// Configuration for a server address with every other value defaulted
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database index
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Enable or disable TLS
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the blocking-connection pool bounds
    pub fn with_pool(mut self, pool_size: usize, min_idle_conns: usize) -> Self {
        self.pool_size = pool_size;
        self.min_idle_conns = min_idle_conns;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Effective pool size
    pub fn pool_size(&self) -> usize {
        if self.pool_size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            self.pool_size
        }
    }

    /// Effective number of pre-opened connections, never above the pool size
    pub fn min_idle_conns(&self) -> usize {
        let wanted = if self.min_idle_conns == 0 {
            DEFAULT_MIN_IDLE_CONNS
        } else {
            self.min_idle_conns
        };
        wanted.min(self.pool_size())
    }

    /// Effective timeout
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// Connection URL without credentials
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{scheme}://{}/{}", self.address, self.db)
    }

    /// Build the client connection info
    pub fn connection_info(&self) -> StreamResult<ConnectionInfo> {
        let mut info = self
            .url()
            .into_connection_info()
            .map_err(|e| StreamError::backend(Operation::Ping, format!("invalid address: {e}")))?;
        info.redis.password = self.password.clone().filter(|p| !p.is_empty());
        Ok(info)
    }
}
