//! Bounded pool of dedicated connections for blocking commands
//!
//! A blocking `XREAD`/`XREADGROUP` parks its connection on the server for
//! the whole block window, so it must not share the multiplexed connection
//! used by every other call. Connections go back to the idle list only when
//! the caller releases them after a clean reply; a connection dropped
//! mid-command (deadline, error) is discarded.

use std::time::Duration;

use parking_lot::Mutex;
use redis::Client;
use redis::aio::MultiplexedConnection;
use rill_core::{Operation, StreamError, StreamResult};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace};

/// Pool of dedicated connections, at most `size` checked out at once
pub struct ConnectionPool {
    client: Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    permits: Semaphore,
    size: usize,
    dial_timeout: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size)
            .field("idle", &self.idle.lock().len())
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool
    pub fn new(client: Client, size: usize, dial_timeout: Duration) -> Self {
        Self {
            client,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Semaphore::new(size),
            size,
            dial_timeout,
        }
    }

    /// Open up to `count` connections ahead of time
    pub async fn warm(&self, count: usize) -> StreamResult<()> {
        let count = count.min(self.size);
        for _ in 0..count {
            let conn = self.dial(Operation::Ping).await?;
            self.idle.lock().push(conn);
        }
        debug!(count, "Pre-opened blocking connections");
        Ok(())
    }

    /// Check out a connection, waiting while all `size` are in use
    pub async fn get(&self, op: Operation) -> StreamResult<PooledConnection<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StreamError::backend(op, "connection pool closed"))?;

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.dial(op).await?,
        };
        Ok(PooledConnection {
            conn,
            pool: self,
            _permit: permit,
        })
    }

    /// Connections currently parked in the idle list
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    async fn dial(&self, op: Operation) -> StreamResult<MultiplexedConnection> {
        trace!("Opening dedicated connection");
        match tokio::time::timeout(
            self.dial_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StreamError::backend(op, e.to_string())),
            Err(_) => Err(StreamError::Timeout {
                op,
                after: self.dial_timeout,
            }),
        }
    }
}

/// A checked-out connection
///
/// Dropping it without [`PooledConnection::release`] closes the connection
/// and frees the slot.
pub struct PooledConnection<'a> {
    conn: MultiplexedConnection,
    pool: &'a ConnectionPool,
    _permit: SemaphorePermit<'a>,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", self.pool)
            .finish_non_exhaustive()
    }
}

impl PooledConnection<'_> {
    /// The underlying connection
    pub fn conn(&mut self) -> &mut MultiplexedConnection {
        &mut self.conn
    }

    /// Return the connection to the idle list
    pub fn release(self) {
        self.pool.idle.lock().push(self.conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_failure_frees_slot() {
        // Port 1 on localhost refuses connections
        let client = Client::open("redis://127.0.0.1:1/0").unwrap();
        let pool = ConnectionPool::new(client, 1, Duration::from_millis(500));

        for _ in 0..2 {
            let err = pool.get(Operation::ReadGroup).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.permits.available_permits(), 1);
    }
}
